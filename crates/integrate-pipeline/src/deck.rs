use crate::config::ControllerSettings;
use crate::context::RunContext;
use crate::error::IntegrateError;
use std::fs;
use std::path::{Path, PathBuf};

pub const DECK_FILE: &str = "XDS.INP";

pub const JOB_SPOTS: &str = "JOB=XYCORR INIT COLSPOT";
pub const JOB_INDEX: &str = "JOB=IDXREF";
pub const JOB_INTEGRATE: &str = "JOB=DEFPIX INTEGRATE CORRECT";
pub const JOB_REINTEGRATE: &str = "JOB=INTEGRATE CORRECT";

/// Ordered XDS input directives.
///
/// Keys are the text before the first `=`. `upsert` keeps at most one entry per
/// key and always replaces whole lines, so re-applying the same directive is a
/// no-op.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParameterDeck {
    lines: Vec<String>,
}

impl ParameterDeck {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
        }
    }

    /// Dataset-dependent directives plus the configured detector block.
    pub fn base(context: &RunContext, settings: &ControllerSettings, detector: &[String]) -> Self {
        let mut deck = ParameterDeck::new();
        deck.append("!===== DATA SET DEPENDENT PARAMETERS =====");
        deck.upsert(format!(
            "ORGX={:.2} ORGY={:.2}",
            context.beam_x / context.pixel_size,
            context.beam_y / context.pixel_size
        ));
        deck.upsert(format!("DETECTOR_DISTANCE={:.2}", context.distance));
        deck.upsert(format!("OSCILLATION_RANGE={:.2}", context.osc_range));
        deck.upsert(format!("X-RAY_WAVELENGTH={:.5}", context.wavelength));
        deck.upsert(format!(
            "NAME_TEMPLATE_OF_DATA_FRAMES={}",
            context.template_path().display()
        ));
        deck.upsert(format!(
            "BACKGROUND_RANGE={} {}",
            context.first_image,
            context.first_image + 4
        ));
        deck.append("!===== DETECTOR PARAMETERS =====");
        for line in detector {
            // Several UNTRUSTED_* regions may share a key.
            if line.starts_with("UNTRUSTED_") {
                deck.append(line.clone());
            } else {
                deck.upsert(line.clone());
            }
        }
        if let Some(twotheta) = context.twotheta.filter(|value| *value != 0.0) {
            let radians = twotheta.to_radians();
            deck.upsert(format!(
                "DIRECTION_OF_DETECTOR_Y-AXIS= 0.0 {:.4} {:.4}",
                radians.cos(),
                radians.sin()
            ));
        }
        if let Some((low, high)) = settings.resolution_range() {
            deck.upsert(format!("INCLUDE_RESOLUTION_RANGE={low:.2} {high:.2}"));
        }
        deck
    }

    /// Per-wedge processing directives.
    pub fn set_wedge(&mut self, first: u32, last: u32, settings: &ControllerSettings) {
        self.upsert(format!(
            "MAXIMUM_NUMBER_OF_PROCESSORS={}",
            settings.processors
        ));
        self.upsert(format!("MAXIMUM_NUMBER_OF_JOBS={}", settings.jobs));
        self.upsert(format!(
            "BACKGROUND_RANGE={first} {}",
            last.min(first + 4)
        ));
        self.upsert(format!("DATA_RANGE={first} {last}"));
        self.upsert(format!("SPOT_RANGE={first} {last}"));
    }

    pub fn upsert(&mut self, line: impl Into<String>) {
        let line = line.into();
        let key = directive_key(&line).to_string();
        match self
            .lines
            .iter_mut()
            .find(|existing| directive_key(existing) == key)
        {
            Some(existing) => *existing = line,
            None => self.lines.push(line),
        }
    }

    pub fn append(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    /// Value of the first directive with `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.lines.iter().find_map(|line| {
            let (candidate, value) = line.split_once('=')?;
            (candidate.trim() == key).then(|| value.trim())
        })
    }

    pub fn contains_line(&self, line: &str) -> bool {
        self.lines.iter().any(|existing| existing == line)
    }

    pub fn job(&self) -> Option<&str> {
        self.get("JOB")
    }

    pub fn spot_range(&self) -> Option<(u32, u32)> {
        parse_range(self.get("SPOT_RANGE")?)
    }

    pub fn data_range(&self) -> Option<(u32, u32)> {
        parse_range(self.get("DATA_RANGE")?)
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            out.push_str(line);
            out.push('\n');
        }
        out
    }

    /// Overwrites `XDS.INP` in `dir`.
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf, IntegrateError> {
        let path = dir.join(DECK_FILE);
        fs::write(&path, self.render())?;
        Ok(path)
    }
}

fn directive_key(line: &str) -> &str {
    match line.split_once('=') {
        Some((key, _)) => key.trim(),
        None => line.trim(),
    }
}

fn parse_range(value: &str) -> Option<(u32, u32)> {
    let mut parts = value.split_whitespace();
    let first = parts.next()?.parse().ok()?;
    let last = parts.next()?.parse().ok()?;
    Some((first, last))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_replaces_matching_key_in_place() {
        let mut deck = ParameterDeck::from_lines(["JOB=XYCORR INIT COLSPOT", "DATA_RANGE=1 10"]);
        deck.upsert("JOB=IDXREF");
        assert_eq!(deck.lines(), ["JOB=IDXREF", "DATA_RANGE=1 10"]);
        deck.upsert("SPOT_RANGE=1 5");
        assert_eq!(deck.len(), 3);
        assert_eq!(deck.spot_range(), Some((1, 5)));
    }

    #[test]
    fn upsert_is_idempotent() {
        let mut deck = ParameterDeck::from_lines(["A=1", "B=2", "C=3"]);
        deck.upsert("B=7");
        let once = deck.clone();
        deck.upsert("B=7");
        deck.upsert("B=7");
        assert_eq!(deck, once);
        assert_eq!(deck.render(), "A=1\nB=7\nC=3\n");
    }

    #[test]
    fn keys_match_exactly_not_by_substring() {
        let mut deck = ParameterDeck::from_lines(["SPOT_RANGE=1 5", "RANGE=2"]);
        deck.upsert("RANGE=9");
        assert_eq!(deck.lines(), ["SPOT_RANGE=1 5", "RANGE=9"]);
    }

    #[test]
    fn append_keeps_duplicates() {
        let mut deck = ParameterDeck::new();
        deck.append("UNTRUSTED_RECTANGLE=0 10 0 10");
        deck.append("UNTRUSTED_RECTANGLE=20 30 20 30");
        assert_eq!(deck.len(), 2);
        assert_eq!(deck.get("UNTRUSTED_RECTANGLE"), Some("0 10 0 10"));
    }

    #[test]
    fn write_to_overwrites_input_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut deck = ParameterDeck::from_lines(["JOB=IDXREF"]);
        deck.write_to(temp.path()).expect("write deck");
        deck.upsert(JOB_INTEGRATE);
        let path = deck.write_to(temp.path()).expect("rewrite deck");
        let written = fs::read_to_string(path).expect("read deck");
        assert_eq!(written, "JOB=DEFPIX INTEGRATE CORRECT\n");
    }

    #[test]
    fn wedge_directives_clamp_background() {
        let mut deck = ParameterDeck::new();
        deck.set_wedge(1, 3, &ControllerSettings::default());
        assert_eq!(deck.get("BACKGROUND_RANGE"), Some("1 3"));
        assert_eq!(deck.data_range(), Some((1, 3)));
        assert_eq!(deck.spot_range(), Some((1, 3)));
        assert_eq!(deck.get("MAXIMUM_NUMBER_OF_PROCESSORS"), Some("4"));
    }
}
