use crate::config::ControllerSettings;
use crate::error::IntegrateError;
use crate::invoker::ToolInvoker;
use crate::parse::{AimlessSummary, PlotSeries, ResolutionEstimate};
use crate::scaling::run_scaling;
use crate::sink::{ProgressSink, ResultsSink, Severity, StatusColor};
use crate::spacegroup::number_for_symbol;
use crate::xds_output::{
    isa, mosaicity, XParm, ASCII_HKL, COLSPOT_LP, CORRECT_LP, GXPARM, IDXREF_LP, INTEGRATE_LP,
};
use glob::Pattern;
use pathdiff::diff_paths;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

/// Logs that must exist for a wedge to count as processed.
pub const REQUIRED_LOGS: [&str; 3] = [COLSPOT_LP, IDXREF_LP, CORRECT_LP];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Working,
    Success,
    Failed,
}

/// Something the controller changed on its own while processing a wedge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Correction {
    Patch { description: String },
    ForcedSpacegroup { number: u32, cell: [f64; 6] },
    Spacegroup { from: u32, to: u32 },
    ResolutionCutoff { limit: f64 },
    Polished,
    Truncated { expected_last: u32, collected_last: u32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub role: String,
    pub path: PathBuf,
    pub sha256: String,
    pub size: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawLogs {
    pub pointless: Option<String>,
    pub aimless: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub status: RunStatus,
    pub first: u32,
    pub last: u32,
    pub dir: PathBuf,
    pub summary: Option<AimlessSummary>,
    pub resolution_estimate: Option<ResolutionEstimate>,
    pub rescaled_to: Option<f64>,
    pub scaling_spacegroup: Option<String>,
    pub scaling_spacegroup_number: Option<u32>,
    pub xds_spacegroup: Option<u32>,
    pub spacegroup_agreement: Option<bool>,
    pub unit_cell: Option<[f64; 6]>,
    pub xparm: Option<XParm>,
    pub mosaicity: Option<f64>,
    pub isa: Option<f64>,
    pub files: Vec<FileRecord>,
    pub plots: Vec<PlotSeries>,
    pub logs: RawLogs,
    pub corrections: Vec<Correction>,
    pub warnings: Vec<String>,
    pub error: Option<String>,
}

impl RunResult {
    fn empty(status: RunStatus, first: u32, last: u32, dir: &Path) -> Self {
        RunResult {
            status,
            first,
            last,
            dir: dir.to_path_buf(),
            summary: None,
            resolution_estimate: None,
            rescaled_to: None,
            scaling_spacegroup: None,
            scaling_spacegroup_number: None,
            xds_spacegroup: None,
            spacegroup_agreement: None,
            unit_cell: None,
            xparm: None,
            mosaicity: None,
            isa: None,
            files: Vec::new(),
            plots: Vec::new(),
            logs: RawLogs::default(),
            corrections: Vec::new(),
            warnings: Vec::new(),
            error: None,
        }
    }

    pub fn failed(first: u32, last: u32, dir: &Path, error: &IntegrateError) -> Self {
        let mut result = RunResult::empty(RunStatus::Failed, first, last, dir);
        result.error = Some(error.to_string());
        result
    }

    pub fn high_resolution(&self) -> Option<f64> {
        self.summary.as_ref()?.bins_high.overall
    }
}

/// Builds [`RunResult`]s from a processed wedge directory.
pub struct ResultsAssembler<'a> {
    invoker: &'a ToolInvoker<'a>,
    settings: &'a ControllerSettings,
    work_root: &'a Path,
    prefix: String,
}

impl<'a> ResultsAssembler<'a> {
    pub fn new(
        invoker: &'a ToolInvoker<'a>,
        settings: &'a ControllerSettings,
        work_root: &'a Path,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            invoker,
            settings,
            work_root,
            prefix: prefix.into(),
        }
    }

    /// Runs the scaling tools and gathers statistics for wedge `first..=last`
    /// in `dir`. Missing XDS logs mean the toolchain never ran properly.
    pub fn assemble(
        &self,
        dir: &Path,
        first: u32,
        last: u32,
        status: RunStatus,
    ) -> Result<RunResult, IntegrateError> {
        for name in REQUIRED_LOGS {
            if !dir.join(name).is_file() {
                tracing::error!(dir = %dir.display(), file = name, "required XDS log missing");
                self.invoker.progress().status(
                    Severity::Error,
                    StatusColor::Red,
                    &format!("XDS did not run properly: {name} is missing"),
                );
                return Err(IntegrateError::missing(dir, name));
            }
        }

        let scaling = run_scaling(
            self.invoker,
            dir,
            self.settings,
            &self.prefix,
            self.settings.spacegroup.is_some(),
        )?;

        let mut result = RunResult::empty(status, first, last, dir);
        result.mosaicity = read_optional(&dir.join(INTEGRATE_LP))?
            .as_deref()
            .and_then(mosaicity);
        result.isa = read_optional(&dir.join(CORRECT_LP))?.as_deref().and_then(isa);
        if let Some(src) = read_optional(&dir.join(GXPARM))? {
            match XParm::parse(&src) {
                Ok(xparm) => result.xparm = Some(xparm),
                Err(err) => {
                    tracing::warn!(dir = %dir.display(), error = %err, "unreadable GXPARM.XDS");
                    result.warnings.push(err);
                }
            }
        }
        result.xds_spacegroup = result.xparm.as_ref().map(|xparm| xparm.spacegroup);
        result.scaling_spacegroup = scaling.summary.scaling_spacegroup.clone();
        result.scaling_spacegroup_number = result
            .scaling_spacegroup
            .as_deref()
            .and_then(number_for_symbol);
        if let (Some(xds), Some(scaled)) = (result.xds_spacegroup, result.scaling_spacegroup_number)
        {
            result.spacegroup_agreement = Some(xds == scaled);
        }
        result.unit_cell = scaling.summary.unit_cell;
        result.resolution_estimate = Some(scaling.estimate);
        result.rescaled_to = scaling.rescaled_to;
        result.plots = scaling.plots;
        result.logs = RawLogs {
            pointless: Some(scaling.pointless_log),
            aimless: Some(scaling.aimless_log),
        };
        result.summary = Some(scaling.summary);

        for (role, path) in [
            ("reflections", dir.join(ASCII_HKL)),
            ("mtz", scaling.mtz),
            ("correct_log", dir.join(CORRECT_LP)),
        ] {
            if path.is_file() {
                result.files.push(self.file_record(role, &path)?);
            }
        }
        Ok(result)
    }

    fn file_record(&self, role: &str, path: &Path) -> Result<FileRecord, IntegrateError> {
        let bytes = fs::read(path)?;
        Ok(FileRecord {
            role: role.to_string(),
            path: diff_paths(path, self.work_root).unwrap_or_else(|| path.to_path_buf()),
            sha256: sha256_hex(&bytes),
            size: bytes.len() as u64,
        })
    }
}

/// Updates the progress percentage, if given, and hands `result` to the
/// caller.
pub fn publish(
    result: &RunResult,
    percent: Option<u8>,
    progress: &dyn ProgressSink,
    sink: &mut dyn ResultsSink,
) -> Result<(), IntegrateError> {
    if let Some(percent) = percent {
        progress.percent(percent);
    }
    let (severity, color) = match result.status {
        RunStatus::Working => (Severity::Info, StatusColor::White),
        RunStatus::Success => (Severity::Info, StatusColor::Green),
        RunStatus::Failed => (Severity::Error, StatusColor::Red),
    };
    let resolution = result
        .high_resolution()
        .map(|limit| format!(", {limit:.2} A"))
        .unwrap_or_default();
    progress.status(
        severity,
        color,
        &format!(
            "wedge {}-{} {:?}{resolution}",
            result.first, result.last, result.status
        ),
    );
    tracing::info!(
        first = result.first,
        last = result.last,
        status = ?result.status,
        ?percent,
        "publishing result"
    );
    sink.publish(result)
}

/// Copies every file in `dir` matching one of `patterns` into
/// `dir/archive_dir`, returning the copies.
pub fn archive(dir: &Path, archive_dir: &str, patterns: &[String]) -> Result<Vec<PathBuf>, IntegrateError> {
    let target = dir.join(archive_dir);
    fs::create_dir_all(&target)?;
    let base = Pattern::escape(&dir.to_string_lossy());
    let mut copied = Vec::new();
    for pattern in patterns {
        let full = format!("{base}/{pattern}");
        let entries = glob::glob(&full)
            .map_err(|err| IntegrateError::Config(format!("archive pattern {pattern}: {err}")))?;
        for entry in entries {
            let path = entry.map_err(|err| IntegrateError::Io(err.into()))?;
            if !path.is_file() {
                continue;
            }
            let Some(name) = path.file_name() else {
                continue;
            };
            let destination = target.join(name);
            fs::copy(&path, &destination)?;
            copied.push(destination);
        }
    }
    tracing::debug!(dir = %dir.display(), count = copied.len(), "archived wedge files");
    Ok(copied)
}

fn read_optional(path: &Path) -> Result<Option<String>, IntegrateError> {
    if !path.is_file() {
        return Ok(None);
    }
    Ok(Some(fs::read_to_string(path)?))
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::NullProgress;

    #[test]
    fn status_serializes_in_upper_case() {
        let json = serde_json::to_string(&RunStatus::Working).expect("serialize status");
        assert_eq!(json, "\"WORKING\"");
        let correction = serde_json::to_value(Correction::Spacegroup { from: 89, to: 96 })
            .expect("serialize correction");
        assert_eq!(correction["kind"], "spacegroup");
    }

    #[test]
    fn failed_result_carries_error_text() {
        let dir = Path::new("/work/wedge_1_20");
        let err = IntegrateError::missing(dir, CORRECT_LP);
        let result = RunResult::failed(1, 20, dir, &err);
        assert_eq!(result.status, RunStatus::Failed);
        assert!(result.error.as_deref().is_some_and(|text| text.contains("CORRECT.LP")));
        assert_eq!(result.high_resolution(), None);
    }

    #[test]
    fn publish_forwards_to_sink() {
        let dir = Path::new("/work/wedge_1_20");
        let result = RunResult::empty(RunStatus::Working, 1, 20, dir);
        let mut sink: Vec<RunResult> = Vec::new();
        publish(&result, Some(33), &NullProgress, &mut sink).expect("publish");
        assert_eq!(sink, vec![result]);
    }

    #[test]
    fn archive_copies_matching_files_only() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path().join("wedge_1_20");
        fs::create_dir_all(&dir).expect("create wedge");
        for name in ["CORRECT.LP", "IDXREF.LP", "XDS.INP", "BKGPIX.cbf"] {
            fs::write(dir.join(name), name).expect("write file");
        }
        let copied = archive(
            &dir,
            "xds_lp_files",
            &["*.LP".to_string(), "XDS.INP".to_string()],
        )
        .expect("archive");

        assert_eq!(copied.len(), 3);
        let archived = dir.join("xds_lp_files");
        assert!(archived.join("CORRECT.LP").is_file());
        assert!(archived.join("XDS.INP").is_file());
        assert!(!archived.join("BKGPIX.cbf").exists());
    }
}
