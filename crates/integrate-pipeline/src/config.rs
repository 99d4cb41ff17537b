use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Which symmetry wins when XDS and pointless disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SpacegroupDecider {
    #[default]
    Auto,
    Pointless,
    Xds,
}

impl SpacegroupDecider {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpacegroupDecider::Auto => "auto",
            SpacegroupDecider::Pointless => "pointless",
            SpacegroupDecider::Xds => "xds",
        }
    }

    /// True when the reflection-analysis result takes precedence.
    pub fn prefers_pointless(&self) -> bool {
        matches!(self, SpacegroupDecider::Auto | SpacegroupDecider::Pointless)
    }
}

impl FromStr for SpacegroupDecider {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "auto" => Ok(SpacegroupDecider::Auto),
            "pointless" => Ok(SpacegroupDecider::Pointless),
            "xds" => Ok(SpacegroupDecider::Xds),
            other => Err(format!("unknown spacegroup decider: {other}")),
        }
    }
}

/// Controller knobs read from the `[settings]` table of a job file.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ControllerSettings {
    pub spacegroup_decider: SpacegroupDecider,
    /// Spacegroup number forced by the user.
    pub spacegroup: Option<u32>,
    pub hi_res: Option<f64>,
    pub low_res: Option<f64>,
    pub partial_threshold_degrees: f64,
    pub polish_resolution_limit: f64,
    pub isigi_target: f64,
    pub scaling_isigi_target: f64,
    pub processors: u32,
    pub jobs: u32,
    pub xds_command: String,
    pub pointless_command: String,
    pub aimless_command: String,
    pub archive_dir: String,
    pub archive_patterns: Vec<String>,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            spacegroup_decider: SpacegroupDecider::Auto,
            spacegroup: None,
            hi_res: None,
            low_res: None,
            partial_threshold_degrees: 10.0,
            polish_resolution_limit: 4.5,
            isigi_target: 1.0,
            scaling_isigi_target: 1.5,
            processors: 4,
            jobs: 1,
            xds_command: "xds_par".to_string(),
            pointless_command: "pointless".to_string(),
            aimless_command: "aimless".to_string(),
            archive_dir: "xds_lp_files".to_string(),
            archive_patterns: vec![
                "*.LP".to_string(),
                "XDS.INP".to_string(),
                "XDS.LOG".to_string(),
                "XDS_ASCII.HKL".to_string(),
                "*.mtz".to_string(),
            ],
        }
    }
}

impl ControllerSettings {
    pub fn validate(&self) -> Result<(), String> {
        if self.partial_threshold_degrees <= 0.0 {
            return Err(format!(
                "partial_threshold_degrees must be positive: {}",
                self.partial_threshold_degrees
            ));
        }
        if self.isigi_target <= 0.0 || self.scaling_isigi_target <= 0.0 {
            return Err("I/sigma targets must be positive".to_string());
        }
        if self.processors == 0 || self.jobs == 0 {
            return Err("processors and jobs must be at least 1".to_string());
        }
        if let (Some(low), Some(high)) = (self.low_res, self.hi_res) {
            if high >= low {
                return Err(format!(
                    "hi_res ({high}) must be a smaller d-spacing than low_res ({low})"
                ));
            }
        }
        if let Some(number) = self.spacegroup {
            if !(1..=230).contains(&number) {
                return Err(format!("spacegroup number out of range: {number}"));
            }
        }
        for (name, command) in [
            ("xds_command", &self.xds_command),
            ("pointless_command", &self.pointless_command),
            ("aimless_command", &self.aimless_command),
        ] {
            if command.trim().is_empty() {
                return Err(format!("{name} is empty"));
            }
        }
        if self.archive_dir.trim().is_empty() {
            return Err("archive_dir is empty".to_string());
        }
        Ok(())
    }

    /// `INCLUDE_RESOLUTION_RANGE` limits when the user asked for either bound.
    pub fn resolution_range(&self) -> Option<(f64, f64)> {
        if self.low_res.is_none() && self.hi_res.is_none() {
            return None;
        }
        Some((self.low_res.unwrap_or(200.0), self.hi_res.unwrap_or(0.9)))
    }

    pub fn low_res_or_default(&self) -> f64 {
        self.low_res.unwrap_or(200.0)
    }
}
