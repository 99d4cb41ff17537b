//! Recognizes XDS failure signatures and applies the matching deck patch.
//!
//! Rules live in an ordered table so they can be inspected and tested without
//! running XDS. A scan applies at most one patch, and each rule patches at most
//! once per [`LogClassifier`], which bounds the retry loop in [`recover`].

use crate::deck::{ParameterDeck, JOB_INTEGRATE};
use crate::error::IntegrateError;
use crate::invoker::{rename_aside, ToolInvoker, LOG_FILE};
use crate::sink::{Severity, StatusColor};
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::Path;

pub const FAULT_MARKER: &str = "! ERROR !";
pub const FINISHED_MARKERS: &[&str] = &["fully converged"];
pub const PRESERVED_LOG: &str = "initialXDS.LOG";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Patch {
    ExtendSpotRange { first: u32, last: u32 },
    IntegrateDespiteIndexing,
    DefaultSpotShape,
}

impl Patch {
    pub fn describe(&self) -> String {
        match self {
            Patch::ExtendSpotRange { first, last } => {
                format!("extended SPOT_RANGE to {first} {last}")
            }
            Patch::IntegrateDespiteIndexing => {
                "continuing to integrate with a suboptimal indexing solution".to_string()
            }
            Patch::DefaultSpotShape => {
                "using default REFLECTING_RANGE and BEAM_DIVERGENCE".to_string()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultClassification {
    Finished,
    RecoverableFixed { rule: &'static str, patch: Patch },
    RecoverableWarning { rule: &'static str, reason: String },
    Unknown { line: String },
}

type PatchFn = fn(&mut ParameterDeck) -> Option<Patch>;

/// One recognized XDS error signature.
///
/// When `patch` is present and succeeds the scan is `RecoverableFixed`;
/// otherwise it is `RecoverableWarning` with `warning` as the reason.
#[derive(Clone, Copy)]
pub struct FaultRule {
    pub name: &'static str,
    pub patterns: &'static [&'static str],
    pub patch: Option<PatchFn>,
    pub warning: &'static str,
}

impl fmt::Debug for FaultRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FaultRule")
            .field("name", &self.name)
            .field("patterns", &self.patterns)
            .field("patches", &self.patch.is_some())
            .finish()
    }
}

impl FaultRule {
    pub fn matches(&self, line: &str) -> bool {
        self.patterns.iter().any(|pattern| line.contains(pattern))
    }
}

pub const RULES: &[FaultRule] = &[
    FaultRule {
        name: "indexing_geometry",
        patterns: &["CANNOT CONTINUE WITH A TWO DIMENSION", "CANNOT READ XPARM.XDS"],
        patch: Some(extend_spot_range),
        warning: "already using the full data range available",
    },
    FaultRule {
        name: "inaccurate_indexing",
        patterns: &["SOLUTION IS INACCURATE", "INSUFFICIENT PERCENTAGE"],
        patch: Some(integrate_despite_indexing),
        warning: "integration already attempted with the inaccurate indexing solution",
    },
    FaultRule {
        name: "spot_shape",
        patterns: &["SPOT SIZE PARAMETERS HAS FAILED"],
        patch: Some(default_spot_shape),
        warning: "default spot shape parameters already in use",
    },
    FaultRule {
        name: "spot_list",
        patterns: &["CANNOT READ SPOT"],
        patch: None,
        warning: "not enough data yet to find spots",
    },
    FaultRule {
        name: "beam_loss",
        patterns: &["END OF INPUT", "CANNOT READ IMAGE"],
        patch: None,
        warning: "unexpected end of input, possible beam loss",
    },
];

const REFLECTING_RANGE: &str = "REFLECTING_RANGE=1.0 REFLECTING_RANGE_E.S.D.=0.10";
const BEAM_DIVERGENCE: &str = "BEAM_DIVERGENCE=0.9 BEAM_DIVERGENCE_E.S.D.=0.09";

fn extend_spot_range(deck: &mut ParameterDeck) -> Option<Patch> {
    let (first, last) = deck.spot_range()?;
    let (_, max_last) = deck.data_range()?;
    if last >= max_last {
        return None;
    }
    deck.upsert(format!("SPOT_RANGE={first} {}", last + 1));
    // A run that no longer indexes would fail the same way without new geometry.
    if !deck.job().is_some_and(|job| job.contains("IDXREF")) {
        deck.upsert("JOB=IDXREF DEFPIX INTEGRATE CORRECT");
    }
    Some(Patch::ExtendSpotRange {
        first,
        last: last + 1,
    })
}

fn integrate_despite_indexing(deck: &mut ParameterDeck) -> Option<Patch> {
    let downstream = deck
        .job()
        .is_some_and(|job| job.contains("INTEGRATE") || job.contains("CORRECT"));
    if downstream {
        return None;
    }
    deck.upsert(JOB_INTEGRATE);
    Some(Patch::IntegrateDespiteIndexing)
}

fn default_spot_shape(deck: &mut ParameterDeck) -> Option<Patch> {
    if deck.contains_line(REFLECTING_RANGE) && deck.contains_line(BEAM_DIVERGENCE) {
        return None;
    }
    deck.upsert(REFLECTING_RANGE);
    deck.upsert(BEAM_DIVERGENCE);
    Some(Patch::DefaultSpotShape)
}

/// Classifies logs of successive runs of one phase, remembering which rules
/// already patched the deck.
#[derive(Debug, Default)]
pub struct LogClassifier {
    applied: BTreeSet<&'static str>,
}

impl LogClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scan(&mut self, log: &str, deck: &mut ParameterDeck) -> FaultClassification {
        let lines: Vec<&str> = log.lines().collect();
        // Only faults after the last convergence report still count.
        let start = lines
            .iter()
            .rposition(|line| FINISHED_MARKERS.iter().any(|marker| line.contains(marker)))
            .map_or(0, |index| index + 1);
        let Some(line) = lines[start..]
            .iter()
            .copied()
            .find(|line| line.contains(FAULT_MARKER))
        else {
            return FaultClassification::Finished;
        };
        let Some(rule) = RULES.iter().find(|rule| rule.matches(line)) else {
            return FaultClassification::Unknown {
                line: line.trim().to_string(),
            };
        };
        if let Some(patch_fn) = rule.patch {
            if !self.applied.contains(rule.name) {
                if let Some(patch) = patch_fn(deck) {
                    self.applied.insert(rule.name);
                    return FaultClassification::RecoverableFixed {
                        rule: rule.name,
                        patch,
                    };
                }
            }
        }
        FaultClassification::RecoverableWarning {
            rule: rule.name,
            reason: rule.warning.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryOutcome {
    /// Classification of the last log examined.
    pub classification: FaultClassification,
    pub patches: Vec<Patch>,
}

impl RecoveryOutcome {
    pub fn warning(&self) -> Option<&str> {
        match &self.classification {
            FaultClassification::RecoverableWarning { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

/// Examines `XDS.LOG` in `dir` and re-runs XDS after each successful patch.
pub fn recover(
    invoker: &ToolInvoker<'_>,
    dir: &Path,
    deck: &mut ParameterDeck,
) -> Result<RecoveryOutcome, IntegrateError> {
    let progress = invoker.progress();
    let mut classifier = LogClassifier::new();
    let mut patches = Vec::new();
    loop {
        let log_path = dir.join(LOG_FILE);
        if !log_path.is_file() {
            return Err(IntegrateError::missing(dir, LOG_FILE));
        }
        let log = fs::read_to_string(&log_path)?;
        match classifier.scan(&log, deck) {
            FaultClassification::RecoverableFixed { rule, patch } => {
                tracing::info!(
                    rule,
                    patch = %patch.describe(),
                    dir = %dir.display(),
                    "patched XDS input"
                );
                progress.status(Severity::Info, StatusColor::White, &patch.describe());
                rename_aside(dir, LOG_FILE, PRESERVED_LOG)?;
                invoker.run_xds(dir, deck)?;
                patches.push(patch);
            }
            FaultClassification::Unknown { line } => {
                tracing::error!(dir = %dir.display(), line = %line, "unrecognized XDS error");
                progress.status(
                    Severity::Error,
                    StatusColor::Red,
                    &format!("XDS reported an error it cannot recover from: {line}"),
                );
                return Err(IntegrateError::UnknownFault {
                    dir: dir.to_path_buf(),
                    line,
                });
            }
            classification => {
                if let FaultClassification::RecoverableWarning { rule, reason } = &classification {
                    tracing::warn!(rule, reason = %reason, dir = %dir.display(), "XDS warning");
                    progress.status(Severity::Warning, StatusColor::Yellow, reason);
                }
                return Ok(RecoveryOutcome {
                    classification,
                    patches,
                });
            }
        }
    }
}
