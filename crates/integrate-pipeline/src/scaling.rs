//! pointless/aimless runs that turn `XDS_ASCII.HKL` into scaling statistics.
//!
//! aimless is used for statistics only (`cycles 0`, constant scales); XDS has
//! already scaled the data.

use crate::config::ControllerSettings;
use crate::error::IntegrateError;
use crate::invoker::{retire, ToolInvoker};
use crate::parse::{loggraph_tables, plot_series, AimlessSummary, PlotSeries, ResolutionEstimate};
use crate::rescut::find_cutoff;
use crate::xds_output::{ASCII_HKL, CORRECT_LP};
use std::fs;
use std::path::{Path, PathBuf};

pub const POINTLESS_SIGNATURE: &str = "P.R.Evans";
/// Trailing log lines searched for the pointless sign-off.
const SIGNATURE_WINDOW: usize = 10;
/// An aimless estimate coarser than the processed limit by more than this
/// triggers a second aimless run at the estimate.
const RESCALE_MARGIN: f64 = 0.05;

pub fn pointless_mtz(prefix: &str) -> String {
    format!("{prefix}_pointless.mtz")
}

pub fn aimless_mtz(prefix: &str) -> String {
    format!("{prefix}_aimless.mtz")
}

/// `keep_input_symmetry` makes pointless keep the spacegroup XDS was forced
/// into instead of choosing its own.
pub fn pointless_command(program: &str, prefix: &str, keep_input_symmetry: bool) -> String {
    let mut command = format!(
        "{program} xdsin {ASCII_HKL} hklout {} << eof\nSETTING C2\n",
        pointless_mtz(prefix)
    );
    if keep_input_symmetry {
        command.push_str("SPACEGROUP HKLIN\n");
    }
    command.push_str("eof\n");
    command
}

pub fn aimless_command(program: &str, prefix: &str, resolution: Option<f64>) -> String {
    let mut command = format!(
        "{program} hklin {} hklout {} << eof\n\
         anomalous on\n\
         scales constant\n\
         sdcorrection norefine full 1 0 0 partial 1 0 0\n\
         cycles 0\n",
        pointless_mtz(prefix),
        aimless_mtz(prefix)
    );
    if let Some(limit) = resolution {
        command.push_str(&format!("resolution {limit:.2}\n"));
    }
    command.push_str("eof\n");
    command
}

pub fn pointless_succeeded(log: &str) -> bool {
    let lines: Vec<&str> = log.lines().collect();
    let start = lines.len().saturating_sub(SIGNATURE_WINDOW);
    lines[start..]
        .iter()
        .any(|line| line.trim_start().starts_with(POINTLESS_SIGNATURE))
}

/// Resolution aimless should be re-run at, if its own estimate is
/// meaningfully coarser than the limit the data were processed to.
pub fn rescale_limit(summary: &AimlessSummary, estimate: &ResolutionEstimate) -> Option<f64> {
    let suggested = estimate.suggested()?;
    let current = summary.bins_high.overall?;
    (suggested > current + RESCALE_MARGIN).then_some(suggested)
}

/// Fills in the I/sigma estimate from `CORRECT.LP` at `target` when aimless
/// printed none.
pub fn complete_estimate(
    mut estimate: ResolutionEstimate,
    correct_lp: Option<&str>,
    target: f64,
) -> ResolutionEstimate {
    if estimate.isigi.is_none() {
        estimate.isigi = correct_lp.and_then(|src| find_cutoff(src, target));
    }
    estimate
}

#[derive(Debug, Clone)]
pub struct ScalingReport {
    pub summary: AimlessSummary,
    pub estimate: ResolutionEstimate,
    /// Limit of the second aimless run, when one was needed.
    pub rescaled_to: Option<f64>,
    pub plots: Vec<PlotSeries>,
    pub pointless_log: String,
    pub aimless_log: String,
    pub mtz: PathBuf,
}

/// Runs pointless then aimless in `dir`, re-running aimless once at the
/// estimated resolution when warranted.
pub fn run_scaling(
    invoker: &ToolInvoker<'_>,
    dir: &Path,
    settings: &ControllerSettings,
    prefix: &str,
    keep_input_symmetry: bool,
) -> Result<ScalingReport, IntegrateError> {
    if !dir.join(ASCII_HKL).is_file() {
        return Err(IntegrateError::missing(dir, ASCII_HKL));
    }
    let pointless_log_name = format!("{prefix}_pointless.log");
    let aimless_log_name = format!("{prefix}_aimless.log");

    let command = pointless_command(&settings.pointless_command, prefix, keep_input_symmetry);
    let log_path = invoker.run_tool(dir, &command, &pointless_log_name)?;
    let pointless_log = read_log(&log_path)?;
    if !pointless_succeeded(&pointless_log) {
        tracing::error!(dir = %dir.display(), "pointless did not finish");
        return Err(IntegrateError::ScalingFailed {
            dir: dir.to_path_buf(),
            reason: "pointless did not run properly".to_string(),
        });
    }

    let command = aimless_command(&settings.aimless_command, prefix, None);
    let log_path = invoker.run_tool(dir, &command, &aimless_log_name)?;
    let mut aimless_log = read_log(&log_path)?;
    let mut summary = parse_summary(dir, &aimless_log)?;
    let estimate = ResolutionEstimate::parse(&aimless_log).map_err(IntegrateError::Parse)?;
    let correct_lp = match fs::read_to_string(dir.join(CORRECT_LP)) {
        Ok(src) => Some(src),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
        Err(err) => return Err(err.into()),
    };
    let estimate = complete_estimate(estimate, correct_lp.as_deref(), settings.scaling_isigi_target);

    let rescaled_to = rescale_limit(&summary, &estimate);
    if let Some(limit) = rescaled_to {
        tracing::info!(
            dir = %dir.display(),
            limit,
            processed = summary.bins_high.overall,
            "re-running aimless at estimated resolution"
        );
        retire(dir, &aimless_log_name, "full")?;
        let command = aimless_command(&settings.aimless_command, prefix, Some(limit));
        let log_path = invoker.run_tool(dir, &command, &aimless_log_name)?;
        aimless_log = read_log(&log_path)?;
        summary = parse_summary(dir, &aimless_log)?;
    }

    let plots = plot_series(&loggraph_tables(&aimless_log));
    Ok(ScalingReport {
        summary,
        estimate,
        rescaled_to,
        plots,
        pointless_log,
        aimless_log,
        mtz: dir.join(aimless_mtz(prefix)),
    })
}

fn read_log(path: &Path) -> Result<String, IntegrateError> {
    fs::read_to_string(path).map_err(|err| {
        IntegrateError::Launch(format!("read log {}: {err}", path.display()))
    })
}

fn parse_summary(dir: &Path, log: &str) -> Result<AimlessSummary, IntegrateError> {
    AimlessSummary::parse(log).map_err(|reason| IntegrateError::ScalingFailed {
        dir: dir.to_path_buf(),
        reason,
    })
}
