//! Decides when to integrate a growing dataset and drives each wedge through
//! XDS, scaling, symmetry reconciliation, resolution cutoff and polishing.

use crate::classify::{recover, RecoveryOutcome};
use crate::config::{ControllerSettings, SpacegroupDecider};
use crate::context::RunContext;
use crate::deck::{ParameterDeck, JOB_INDEX, JOB_INTEGRATE, JOB_REINTEGRATE, JOB_SPOTS};
use crate::error::IntegrateError;
use crate::invoker::{retire, ToolInvoker, LOG_FILE};
use crate::launcher::Launcher;
use crate::monitor::{AcquisitionMonitor, WaitStrategy};
use crate::reconcile::{force_spacegroup, reconcile, Reconciliation};
use crate::rescut::find_cutoff;
use crate::results::{archive, publish, Correction, ResultsAssembler, RunResult, RunStatus};
use crate::sink::{ProgressSink, ResultsSink, Severity, StatusColor};
use crate::spacegroup::symbol_for_number;
use crate::xds_output::{CORRECT_LP, GXPARM, IDXREF_LP, XPARM};
use integrate_timing::Clock;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const PRELIMINARY_PERCENT: u8 = 33;
const CUTOFF_PERCENT: u8 = 66;
const FINAL_PERCENT: u8 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum WedgeDecision {
    FullRun { last: u32 },
    PartialRun { last: u32 },
    WaitForPartial { target: u32 },
    WaitForFinal { target: u32 },
}

/// Chooses the next step from what is on disk now.
///
/// `present_last` is the last contiguous image from the first one. A chosen
/// `last` never exceeds it.
pub fn decide(
    context: &RunContext,
    present_last: Option<u32>,
    threshold_degrees: f64,
    partial_done: bool,
) -> WedgeDecision {
    let final_image = context.final_image();
    let threshold_frame = threshold_frame(context, threshold_degrees);
    if present_last.is_some_and(|last| last >= final_image) {
        return WedgeDecision::FullRun { last: final_image };
    }
    if !partial_done {
        if present_last.is_some_and(|last| last >= threshold_frame) {
            return WedgeDecision::PartialRun {
                last: threshold_frame,
            };
        }
        if final_image > threshold_frame {
            return WedgeDecision::WaitForPartial {
                target: threshold_frame,
            };
        }
    }
    WedgeDecision::WaitForFinal {
        target: final_image,
    }
}

/// Last frame of the first `threshold_degrees` of rotation.
pub fn threshold_frame(context: &RunContext, threshold_degrees: f64) -> u32 {
    context.first_image + context.frames_for_degrees(threshold_degrees) - 1
}

pub fn wedge_dir(work_root: &Path, first: u32, last: u32) -> PathBuf {
    work_root.join(format!("wedge_{first}_{last}"))
}

#[derive(Debug, Clone)]
pub struct ControllerOptions {
    pub work_root: PathBuf,
    pub settings: ControllerSettings,
    /// Detector directives appended to every deck.
    pub detector: Vec<String>,
}

/// External services the controller drives. All are owned by the caller.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub launcher: &'a dyn Launcher,
    pub progress: &'a dyn ProgressSink,
    pub clock: &'a dyn Clock,
    pub strategy: WaitStrategy<'a>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ControllerReport {
    pub context: RunContext,
    pub decisions: Vec<WedgeDecision>,
    pub final_result: RunResult,
    pub launches: u32,
}

/// Processes one dataset to completion, publishing every intermediate and
/// final [`RunResult`] to `results`.
pub fn run_integration(
    options: &ControllerOptions,
    collaborators: Collaborators<'_>,
    mut context: RunContext,
    results: &mut dyn ResultsSink,
) -> Result<ControllerReport, IntegrateError> {
    context.validate().map_err(IntegrateError::Config)?;
    options.settings.validate().map_err(IntegrateError::Config)?;
    fs::create_dir_all(&options.work_root)?;

    let invoker = ToolInvoker::new(
        collaborators.launcher,
        collaborators.progress,
        options.settings.xds_command.clone(),
    );
    let monitor = AcquisitionMonitor::new(
        collaborators.clock,
        collaborators.progress,
        collaborators.strategy,
    );
    let mut controller = Controller {
        options,
        invoker,
        progress: collaborators.progress,
        results,
        pending: Vec::new(),
    };

    let first = context.first_image;
    let threshold = options.settings.partial_threshold_degrees;
    let mut decisions = Vec::new();
    let mut partial_done = false;
    tracing::info!(
        template = %context.image_template,
        first,
        final_image = context.final_image(),
        strategy = monitor.strategy().name(),
        "starting integration"
    );

    let final_result = loop {
        let present = monitor.last_present(&context, first);
        let mut decision = decide(&context, present, threshold, partial_done);
        decisions.push(decision);
        tracing::debug!(?decision, ?present, "scheduler decision");

        if let WedgeDecision::WaitForPartial { target } | WedgeDecision::WaitForFinal { target } =
            decision
        {
            let last_known = present.unwrap_or_else(|| first.saturating_sub(1));
            if monitor.wait_for(&context, target, last_known)? {
                decision = match decision {
                    WedgeDecision::WaitForPartial { target } => {
                        WedgeDecision::PartialRun { last: target }
                    }
                    _ => WedgeDecision::FullRun { last: target },
                };
            } else {
                let Some(collected) = monitor.last_present(&context, first) else {
                    return Err(IntegrateError::NoImages(context.image_template.clone()));
                };
                let expected = context.final_image();
                tracing::warn!(expected, collected, "collection stalled, processing reduced range");
                controller.progress.status(
                    Severity::Warning,
                    StatusColor::Yellow,
                    &format!("data collection stalled at image {collected} of {expected}"),
                );
                context.truncate_to(collected);
                controller.pending.push(Correction::Truncated {
                    expected_last: expected,
                    collected_last: collected,
                });
                decision = WedgeDecision::FullRun { last: collected };
            }
            decisions.push(decision);
        }

        match decision {
            WedgeDecision::FullRun { last } => break controller.full_run(&context, first, last)?,
            WedgeDecision::PartialRun { last } => {
                controller.partial_run(&context, first, last)?;
                partial_done = true;
            }
            WedgeDecision::WaitForPartial { .. } | WedgeDecision::WaitForFinal { .. } => {}
        }
    };

    Ok(ControllerReport {
        context,
        decisions,
        final_result,
        launches: controller.invoker.launches(),
    })
}

/// One image range in its own directory with the deck being refined for it.
struct WedgeAttempt {
    first: u32,
    last: u32,
    dir: PathBuf,
    deck: ParameterDeck,
    corrections: Vec<Correction>,
    warnings: Vec<String>,
    agreement: bool,
    cutoff: Option<f64>,
}

impl WedgeAttempt {
    fn note(&mut self, outcome: RecoveryOutcome) {
        if let Some(reason) = outcome.warning() {
            self.warnings.push(reason.to_string());
        }
        self.corrections
            .extend(outcome.patches.into_iter().map(|patch| Correction::Patch {
                description: patch.describe(),
            }));
    }

    fn stamp(&self, result: &mut RunResult) {
        result.corrections = self.corrections.clone();
        result.warnings.extend(self.warnings.iter().cloned());
    }
}

struct Controller<'a, 's> {
    options: &'a ControllerOptions,
    invoker: ToolInvoker<'a>,
    progress: &'a dyn ProgressSink,
    results: &'s mut dyn ResultsSink,
    /// Corrections made before the next attempt exists.
    pending: Vec<Correction>,
}

impl Controller<'_, '_> {
    fn settings(&self) -> &ControllerSettings {
        &self.options.settings
    }

    fn full_run(
        &mut self,
        context: &RunContext,
        first: u32,
        last: u32,
    ) -> Result<RunResult, IntegrateError> {
        let mut attempt = self.prepare(context, first, last)?;
        match self.process_full(context, &mut attempt) {
            Ok(result) => Ok(result),
            Err(err) => {
                self.publish_failure(&attempt, &err)?;
                Err(err)
            }
        }
    }

    fn partial_run(
        &mut self,
        context: &RunContext,
        first: u32,
        last: u32,
    ) -> Result<(), IntegrateError> {
        let mut attempt = self.prepare(context, first, last)?;
        if let Err(err) = self.process_partial(context, &mut attempt) {
            tracing::warn!(first, last, error = %err, "partial run failed, continuing");
            self.publish_failure(&attempt, &err)?;
        }
        Ok(())
    }

    fn prepare(
        &mut self,
        context: &RunContext,
        first: u32,
        last: u32,
    ) -> Result<WedgeAttempt, IntegrateError> {
        let dir = wedge_dir(&self.options.work_root, first, last);
        fs::create_dir_all(&dir)?;
        let mut deck = ParameterDeck::base(context, self.settings(), &self.options.detector);
        deck.set_wedge(first, last, self.settings());
        tracing::info!(first, last, dir = %dir.display(), "prepared wedge");
        Ok(WedgeAttempt {
            first,
            last,
            dir,
            deck,
            corrections: std::mem::take(&mut self.pending),
            warnings: Vec::new(),
            agreement: false,
            cutoff: None,
        })
    }

    fn process_full(
        &mut self,
        context: &RunContext,
        attempt: &mut WedgeAttempt,
    ) -> Result<RunResult, IntegrateError> {
        self.integrate(attempt)?;
        let preliminary = self.assemble(context, attempt, RunStatus::Working)?;
        self.emit(&preliminary, Some(PRELIMINARY_PERCENT))?;

        self.reconcile_symmetry(attempt, &preliminary)?;
        self.apply_cutoff(attempt, "nocutoff")?;
        let intermediate = self.assemble(context, attempt, RunStatus::Working)?;
        self.emit(&intermediate, Some(CUTOFF_PERCENT))?;

        let polish_limit = attempt.cutoff.or_else(|| intermediate.high_resolution());
        if polish_limit.is_some_and(|limit| limit <= self.settings().polish_resolution_limit) {
            self.polish(attempt)?;
        } else {
            tracing::info!(?polish_limit, "skipping polishing at low resolution");
            self.apply_cutoff(attempt, "oldcutoff")?;
        }

        let final_result = self.assemble(context, attempt, RunStatus::Success)?;
        archive(
            &attempt.dir,
            &self.settings().archive_dir,
            &self.settings().archive_patterns,
        )?;
        self.emit(&final_result, Some(FINAL_PERCENT))?;
        Ok(final_result)
    }

    fn process_partial(
        &mut self,
        context: &RunContext,
        attempt: &mut WedgeAttempt,
    ) -> Result<(), IntegrateError> {
        self.integrate(attempt)?;
        let preliminary = self.assemble(context, attempt, RunStatus::Working)?;
        self.reconcile_symmetry(attempt, &preliminary)?;
        self.apply_cutoff(attempt, "nocutoff")?;
        let result = self.assemble(context, attempt, RunStatus::Working)?;
        self.emit(&result, None)
    }

    /// Spot search, indexing and integration, each followed by recovery.
    fn integrate(&mut self, attempt: &mut WedgeAttempt) -> Result<(), IntegrateError> {
        self.phase(attempt, JOB_SPOTS, "searching for spots")?;
        self.phase(attempt, JOB_INDEX, "indexing")?;

        if !attempt.dir.join(XPARM).is_file() {
            let mid = attempt.first + (attempt.last - attempt.first) / 2;
            tracing::warn!(first = attempt.first, mid, "indexing produced no geometry, retrying on half the range");
            attempt
                .deck
                .upsert(format!("SPOT_RANGE={} {mid}", attempt.first));
            self.phase(attempt, JOB_INDEX, "re-indexing on first half of the wedge")?;
        }

        if let Some(number) = self.settings().spacegroup {
            let idxref_path = attempt.dir.join(IDXREF_LP);
            if !idxref_path.is_file() {
                return Err(IntegrateError::missing(&attempt.dir, IDXREF_LP));
            }
            let idxref = fs::read_to_string(&idxref_path)?;
            match force_spacegroup(&mut attempt.deck, number, &idxref) {
                Some(cell) => {
                    tracing::info!(number, ?cell, "forcing user spacegroup");
                    attempt
                        .corrections
                        .push(Correction::ForcedSpacegroup { number, cell });
                }
                None => {
                    let reason = format!("no indexing solution matches spacegroup {number}");
                    tracing::warn!(number, "{reason}");
                    self.progress
                        .status(Severity::Warning, StatusColor::Yellow, &reason);
                    attempt.warnings.push(reason);
                }
            }
        }

        self.phase(attempt, JOB_INTEGRATE, "integrating")
    }

    fn phase(
        &mut self,
        attempt: &mut WedgeAttempt,
        job: &str,
        label: &str,
    ) -> Result<(), IntegrateError> {
        attempt.deck.upsert(job);
        tracing::info!(first = attempt.first, last = attempt.last, job, "xds phase");
        self.progress
            .status(Severity::Info, StatusColor::White, &format!("  {label}"));
        self.invoker.run_xds(&attempt.dir, &attempt.deck)?;
        let outcome = recover(&self.invoker, &attempt.dir, &mut attempt.deck)?;
        attempt.note(outcome);
        Ok(())
    }

    /// Moves the previous correction outputs aside and re-runs INTEGRATE and
    /// CORRECT with the current deck.
    fn rerun(
        &mut self,
        attempt: &mut WedgeAttempt,
        suffix: &str,
        label: &str,
    ) -> Result<(), IntegrateError> {
        retire(&attempt.dir, CORRECT_LP, suffix)?;
        retire(&attempt.dir, LOG_FILE, suffix)?;
        self.phase(attempt, JOB_REINTEGRATE, label)
    }

    fn reconcile_symmetry(
        &mut self,
        attempt: &mut WedgeAttempt,
        preliminary: &RunResult,
    ) -> Result<(), IntegrateError> {
        let (Some(xds), Some(scaled)) = (
            preliminary.xds_spacegroup,
            preliminary.scaling_spacegroup_number,
        ) else {
            tracing::warn!("spacegroup unavailable from one of the tools, skipping reconciliation");
            attempt.agreement = false;
            return Ok(());
        };
        let decider = self.settings().spacegroup_decider;
        let outcome = reconcile(xds, scaled, preliminary.unit_cell, decider, &mut attempt.deck);
        attempt.agreement = outcome.agreed();
        let rerun = outcome.changed_deck();
        match outcome {
            Reconciliation::Agree { number } => {
                tracing::debug!(number, "spacegroups agree");
            }
            Reconciliation::KeepXds { xds, pointless } => {
                self.warn_disagreement(xds, pointless, decider);
            }
            Reconciliation::AdoptPointless { from, to, .. } => {
                self.warn_disagreement(from, to, decider);
                attempt.corrections.push(Correction::Spacegroup { from, to });
            }
        }
        if rerun {
            self.rerun(attempt, "nosymm", "re-integrating in the scaling spacegroup")?;
        }
        Ok(())
    }

    fn warn_disagreement(&self, xds: u32, pointless: u32, decider: SpacegroupDecider) {
        tracing::warn!(xds, pointless, decider = decider.as_str(), "spacegroup disagreement");
        self.progress.status(
            Severity::Warning,
            StatusColor::Yellow,
            &format!(
                "XDS chose spacegroup {}, pointless chose {}; keeping {}",
                spacegroup_label(xds),
                spacegroup_label(pointless),
                spacegroup_label(if decider.prefers_pointless() { pointless } else { xds })
            ),
        );
    }

    /// Applies the I/sigma cutoff from `CORRECT.LP` and re-runs correction.
    /// A user-fixed high-resolution limit is already in the deck and wins.
    fn apply_cutoff(&mut self, attempt: &mut WedgeAttempt, suffix: &str) -> Result<(), IntegrateError> {
        if let Some(limit) = self.settings().hi_res {
            attempt.cutoff = Some(limit);
            return Ok(());
        }
        let correct = fs::read_to_string(attempt.dir.join(CORRECT_LP))
            .map_err(|_| IntegrateError::missing(&attempt.dir, CORRECT_LP))?;
        let Some(limit) = find_cutoff(&correct, self.settings().isigi_target) else {
            tracing::debug!(dir = %attempt.dir.display(), "no resolution cutoff found");
            return Ok(());
        };
        tracing::info!(limit, "applying resolution cutoff");
        attempt.cutoff = Some(limit);
        attempt.deck.upsert(format!(
            "INCLUDE_RESOLUTION_RANGE={:.2} {limit:.2}",
            self.settings().low_res_or_default()
        ));
        attempt
            .corrections
            .push(Correction::ResolutionCutoff { limit });
        self.rerun(attempt, suffix, &format!("re-integrating to {limit:.2} A"))
    }

    /// Re-runs with the refined geometry as fixed input.
    fn polish(&mut self, attempt: &mut WedgeAttempt) -> Result<(), IntegrateError> {
        let reuse_geometry = attempt.agreement
            || self.settings().spacegroup_decider == SpacegroupDecider::Xds;
        let gxparm = attempt.dir.join(GXPARM);
        if reuse_geometry && gxparm.is_file() {
            fs::copy(&gxparm, attempt.dir.join(XPARM))?;
        }
        tracing::info!(reuse_geometry, "polishing");
        attempt.corrections.push(Correction::Polished);
        self.rerun(attempt, "old", "polishing")
    }

    fn assemble(
        &self,
        context: &RunContext,
        attempt: &WedgeAttempt,
        status: RunStatus,
    ) -> Result<RunResult, IntegrateError> {
        let assembler = ResultsAssembler::new(
            &self.invoker,
            &self.options.settings,
            &self.options.work_root,
            context.image_prefix(),
        );
        let mut result = assembler.assemble(&attempt.dir, attempt.first, attempt.last, status)?;
        attempt.stamp(&mut result);
        Ok(result)
    }

    fn emit(&mut self, result: &RunResult, percent: Option<u8>) -> Result<(), IntegrateError> {
        publish(result, percent, self.progress, &mut *self.results)
    }

    fn publish_failure(
        &mut self,
        attempt: &WedgeAttempt,
        err: &IntegrateError,
    ) -> Result<(), IntegrateError> {
        let mut failed = RunResult::failed(attempt.first, attempt.last, &attempt.dir, err);
        attempt.stamp(&mut failed);
        self.emit(&failed, None)
    }
}

fn spacegroup_label(number: u32) -> String {
    match symbol_for_number(number) {
        Some(symbol) => format!("{symbol} ({number})"),
        None => number.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(osc: f64, total: u32) -> RunContext {
        RunContext {
            image_template: "img_????.cbf".to_string(),
            image_dir: PathBuf::from("/data"),
            osc_range: osc,
            exposure_time: 0.1,
            beam_x: 150.0,
            beam_y: 150.0,
            pixel_size: 0.172,
            distance: 300.0,
            wavelength: 1.0,
            twotheta: None,
            first_image: 1,
            total,
            end_frame: None,
        }
    }

    #[test]
    fn complete_dataset_runs_directly() {
        let context = context(1.0, 20);
        assert_eq!(
            decide(&context, Some(20), 10.0, false),
            WedgeDecision::FullRun { last: 20 }
        );
        assert_eq!(
            decide(&context, Some(25), 10.0, true),
            WedgeDecision::FullRun { last: 20 }
        );
    }

    #[test]
    fn partial_run_once_threshold_is_present() {
        let context = context(0.5, 360);
        assert_eq!(threshold_frame(&context, 10.0), 20);
        assert_eq!(
            decide(&context, Some(35), 10.0, false),
            WedgeDecision::PartialRun { last: 20 }
        );
        assert_eq!(
            decide(&context, Some(35), 10.0, true),
            WedgeDecision::WaitForFinal { target: 360 }
        );
    }

    #[test]
    fn waits_for_threshold_frame_when_run_is_long_enough() {
        let context = context(0.2, 180);
        assert_eq!(
            decide(&context, Some(40), 10.0, false),
            WedgeDecision::WaitForPartial { target: 50 }
        );
        assert_eq!(
            decide(&context, None, 10.0, false),
            WedgeDecision::WaitForPartial { target: 50 }
        );
    }

    #[test]
    fn short_runs_wait_for_the_final_frame() {
        let context = context(1.0, 8);
        assert_eq!(
            decide(&context, Some(3), 10.0, false),
            WedgeDecision::WaitForFinal { target: 8 }
        );
    }

    #[test]
    fn end_frame_override_bounds_the_run() {
        let mut context = context(1.0, 100);
        context.end_frame = Some(30);
        assert_eq!(
            decide(&context, Some(30), 10.0, false),
            WedgeDecision::FullRun { last: 30 }
        );
    }

    #[test]
    fn chosen_last_never_exceeds_present_images() {
        for osc in [0.1, 0.2, 0.5, 1.0, 2.0] {
            for total in [1, 5, 20, 60, 180] {
                let context = context(osc, total);
                for partial_done in [false, true] {
                    for present in std::iter::once(None).chain((1..=total + 2).map(Some)) {
                        match decide(&context, present, 10.0, partial_done) {
                            WedgeDecision::FullRun { last } | WedgeDecision::PartialRun { last } => {
                                assert!(present.is_some_and(|present| last <= present));
                            }
                            WedgeDecision::WaitForPartial { target } => {
                                assert!(!partial_done);
                                assert!(present.map_or(true, |present| present < target));
                            }
                            WedgeDecision::WaitForFinal { target } => {
                                assert_eq!(target, context.final_image());
                                assert!(present.map_or(true, |present| present < target));
                            }
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn spacegroup_labels_carry_symbols() {
        assert_eq!(spacegroup_label(96), "P43212 (96)");
        assert_eq!(spacegroup_label(2), "2");
    }

    #[test]
    fn wedge_dirs_are_keyed_by_range() {
        let root = Path::new("/work");
        assert_eq!(wedge_dir(root, 1, 20), PathBuf::from("/work/wedge_1_20"));
        assert_ne!(wedge_dir(root, 1, 20), wedge_dir(root, 1, 40));
    }
}
