use crate::context::{last_present, RunContext};
use crate::error::IntegrateError;
use crate::sink::ProgressSink;
use integrate_timing::Clock;
use std::time::Duration;

pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Each outstanding frame may take this many exposure times to appear.
const WAIT_FACTOR: f64 = 4.0;

/// Index of the most recent image reported by the acquisition system.
pub trait ImageCounter {
    fn current(&self) -> Result<Option<u32>, IntegrateError>;
}

#[derive(Clone, Copy)]
pub enum WaitStrategy<'a> {
    /// Poll for the image file itself.
    Filesystem,
    /// Poll a shared counter for an index at or beyond the target.
    Register(&'a dyn ImageCounter),
}

impl WaitStrategy<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            WaitStrategy::Filesystem => "filesystem",
            WaitStrategy::Register(_) => "register",
        }
    }
}

/// Upper bound on how long to wait for `target` once `last_known` is on disk.
pub fn max_wait(context: &RunContext, target: u32, last_known: u32) -> Duration {
    let outstanding = f64::from(target.saturating_sub(last_known));
    let seconds = outstanding * context.exposure_time.max(0.0) * WAIT_FACTOR;
    Duration::from_secs_f64(seconds)
}

pub struct AcquisitionMonitor<'a> {
    clock: &'a dyn Clock,
    progress: &'a dyn ProgressSink,
    strategy: WaitStrategy<'a>,
}

impl<'a> AcquisitionMonitor<'a> {
    pub fn new(
        clock: &'a dyn Clock,
        progress: &'a dyn ProgressSink,
        strategy: WaitStrategy<'a>,
    ) -> Self {
        Self {
            clock,
            progress,
            strategy,
        }
    }

    pub fn strategy(&self) -> WaitStrategy<'a> {
        self.strategy
    }

    pub fn arrived(&self, context: &RunContext, target: u32) -> Result<bool, IntegrateError> {
        match self.strategy {
            WaitStrategy::Filesystem => Ok(context.image_path(target).is_file()),
            WaitStrategy::Register(counter) => {
                Ok(counter.current()?.is_some_and(|current| current >= target))
            }
        }
    }

    /// Blocks until `target` is available or the computed ceiling elapses.
    /// `Ok(false)` means collection stalled; it is not an error.
    pub fn wait_for(
        &self,
        context: &RunContext,
        target: u32,
        last_known: u32,
    ) -> Result<bool, IntegrateError> {
        if self.arrived(context, target)? {
            return Ok(true);
        }
        let ceiling = max_wait(context, target, last_known);
        let deadline = self.clock.elapsed() + ceiling;
        tracing::info!(
            target,
            last_known,
            max_wait_secs = ceiling.as_secs_f64(),
            strategy = self.strategy.name(),
            "waiting for image"
        );
        while self.clock.elapsed() < deadline {
            self.clock.sleep(POLL_INTERVAL);
            self.progress.tick();
            if self.arrived(context, target)? {
                tracing::debug!(target, "image arrived");
                return Ok(true);
            }
        }
        tracing::warn!(target, "timed out waiting for image, collection may have stalled");
        Ok(false)
    }

    /// Highest contiguous image on disk from `first`. Both strategies read the
    /// filesystem here since only files can be processed.
    pub fn last_present(&self, context: &RunContext, first: u32) -> Option<u32> {
        last_present(context, first)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::NullProgress;
    use integrate_timing::ManualClock;
    use std::cell::Cell;
    use std::fs;
    use std::path::Path;

    fn context(dir: &Path) -> RunContext {
        RunContext {
            image_template: "img_????.cbf".to_string(),
            image_dir: dir.to_path_buf(),
            osc_range: 0.2,
            exposure_time: 0.5,
            beam_x: 150.0,
            beam_y: 150.0,
            pixel_size: 0.172,
            distance: 300.0,
            wavelength: 1.0,
            twotheta: None,
            first_image: 1,
            total: 180,
            end_frame: None,
        }
    }

    struct FixedCounter(Cell<u32>);

    impl ImageCounter for FixedCounter {
        fn current(&self) -> Result<Option<u32>, IntegrateError> {
            Ok(Some(self.0.get()))
        }
    }

    #[test]
    fn max_wait_scales_with_outstanding_frames() {
        let temp = tempfile::tempdir().expect("tempdir");
        let context = context(temp.path());
        assert_eq!(max_wait(&context, 50, 40), Duration::from_secs(20));
        assert_eq!(max_wait(&context, 40, 50), Duration::ZERO);
    }

    #[test]
    fn present_image_returns_without_sleeping() {
        let temp = tempfile::tempdir().expect("tempdir");
        let context = context(temp.path());
        fs::write(context.image_path(5), b"img").expect("write image");
        let clock = ManualClock::new();
        let monitor = AcquisitionMonitor::new(&clock, &NullProgress, WaitStrategy::Filesystem);
        assert!(monitor.wait_for(&context, 5, 1).expect("wait"));
        assert_eq!(clock.sleeps(), 0);
    }

    #[test]
    fn filesystem_wait_times_out_at_ceiling() {
        let temp = tempfile::tempdir().expect("tempdir");
        let context = context(temp.path());
        let clock = ManualClock::new();
        let monitor = AcquisitionMonitor::new(&clock, &NullProgress, WaitStrategy::Filesystem);
        // 10 outstanding frames * 0.5 s * 4 = 20 polls
        assert!(!monitor.wait_for(&context, 50, 40).expect("wait"));
        assert_eq!(clock.sleeps(), 20);
    }

    #[test]
    fn filesystem_wait_sees_late_arrival() {
        let temp = tempfile::tempdir().expect("tempdir");
        let context = context(temp.path());
        let path = context.image_path(50);
        let clock = ManualClock::with_hook(move |now| {
            if now >= Duration::from_secs(3) {
                let _ = fs::write(&path, b"img");
            }
        });
        let monitor = AcquisitionMonitor::new(&clock, &NullProgress, WaitStrategy::Filesystem);
        assert!(monitor.wait_for(&context, 50, 40).expect("wait"));
        assert_eq!(clock.sleeps(), 3);
    }

    #[test]
    fn register_strategy_compares_counter() {
        let temp = tempfile::tempdir().expect("tempdir");
        let context = context(temp.path());
        let counter = FixedCounter(Cell::new(60));
        let clock = ManualClock::new();
        let monitor =
            AcquisitionMonitor::new(&clock, &NullProgress, WaitStrategy::Register(&counter));
        assert!(monitor.wait_for(&context, 50, 40).expect("wait"));
        counter.0.set(45);
        assert!(!monitor.wait_for(&context, 50, 45).expect("wait"));
        assert_eq!(clock.sleeps(), 10);
    }
}
