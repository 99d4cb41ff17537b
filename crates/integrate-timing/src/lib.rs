use std::cell::{Cell, RefCell};
use std::fmt;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

/// Source of elapsed time and blocking sleeps for polling loops.
pub trait Clock {
    /// Time elapsed since the clock was created.
    fn elapsed(&self) -> Duration;
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn elapsed(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

type SleepHook = Box<dyn FnMut(Duration)>;

/// Clock whose time only moves when `sleep` or `advance` is called.
///
/// An optional hook observes the new elapsed time after every sleep, which lets
/// a test make files or counters appear at a chosen simulated instant.
pub struct ManualClock {
    now: Cell<Duration>,
    sleeps: Cell<u64>,
    hook: RefCell<Option<SleepHook>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Cell::new(Duration::ZERO),
            sleeps: Cell::new(0),
            hook: RefCell::new(None),
        }
    }

    pub fn with_hook<F>(hook: F) -> Self
    where
        F: FnMut(Duration) + 'static,
    {
        let clock = Self::new();
        *clock.hook.borrow_mut() = Some(Box::new(hook));
        clock
    }

    pub fn advance(&self, duration: Duration) {
        self.now.set(self.now.get() + duration);
    }

    pub fn sleeps(&self) -> u64 {
        self.sleeps.get()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ManualClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualClock")
            .field("now", &self.now.get())
            .field("sleeps", &self.sleeps.get())
            .finish()
    }
}

impl Clock for ManualClock {
    fn elapsed(&self) -> Duration {
        self.now.get()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
        self.sleeps.set(self.sleeps.get() + 1);
        if let Some(hook) = self.hook.borrow_mut().as_mut() {
            hook(self.now.get());
        }
    }
}

/// Runs `work` on the calling thread while a scoped helper thread calls `tick`
/// once per `interval`. The helper only shares a stop channel with the caller
/// and exits as soon as `work` returns (or unwinds).
pub fn run_with_ticks<T, F, W>(interval: Duration, tick: F, work: W) -> T
where
    F: Fn() + Sync,
    W: FnOnce() -> T,
{
    let (stop_tx, stop_rx) = mpsc::channel::<()>();
    let tick = &tick;
    thread::scope(|scope| {
        scope.spawn(move || loop {
            match stop_rx.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => tick(),
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        });
        let result = work();
        let _ = stop_tx.send(());
        result
    })
}
