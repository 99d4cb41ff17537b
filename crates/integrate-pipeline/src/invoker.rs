use crate::deck::ParameterDeck;
use crate::error::IntegrateError;
use crate::launcher::Launcher;
use crate::sink::ProgressSink;
use integrate_timing::run_with_ticks;
use std::cell::Cell;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const LOG_FILE: &str = "XDS.LOG";
const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Runs XDS (and the scaling programs) through an injected launcher.
pub struct ToolInvoker<'a> {
    launcher: &'a dyn Launcher,
    progress: &'a dyn ProgressSink,
    xds_command: String,
    launches: Cell<u32>,
}

impl<'a> ToolInvoker<'a> {
    pub fn new(
        launcher: &'a dyn Launcher,
        progress: &'a dyn ProgressSink,
        xds_command: impl Into<String>,
    ) -> Self {
        Self {
            launcher,
            progress,
            xds_command: xds_command.into(),
            launches: Cell::new(0),
        }
    }

    pub fn progress(&self) -> &'a dyn ProgressSink {
        self.progress
    }

    /// Total number of launches issued so far.
    pub fn launches(&self) -> u32 {
        self.launches.get()
    }

    /// Writes `XDS.INP` into `dir` and runs XDS once. The returned log path may
    /// describe a failed run; classification happens elsewhere.
    pub fn run_xds(&self, dir: &Path, deck: &ParameterDeck) -> Result<PathBuf, IntegrateError> {
        deck.write_to(dir)?;
        tracing::debug!(dir = %dir.display(), job = deck.job().unwrap_or(""), "running xds");
        self.run_tool(dir, &self.xds_command, LOG_FILE)
    }

    /// Runs an arbitrary command in `dir`, ticking the progress sink while it
    /// blocks.
    pub fn run_tool(
        &self,
        dir: &Path,
        command: &str,
        log_name: &str,
    ) -> Result<PathBuf, IntegrateError> {
        self.launches.set(self.launches.get() + 1);
        let progress = self.progress;
        run_with_ticks(
            TICK_INTERVAL,
            || progress.tick(),
            || self.launcher.launch(dir, command, log_name),
        )?;
        Ok(dir.join(log_name))
    }
}

/// Moves `dir/name` to `dir/target`, picking `target.1`, `target.2`, ... when
/// the target already exists so earlier history is never overwritten.
/// Returns `None` when there was nothing to move.
pub fn rename_aside(dir: &Path, name: &str, target: &str) -> Result<Option<PathBuf>, IntegrateError> {
    let source = dir.join(name);
    if !source.exists() {
        return Ok(None);
    }
    let mut destination = dir.join(target);
    let mut counter = 1;
    while destination.exists() {
        destination = dir.join(format!("{target}.{counter}"));
        counter += 1;
    }
    fs::rename(&source, &destination)?;
    Ok(Some(destination))
}

/// Renames `name` to `name.suffix`, the on-disk convention for superseded
/// outputs.
pub fn retire(dir: &Path, name: &str, suffix: &str) -> Result<Option<PathBuf>, IntegrateError> {
    rename_aside(dir, name, &format!("{name}.{suffix}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::NullProgress;
    use std::cell::RefCell;

    struct EchoLauncher {
        commands: RefCell<Vec<String>>,
    }

    impl Launcher for EchoLauncher {
        fn launch(&self, workdir: &Path, command: &str, log_name: &str) -> Result<(), IntegrateError> {
            self.commands.borrow_mut().push(command.to_string());
            fs::write(workdir.join(log_name), format!("ran {command}\n"))?;
            Ok(())
        }
    }

    #[test]
    fn run_xds_writes_deck_before_launch() {
        let temp = tempfile::tempdir().expect("tempdir");
        let launcher = EchoLauncher {
            commands: RefCell::new(Vec::new()),
        };
        let progress = NullProgress;
        let invoker = ToolInvoker::new(&launcher, &progress, "xds_par");
        let deck = ParameterDeck::from_lines(["JOB=IDXREF", "DATA_RANGE=1 10"]);

        let log = invoker.run_xds(temp.path(), &deck).expect("run xds");

        assert_eq!(log, temp.path().join(LOG_FILE));
        let inp = fs::read_to_string(temp.path().join("XDS.INP")).expect("read inp");
        assert_eq!(inp, "JOB=IDXREF\nDATA_RANGE=1 10\n");
        assert_eq!(*launcher.commands.borrow(), vec!["xds_par".to_string()]);
        assert_eq!(invoker.launches(), 1);
    }

    #[test]
    fn rename_aside_never_overwrites() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path();
        fs::write(dir.join("XDS.LOG"), "first").expect("write log");
        let first = rename_aside(dir, "XDS.LOG", "initialXDS.LOG").expect("rename");
        fs::write(dir.join("XDS.LOG"), "second").expect("write log");
        let second = rename_aside(dir, "XDS.LOG", "initialXDS.LOG").expect("rename");

        assert_eq!(first, Some(dir.join("initialXDS.LOG")));
        assert_eq!(second, Some(dir.join("initialXDS.LOG.1")));
        assert_eq!(
            fs::read_to_string(dir.join("initialXDS.LOG")).expect("read"),
            "first"
        );
        assert!(rename_aside(dir, "XDS.LOG", "initialXDS.LOG")
            .expect("rename")
            .is_none());
    }

    #[test]
    fn retire_appends_suffix() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("CORRECT.LP"), "stats").expect("write lp");
        let moved = retire(temp.path(), "CORRECT.LP", "nocutoff").expect("retire");
        assert_eq!(moved, Some(temp.path().join("CORRECT.LP.nocutoff")));
        assert!(!temp.path().join("CORRECT.LP").exists());
    }
}
