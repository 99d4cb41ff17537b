use crate::error::IntegrateError;
use std::fs::File;
use std::path::Path;
use std::process::{Command, Stdio};

/// Runs one shell command inside a working directory, capturing its combined
/// output in `log_name`. Returns once the command has exited.
///
/// Whether the command runs locally or through a batch queue is up to the
/// implementation. Exit status is not reported: XDS failures are read from its
/// logs.
pub trait Launcher {
    fn launch(&self, workdir: &Path, command: &str, log_name: &str) -> Result<(), IntegrateError>;
}

#[derive(Debug, Clone)]
pub struct LocalLauncher {
    shell: String,
}

impl LocalLauncher {
    pub fn new() -> Self {
        Self {
            shell: "sh".to_string(),
        }
    }

    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

impl Default for LocalLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl Launcher for LocalLauncher {
    fn launch(&self, workdir: &Path, command: &str, log_name: &str) -> Result<(), IntegrateError> {
        let log_path = workdir.join(log_name);
        let stdout = File::create(&log_path).map_err(|err| {
            IntegrateError::Launch(format!("create log {}: {err}", log_path.display()))
        })?;
        let stderr = stdout
            .try_clone()
            .map_err(|err| IntegrateError::Launch(format!("clone log handle: {err}")))?;
        let status = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .status()
            .map_err(|err| IntegrateError::Launch(format!("run {command}: {err}")))?;
        if !status.success() {
            tracing::debug!(
                command,
                code = status.code().unwrap_or(-1),
                "command exited with non-zero status"
            );
        }
        Ok(())
    }
}

/// Names from `programs` that cannot be found on `PATH`.
pub fn missing_programs<S: AsRef<str>>(programs: &[S]) -> Vec<String> {
    programs
        .iter()
        .map(AsRef::as_ref)
        .filter(|program| which::which(program).is_err())
        .map(str::to_string)
        .collect()
}

/// First word of a configured command line, which is the program to look up.
pub fn program_name(command: &str) -> &str {
    command.split_whitespace().next().unwrap_or(command)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn local_launcher_captures_output_in_workdir() {
        let temp = tempfile::tempdir().expect("tempdir");
        LocalLauncher::new()
            .launch(temp.path(), "echo converged; echo oops 1>&2; exit 3", "TOOL.LOG")
            .expect("launch");
        let log = fs::read_to_string(temp.path().join("TOOL.LOG")).expect("read log");
        assert!(log.contains("converged"));
        assert!(log.contains("oops"));
    }

    #[test]
    fn missing_programs_reports_unknown_names() {
        let missing = missing_programs(&["sh", "definitely-not-an-xds-binary"]);
        assert_eq!(missing, vec!["definitely-not-an-xds-binary".to_string()]);
    }

    #[test]
    fn program_name_takes_first_word() {
        assert_eq!(program_name("xds_par -v"), "xds_par");
        assert_eq!(program_name("aimless"), "aimless");
    }
}
