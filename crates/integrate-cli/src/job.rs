use clap::ValueEnum;
use integrate_pipeline::config::ControllerSettings;
use integrate_pipeline::context::RunContext;
use integrate_pipeline::error::IntegrateError;
use integrate_pipeline::launcher::{missing_programs, program_name, LocalLauncher};
use integrate_pipeline::monitor::{ImageCounter, WaitStrategy};
use integrate_pipeline::results::RunResult;
use integrate_pipeline::sink::{ProgressSink, ResultsSink, Severity, StatusColor};
use integrate_pipeline::{run_integration, Collaborators, ControllerOptions, ControllerReport};
use integrate_timing::SystemClock;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};

const JOB_SCHEMA_VERSION: &str = "1";
const REPORT_SCHEMA_VERSION: &str = "1";
pub const RUN_MODE_ENV: &str = "INTEGRATE_RUN_MODE";

#[derive(Debug, Deserialize, Clone)]
pub struct JobConfig {
    pub schema_version: String,
    pub dataset: RunContext,
    #[serde(default)]
    pub settings: ControllerSettings,
    #[serde(default)]
    pub tools: ToolsConfig,
    pub outputs: OutputsConfig,
    #[serde(default)]
    pub deck: DeckConfig,
    #[serde(default)]
    pub run: RunConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ToolsConfig {
    #[serde(default = "default_shell")]
    pub shell: String,
    #[serde(default = "default_check_dependencies")]
    pub check_dependencies: bool,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            check_dependencies: default_check_dependencies(),
        }
    }
}

fn default_shell() -> String {
    "sh".to_string()
}

fn default_check_dependencies() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputsConfig {
    pub work_root: PathBuf,
    #[serde(default)]
    pub results: Option<PathBuf>,
    #[serde(default)]
    pub report: Option<PathBuf>,
}

/// Detector directives copied verbatim into every `XDS.INP`.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct DeckConfig {
    #[serde(default)]
    pub detector: Vec<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct RunConfig {
    #[serde(default)]
    pub mode: RunMode,
    /// Text file holding the index of the latest collected image.
    #[serde(default)]
    pub register: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    #[default]
    Filesystem,
    Register,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Filesystem => "filesystem",
            RunMode::Register => "register",
        }
    }
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize)]
pub struct JobReport {
    pub schema_version: String,
    pub mode: RunMode,
    pub results_path: PathBuf,
    pub report_path: PathBuf,
    pub results_written: usize,
    pub controller: ControllerReport,
}

impl JobConfig {
    /// Reads a job file and resolves its relative paths against the file's
    /// directory. Validation is left to the caller so overrides can apply
    /// first.
    pub fn load(config_path: &Path) -> Result<Self, String> {
        let config_path = fs::canonicalize(config_path)
            .map_err(|err| format!("resolve job config {}: {err}", config_path.display()))?;
        let config_src = fs::read_to_string(&config_path)
            .map_err(|err| format!("read job config {}: {err}", config_path.display()))?;
        let mut config: JobConfig =
            toml::from_str(&config_src).map_err(|err| format!("invalid job config: {err}"))?;
        let config_dir = config_path.parent().unwrap_or_else(|| Path::new("."));
        config.resolve_paths(config_dir);
        Ok(config)
    }

    fn resolve_paths(&mut self, base_dir: &Path) {
        self.dataset.image_dir = resolve_path(base_dir, &self.dataset.image_dir);
        self.outputs.work_root = resolve_path(base_dir, &self.outputs.work_root);
        if let Some(path) = &self.outputs.results {
            self.outputs.results = Some(resolve_path(base_dir, path));
        }
        if let Some(path) = &self.outputs.report {
            self.outputs.report = Some(resolve_path(base_dir, path));
        }
        if let Some(path) = &self.run.register {
            self.run.register = Some(resolve_path(base_dir, path));
        }
    }

    /// Applies a run mode named in the environment, if any.
    pub fn apply_mode_override(&mut self, value: Option<&str>) -> Result<(), String> {
        let Some(value) = value.map(str::trim).filter(|value| !value.is_empty()) else {
            return Ok(());
        };
        self.run.mode = RunMode::from_str(value, true)
            .map_err(|_| format!("{RUN_MODE_ENV} must be filesystem or register, got {value}"))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.schema_version != JOB_SCHEMA_VERSION {
            return Err(format!(
                "unsupported job schema version: {}",
                self.schema_version
            ));
        }
        self.dataset
            .validate()
            .map_err(|err| format!("dataset: {err}"))?;
        self.settings
            .validate()
            .map_err(|err| format!("settings: {err}"))?;
        if !self.dataset.image_dir.is_dir() {
            return Err(format!(
                "image directory not found: {}",
                self.dataset.image_dir.display()
            ));
        }
        if self.tools.shell.trim().is_empty() {
            return Err("tools.shell must be non-empty".to_string());
        }
        if self.run.mode == RunMode::Register && self.run.register.is_none() {
            return Err("run.register is required for mode=register".to_string());
        }
        if self.deck.detector.iter().any(|line| line.trim().is_empty()) {
            return Err("deck.detector must not contain empty lines".to_string());
        }
        Ok(())
    }

    pub fn results_path(&self) -> PathBuf {
        self.outputs
            .results
            .clone()
            .unwrap_or_else(|| self.outputs.work_root.join("results.jsonl"))
    }

    pub fn report_path(&self) -> PathBuf {
        self.outputs
            .report
            .clone()
            .unwrap_or_else(|| self.outputs.work_root.join("report.json"))
    }
}

/// Programs the configured commands start with.
pub fn tool_programs(settings: &ControllerSettings) -> Vec<String> {
    [
        &settings.xds_command,
        &settings.pointless_command,
        &settings.aimless_command,
    ]
    .into_iter()
    .map(|command| program_name(command).to_string())
    .collect()
}

pub fn run_job(config_path: &Path, mode: Option<RunMode>) -> Result<JobReport, String> {
    let mut config = JobConfig::load(config_path)?;
    config.apply_mode_override(std::env::var(RUN_MODE_ENV).ok().as_deref())?;
    if let Some(mode) = mode {
        config.run.mode = mode;
    }
    config.validate()?;

    if config.tools.check_dependencies {
        let missing = missing_programs(&tool_programs(&config.settings));
        if !missing.is_empty() {
            return Err(format!(
                "required programs not found on PATH: {}",
                missing.join(", ")
            ));
        }
    }

    fs::create_dir_all(&config.outputs.work_root).map_err(|err| {
        format!(
            "create work root {}: {err}",
            config.outputs.work_root.display()
        )
    })?;
    let results_path = config.results_path();
    let report_path = config.report_path();
    let mut results = JsonLinesResults::create(&results_path)
        .map_err(|err| format!("open results {}: {err}", results_path.display()))?;

    let register = config.run.register.clone().map(FileRegister::new);
    let strategy = match (&register, config.run.mode) {
        (Some(register), RunMode::Register) => WaitStrategy::Register(register),
        _ => WaitStrategy::Filesystem,
    };
    let launcher = LocalLauncher::with_shell(config.tools.shell.clone());
    let progress = ConsoleProgress::default();
    let clock = SystemClock::new();
    let options = ControllerOptions {
        work_root: config.outputs.work_root.clone(),
        settings: config.settings.clone(),
        detector: config.deck.detector.clone(),
    };

    tracing::info!(
        config = %config_path.display(),
        mode = config.run.mode.as_str(),
        work_root = %options.work_root.display(),
        "starting job"
    );
    let controller = run_integration(
        &options,
        Collaborators {
            launcher: &launcher,
            progress: &progress,
            clock: &clock,
            strategy,
        },
        config.dataset.clone(),
        &mut results,
    )
    .map_err(|err| format!("integration failed: {err}"))?;

    let report = JobReport {
        schema_version: REPORT_SCHEMA_VERSION.to_string(),
        mode: config.run.mode,
        results_path,
        report_path: report_path.clone(),
        results_written: results.written(),
        controller,
    };
    write_report(&report_path, &report)?;
    Ok(report)
}

fn write_report(path: &Path, report: &JobReport) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|err| format!("create report dir {}: {err}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(report).map_err(|err| err.to_string())?;
    fs::write(path, json).map_err(|err| format!("write report {}: {err}", path.display()))?;
    Ok(())
}

fn resolve_path(base_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

/// One JSON object per published result, flushed as it arrives so a
/// watcher sees preliminary statistics immediately.
pub struct JsonLinesResults {
    writer: BufWriter<File>,
    written: usize,
}

impl JsonLinesResults {
    pub fn create(path: &Path) -> Result<Self, IntegrateError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(Self {
            writer: BufWriter::new(File::create(path)?),
            written: 0,
        })
    }

    pub fn written(&self) -> usize {
        self.written
    }
}

impl ResultsSink for JsonLinesResults {
    fn publish(&mut self, result: &RunResult) -> Result<(), IntegrateError> {
        serde_json::to_writer(&mut self.writer, result)
            .map_err(|err| IntegrateError::Io(err.into()))?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        self.written += 1;
        Ok(())
    }
}

/// Reads the latest image index from a file the acquisition system rewrites.
/// A missing or empty file means nothing has been collected yet.
#[derive(Debug, Clone)]
pub struct FileRegister {
    path: PathBuf,
}

impl FileRegister {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl ImageCounter for FileRegister {
    fn current(&self) -> Result<Option<u32>, IntegrateError> {
        let src = match fs::read_to_string(&self.path) {
            Ok(src) => src,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let value = src.trim();
        if value.is_empty() {
            return Ok(None);
        }
        value.parse().map(Some).map_err(|err| {
            IntegrateError::Parse(format!("image register {}: {err}", self.path.display()))
        })
    }
}

/// Prints status lines prefixed with the latest percentage.
#[derive(Debug, Default)]
pub struct ConsoleProgress {
    percent: AtomicU8,
}

impl ProgressSink for ConsoleProgress {
    fn percent(&self, value: u8) {
        self.percent.store(value, Ordering::Relaxed);
    }

    fn status(&self, severity: Severity, color: StatusColor, text: &str) {
        let percent = self.percent.load(Ordering::Relaxed);
        let tag = match (severity, color) {
            (Severity::Error, _) | (_, StatusColor::Red) => "error: ",
            (Severity::Warning, _) | (_, StatusColor::Yellow) => "warning: ",
            (_, StatusColor::Green) => "done: ",
            _ => "",
        };
        println!("[{percent:>3}%] {tag}{text}");
    }
}
