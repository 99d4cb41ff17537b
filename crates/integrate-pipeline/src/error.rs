use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum IntegrateError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config error: {0}")]
    Config(String),
    #[error("launch error: {0}")]
    Launch(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("unrecognized XDS error in {}: {line}", .dir.display())]
    UnknownFault { dir: PathBuf, line: String },
    #[error("toolchain did not run properly in {}: {file} is missing", .dir.display())]
    MissingOutput { dir: PathBuf, file: String },
    #[error("scaling failed in {}: {reason}", .dir.display())]
    ScalingFailed { dir: PathBuf, reason: String },
    #[error("no images present for template {0}")]
    NoImages(String),
}

impl IntegrateError {
    pub(crate) fn missing(dir: &std::path::Path, file: &str) -> Self {
        IntegrateError::MissingOutput {
            dir: dir.to_path_buf(),
            file: file.to_string(),
        }
    }
}
