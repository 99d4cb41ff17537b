use crate::error::IntegrateError;
use crate::results::RunResult;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusColor {
    White,
    Green,
    Yellow,
    Red,
}

/// Advisory progress channel owned by the caller.
///
/// The invoker ticks from a helper thread while XDS runs, hence `Sync`.
pub trait ProgressSink: Sync {
    fn percent(&self, value: u8);
    fn status(&self, severity: Severity, color: StatusColor, text: &str);
    fn tick(&self) {}
}

/// Receives every result record the controller produces, in order.
pub trait ResultsSink {
    fn publish(&mut self, result: &RunResult) -> Result<(), IntegrateError>;
}

/// Plain accumulator, useful when the caller persists results itself.
impl ResultsSink for Vec<RunResult> {
    fn publish(&mut self, result: &RunResult) -> Result<(), IntegrateError> {
        self.push(result.clone());
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn percent(&self, _value: u8) {}

    fn status(&self, _severity: Severity, _color: StatusColor, _text: &str) {}
}
