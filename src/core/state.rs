//! Run-state models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse status of a step, derived from its flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    NotRun,
    Done,
    Failed,
}

impl StepStatus {
    pub fn from_flags(done: bool, failed: bool) -> Self {
        if failed {
            StepStatus::Failed
        } else if done {
            StepStatus::Done
        } else {
            StepStatus::NotRun
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepStatus::NotRun => write!(f, "Not run"),
            StepStatus::Done => write!(f, "Done"),
            StepStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// Outcome of one execution of a unit of work.
///
/// Plain data, so it can be produced by a worker and applied by the
/// coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Only set for processes
    pub exit_code: Option<i32>,
    pub output: Option<String>,
    pub error_output: Option<String>,
    pub succeeded: bool,
    /// Error text from a failed spawn or a callable that returned an error
    pub raised_error: Option<String>,
}

impl ExecutionResult {
    /// A result for work that could not be started or did not report back
    pub fn not_run(started: DateTime<Utc>, error: impl Into<String>) -> Self {
        Self {
            start_time: started,
            end_time: Utc::now(),
            exit_code: None,
            output: None,
            error_output: None,
            succeeded: false,
            raised_error: Some(error.into()),
        }
    }

    pub fn duration(&self) -> chrono::Duration {
        self.end_time - self.start_time
    }

    /// Everything captured that helps explain a failure
    pub fn diagnostics(&self) -> String {
        let mut parts = Vec::new();
        if let Some(error) = &self.raised_error {
            parts.push(format!("Error: {}", error));
        }
        if let Some(output) = self.output.as_deref().filter(|s| !s.is_empty()) {
            parts.push(format!("STDOUT:\n{}", output));
        }
        if let Some(stderr) = self.error_output.as_deref().filter(|s| !s.is_empty()) {
            parts.push(format!("STDERR:\n{}", stderr));
        }
        parts.join("\n")
    }
}
