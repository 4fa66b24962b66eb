//! Unit executor - runs one process or registered function

use crate::core::args::Args;
use crate::core::error::UnitKind;
use crate::core::registry::{invoke, Registry};
use crate::core::state::ExecutionResult;
use crate::execution::process::run_shell;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error};

/// Whether output is recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecMode {
    /// Record stdout/stderr or the returned value
    Capture,
    /// Observe only success
    Silent,
}

impl ExecMode {
    pub fn from_capture(capture: bool) -> Self {
        if capture {
            ExecMode::Capture
        } else {
            ExecMode::Silent
        }
    }
}

/// The work itself, as plain data
#[derive(Debug, Clone, PartialEq)]
pub enum Work {
    Process { command_line: String },
    Function { name: String, args: Args },
}

/// A value snapshot of what one step needs executed.
///
/// Owns everything it needs, so it can be moved to a worker task.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub step: String,
    pub work: Work,
    pub mode: ExecMode,
}

impl Invocation {
    pub fn kind(&self) -> UnitKind {
        match self.work {
            Work::Process { .. } => UnitKind::Process,
            Work::Function { .. } => UnitKind::Function,
        }
    }

    /// Execute and report the outcome as data. Never returns an error:
    /// failures are recorded in the result.
    pub async fn execute(self, registry: Arc<Registry>) -> ExecutionResult {
        let start_time = Utc::now();
        debug!("Executing step: {}", self.step);

        match self.work {
            Work::Process { command_line } => {
                let capture = self.mode == ExecMode::Capture;
                match run_shell(&command_line, capture).await {
                    Ok(out) => ExecutionResult {
                        start_time,
                        end_time: Utc::now(),
                        succeeded: out.success(),
                        exit_code: out.exit_code,
                        output: out.stdout,
                        error_output: out.stderr,
                        raised_error: None,
                    },
                    Err(e) => {
                        error!("Failed to spawn '{}': {}", command_line, e);
                        ExecutionResult::not_run(start_time, format!("failed to spawn: {}", e))
                    }
                }
            }
            Work::Function { name, args } => {
                let Some(callable) = registry.function(&name) else {
                    return ExecutionResult::not_run(
                        start_time,
                        format!("function '{}' is not registered", name),
                    );
                };
                let joined = tokio::task::spawn_blocking(move || invoke(&callable, &args)).await;
                let end_time = Utc::now();
                match joined {
                    Ok(Ok(value)) => ExecutionResult {
                        start_time,
                        end_time,
                        exit_code: None,
                        output: match self.mode {
                            ExecMode::Capture => render_value(value),
                            ExecMode::Silent => None,
                        },
                        error_output: None,
                        succeeded: true,
                        raised_error: None,
                    },
                    Ok(Err(e)) => ExecutionResult {
                        end_time,
                        ..ExecutionResult::not_run(start_time, e.to_string())
                    },
                    Err(e) => ExecutionResult {
                        end_time,
                        ..ExecutionResult::not_run(start_time, format!("worker failed: {}", e))
                    },
                }
            }
        }
    }
}

fn render_value(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}
