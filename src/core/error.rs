//! Error types for building and running pipelines

use crate::discovery::DiscoveryError;
use crate::persistence::StoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Which gate of a step produced a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gate {
    Pretest,
    Donetest,
}

impl fmt::Display for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Gate::Pretest => write!(f, "pretest"),
            Gate::Donetest => write!(f, "donetest"),
        }
    }
}

/// Kind of unit that failed to execute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitKind {
    Process,
    Function,
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitKind::Process => write!(f, "command"),
            UnitKind::Function => write!(f, "function"),
        }
    }
}

/// A step definition that cannot be turned into a step.
///
/// These surface immediately when a step is added and are never retried.
#[derive(Debug, Error)]
pub enum ConstructionError {
    #[error("{0} already in steps, choose another name or delete it")]
    DuplicateName(String),

    #[error("invalid test: {0}")]
    InvalidTest(String),

    #[error("function '{0}' is not registered")]
    UnknownFunction(String),

    #[error("{0} is not in your path")]
    Path(String),

    #[error("invalid step '{step}': {reason}")]
    InvalidStep { step: String, reason: String },

    #[error("cannot create substeps for '{step}': {reason}")]
    FanOut { step: String, reason: String },

    #[error(transparent)]
    Pattern(#[from] DiscoveryError),
}

/// Errors raised while running steps or mutating a pipeline
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Construction(#[from] ConstructionError),

    #[error("{gate} of step '{step}' failed: {reason}")]
    GateFailure {
        step: String,
        gate: Gate,
        reason: String,
    },

    #[error("{kind} step '{step}' failed{}\n{details}", .exit_code.map(|c| format!(" with exit code {}", c)).unwrap_or_default())]
    ExecutionFailure {
        step: String,
        kind: UnitKind,
        exit_code: Option<i32>,
        details: String,
    },

    #[error("{} substep(s) of '{step}' failed: {}", .failed.len(), .failed.join(", "))]
    AggregateFailure { step: String, failed: Vec<String> },

    #[error("no files matched the file list of '{step}' and its unit needs one")]
    NoFiles { step: String },

    #[error("{0} is not a valid pipeline step")]
    UnknownStep(String),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PipelineError {
    /// The gate that failed, if this is a gate failure
    pub fn gate(&self) -> Option<Gate> {
        match self {
            PipelineError::GateFailure { gate, .. } => Some(*gate),
            _ => None,
        }
    }

    /// Names of failing substeps, if this is an aggregate failure
    pub fn failed_substeps(&self) -> Option<&[String]> {
        match self {
            PipelineError::AggregateFailure { failed, .. } => Some(failed),
            _ => None,
        }
    }
}
