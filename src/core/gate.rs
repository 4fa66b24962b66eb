//! Pretest and donetest gates

use crate::core::args::Args;
use crate::core::error::ConstructionError;
use crate::core::registry::{invoke, CallError, Registry};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tracing::debug;

static NO_ARGS: Args = Args::None;

/// How a test behaves with respect to fan-out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateKind {
    /// No test assigned
    Absent,
    /// Arguments still contain the file placeholder
    Template,
    /// Can be evaluated as-is
    Ready,
}

/// A predicate reference, optionally with arguments
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestSpec {
    #[default]
    Absent,
    Bare(String),
    WithArgs { predicate: String, args: Args },
}

impl TestSpec {
    pub fn new(predicate: impl Into<String>) -> Self {
        TestSpec::Bare(predicate.into())
    }

    pub fn with_args(predicate: impl Into<String>, args: Args) -> Self {
        TestSpec::WithArgs {
            predicate: predicate.into(),
            args,
        }
    }

    /// Parse the loose config form: a predicate name or a
    /// `[predicate, args]` pair
    pub fn from_value(value: &Value) -> Result<Self, ConstructionError> {
        match value {
            Value::Null => Ok(TestSpec::Absent),
            Value::String(name) => Ok(TestSpec::new(name.clone())),
            Value::Array(pair) if pair.len() == 2 => match &pair[0] {
                Value::String(name) => Ok(TestSpec::with_args(
                    name.clone(),
                    Args::from_value(pair[1].clone()),
                )),
                other => Err(ConstructionError::InvalidTest(format!(
                    "predicate must be a name, got {}",
                    other
                ))),
            },
            Value::Array(items) => Err(ConstructionError::InvalidTest(format!(
                "test must be a predicate or a (predicate, args) pair, got {} elements",
                items.len()
            ))),
            other => Err(ConstructionError::InvalidTest(format!(
                "unsupported test definition {}",
                other
            ))),
        }
    }

    pub fn predicate(&self) -> Option<&str> {
        match self {
            TestSpec::Absent => None,
            TestSpec::Bare(name) | TestSpec::WithArgs { predicate: name, .. } => Some(name),
        }
    }

    pub fn args(&self) -> &Args {
        match self {
            TestSpec::WithArgs { args, .. } => args,
            _ => &NO_ARGS,
        }
    }

    pub fn classify(&self) -> GateKind {
        match self {
            TestSpec::Absent => GateKind::Absent,
            TestSpec::Bare(_) => GateKind::Ready,
            TestSpec::WithArgs { args, .. } if args.contains_placeholder() => GateKind::Template,
            TestSpec::WithArgs { .. } => GateKind::Ready,
        }
    }

    pub fn is_absent(&self) -> bool {
        self.classify() == GateKind::Absent
    }

    pub fn is_ready(&self) -> bool {
        self.classify() == GateKind::Ready
    }

    pub fn is_template(&self) -> bool {
        self.classify() == GateKind::Template
    }

    /// Fail unless the predicate is registered
    pub fn validate(&self, registry: &Registry) -> Result<(), ConstructionError> {
        match self.predicate() {
            None => Ok(()),
            Some(name) if registry.has_predicate(name) => Ok(()),
            Some(name) => Err(ConstructionError::InvalidTest(format!(
                "predicate '{}' is not registered",
                name
            ))),
        }
    }

    /// Evaluate the predicate. `Ok(true)` when it returned `true` or `0`.
    pub fn evaluate(&self, registry: &Registry) -> Result<bool, CallError> {
        let name = match self.classify() {
            GateKind::Absent => return Err(CallError::from("no test assigned")),
            GateKind::Template => {
                return Err(CallError::from(
                    "test still contains a file placeholder and cannot be evaluated",
                ))
            }
            GateKind::Ready => self.predicate().unwrap_or_default(),
        };
        let callable = registry
            .predicate(name)
            .ok_or_else(|| CallError(format!("predicate '{}' is not registered", name)))?;
        let value = invoke(&callable, self.args())?;
        let passed = is_success(&value);
        debug!("Test {} returned {} ({})", self, value, if passed { "pass" } else { "fail" });
        Ok(passed)
    }

    /// Copy with the placeholder replaced by `file`
    pub fn substitute(&self, file: &str) -> Self {
        match self {
            TestSpec::WithArgs { predicate, args } => TestSpec::WithArgs {
                predicate: predicate.clone(),
                args: args.substitute(file),
            },
            other => other.clone(),
        }
    }
}

/// `true` and integer `0` both count as success
pub fn is_success(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_i64() == Some(0) || n.as_u64() == Some(0),
        _ => false,
    }
}

impl fmt::Display for TestSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestSpec::Absent => write!(f, "None"),
            TestSpec::Bare(name) => write!(f, "{}", name),
            TestSpec::WithArgs { predicate, args } => write!(f, "{}({})", predicate, args),
        }
    }
}
