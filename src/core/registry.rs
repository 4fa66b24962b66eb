//! Named callables used as units of work and as gate predicates
//!
//! Steps refer to callables by name so that a pipeline snapshot stays plain
//! data. The registry is handed to the pipeline when it is opened and shared
//! with pool workers.

use crate::core::args::Args;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;

/// Error raised by a registered callable
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct CallError(pub String);

impl From<std::io::Error> for CallError {
    fn from(err: std::io::Error) -> Self {
        CallError(err.to_string())
    }
}

impl From<String> for CallError {
    fn from(message: String) -> Self {
        CallError(message)
    }
}

impl From<&str> for CallError {
    fn from(message: &str) -> Self {
        CallError(message.to_string())
    }
}

/// A registered callable
pub type Callable = Arc<dyn Fn(&Args) -> Result<Value, CallError> + Send + Sync>;

/// Function and predicate tables
#[derive(Clone, Default)]
pub struct Registry {
    functions: HashMap<String, Callable>,
    predicates: HashMap<String, Callable>,
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry preloaded with the built-in predicates
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::core::checks::register_builtins(&mut registry);
        registry
    }

    /// Register a function usable as a unit of work
    pub fn register_function<F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(&Args) -> Result<Value, CallError> + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Arc::new(f));
        self
    }

    /// Register a predicate usable as a pretest or donetest
    pub fn register_predicate<F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(&Args) -> Result<Value, CallError> + Send + Sync + 'static,
    {
        self.predicates.insert(name.into(), Arc::new(f));
        self
    }

    pub fn with_function<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Args) -> Result<Value, CallError> + Send + Sync + 'static,
    {
        self.register_function(name, f);
        self
    }

    pub fn with_predicate<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Args) -> Result<Value, CallError> + Send + Sync + 'static,
    {
        self.register_predicate(name, f);
        self
    }

    pub fn function(&self, name: &str) -> Option<Callable> {
        self.functions.get(name).cloned()
    }

    pub fn predicate(&self, name: &str) -> Option<Callable> {
        self.predicates.get(name).cloned()
    }

    pub fn has_function(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn has_predicate(&self, name: &str) -> bool {
        self.predicates.contains_key(name)
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut functions: Vec<_> = self.functions.keys().collect();
        let mut predicates: Vec<_> = self.predicates.keys().collect();
        functions.sort();
        predicates.sort();
        f.debug_struct("Registry")
            .field("functions", &functions)
            .field("predicates", &predicates)
            .finish()
    }
}

/// Invoke a callable, turning a panic into a `CallError`
pub fn invoke(callable: &Callable, args: &Args) -> Result<Value, CallError> {
    match catch_unwind(AssertUnwindSafe(|| callable(args))) {
        Ok(result) => result,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(CallError(format!("panicked: {}", message)))
        }
    }
}
