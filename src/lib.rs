//! steppipe - durable, resumable step pipelines
//!
//! Steps wrap shell commands or registered functions, are gated by pretests
//! and donetests, fan out over files, and have their state saved after every
//! transition so an interrupted pipeline resumes where it stopped.

pub mod cli;
pub mod core;
pub mod discovery;
pub mod execution;
pub mod persistence;

// Re-export commonly used types
pub use core::config::PipelineConfig;
pub use core::{
    Args, CallError, CheckPolicy, CommentMode, ConstructionError, ExecutionResult, Pipeline,
    PipelineError, Registry, RunAllOptions, RunPolicy, Step, StepDefinition, StepStatus, TestSpec,
};
pub use persistence::{InMemoryStore, JsonFileStore, Snapshot, SnapshotStore};
#[cfg(feature = "sqlite")]
pub use persistence::SqliteSnapshotStore;
