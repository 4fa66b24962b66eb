//! Core domain models
//!
//! Steps, their gates and arguments, the callable registry and the pipeline
//! container that owns them.

pub mod args;
pub mod checks;
pub mod config;
pub mod error;
pub mod gate;
pub mod pipeline;
pub mod registry;
pub mod state;
pub mod step;

pub use args::{Args, PLACEHOLDER};
pub use error::{ConstructionError, Gate, PipelineError, UnitKind};
pub use gate::TestSpec;
pub use pipeline::*;
pub use registry::{CallError, Callable, Registry};
pub use state::*;
pub use step::*;
