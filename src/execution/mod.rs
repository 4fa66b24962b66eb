//! Step execution: processes, functions, worker pool and fan-out

pub mod executor;
pub mod fanout;
pub mod pool;
pub mod process;

pub use executor::{ExecMode, Invocation, Work};
pub use pool::WorkerPool;
pub use process::{resolve, ProcessOutput};
