//! Bounded worker pool for fan-out execution

use crate::core::registry::Registry;
use crate::core::state::ExecutionResult;
use crate::execution::executor::Invocation;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error};

/// Number of workers used when none is requested
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Runs invocations concurrently, at most `workers` at a time
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    workers: usize,
}

impl WorkerPool {
    pub fn new(workers: Option<usize>) -> Self {
        Self {
            workers: workers.unwrap_or_else(default_workers).max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Execute every invocation and return the results in input order.
    ///
    /// Waits for all of them; one failing never stops the others from being
    /// collected.
    pub async fn run(
        &self,
        invocations: Vec<Invocation>,
        registry: Arc<Registry>,
    ) -> Vec<ExecutionResult> {
        let started = Utc::now();
        let total = invocations.len();
        debug!("Dispatching {} unit(s) to {} worker(s)", total, self.workers);

        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();
        let mut names = Vec::with_capacity(total);

        for (index, invocation) in invocations.into_iter().enumerate() {
            names.push(invocation.step.clone());
            let semaphore = semaphore.clone();
            let registry = registry.clone();
            tasks.spawn(async move {
                // The semaphore is never closed
                let _permit = semaphore.acquire_owned().await.ok();
                (index, invocation.execute(registry).await)
            });
        }

        let mut results: Vec<Option<ExecutionResult>> = vec![None; total];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => results[index] = Some(result),
                Err(e) => error!("Worker task failed: {}", e),
            }
        }

        results
            .into_iter()
            .zip(names)
            .map(|(result, name)| {
                result.unwrap_or_else(|| {
                    ExecutionResult::not_run(started, format!("no result returned for {}", name))
                })
            })
            .collect()
    }
}
