//! Fan-out: one substep per discovered file
//!
//! Substeps are created on the first run of a container and kept for its
//! lifetime. A container with substeps never runs its own unit. Its `done`
//! and `failed` flags are rolled up from the substeps, with `failed`
//! dominating. When a pattern matches nothing, the unit runs once on its own.

use crate::core::args::PLACEHOLDER;
use crate::core::error::{ConstructionError, PipelineError};
use crate::core::gate::TestSpec;
use crate::core::state::ExecutionResult;
use crate::core::step::{FanOut, RunContext, RunPolicy, Step, Strategy, Unit};
use crate::discovery;
use crate::execution::pool::WorkerPool;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

impl Step {
    /// Create substeps from the fan-out if they do not exist yet.
    ///
    /// Returns false when discovery found nothing, leaving the container
    /// without substeps.
    pub fn materialize(&mut self, root: &Path) -> Result<bool, PipelineError> {
        if self.substeps.is_some() {
            return Ok(true);
        }
        let files: Option<Vec<PathBuf>> = match &self.fan_out {
            None => return Ok(false),
            Some(FanOut::Files(files)) => Some(files.clone()),
            Some(FanOut::Pattern(pattern)) => discovery::discover(pattern, root)?,
        };
        let Some(files) = files else {
            warn!("No files matched the file list of {}", self.name);
            return Ok(false);
        };

        let substeps = files
            .iter()
            .map(|file| self.substep_for(&file.to_string_lossy()))
            .collect::<Result<Vec<_>, _>>()?;
        info!("Created {} substep(s) for {}", substeps.len(), self.name);
        self.substeps = Some(substeps);
        Ok(true)
    }

    fn substep_for(&self, file: &str) -> Result<Step, ConstructionError> {
        let in_command = self.command_is_template();
        let in_args = self.args.contains_placeholder();
        let unit = match &self.unit {
            Unit::Process { program } if in_command => Unit::Process {
                program: program.replace(PLACEHOLDER, file),
            },
            unit => unit.clone(),
        };
        let args = if in_args {
            self.args.substitute(file)
        } else if in_command {
            self.args.clone()
        } else {
            self.appended_args(file)?
        };

        let gate = |test: &TestSpec| {
            if test.is_template() {
                test.substitute(file)
            } else {
                TestSpec::Absent
            }
        };

        Ok(Step {
            name: file.to_string(),
            unit,
            args,
            capture: self.capture,
            pretest: gate(&self.pretest),
            donetest: gate(&self.donetest),
            depends: self.depends.clone(),
            fan_out: None,
            strategy: Strategy::Serial,
            substeps: None,
            done: false,
            failed: false,
            failed_pretest: false,
            failed_donetest: false,
            last_result: None,
            comment: None,
        })
    }

    fn command_is_template(&self) -> bool {
        matches!(&self.unit, Unit::Process { program } if program.contains(PLACEHOLDER))
    }

    fn appended_args(&self, file: &str) -> Result<crate::core::args::Args, ConstructionError> {
        self.args.append(file).ok_or_else(|| ConstructionError::FanOut {
            step: self.name.clone(),
            reason: "named arguments have no trailing position for the file".to_string(),
        })
    }

    /// Container gates, then materialization
    async fn prepare_container(
        &mut self,
        ctx: &RunContext<'_>,
        policy: RunPolicy,
    ) -> Result<Prepared, PipelineError> {
        let prepared = self.prepare(ctx.registry, !policy.force);
        ctx.checkpoint.checkpoint(self).await?;
        if !prepared? {
            return Ok(Prepared::Skip);
        }
        let materialized = self.materialize(ctx.root);
        ctx.checkpoint.checkpoint(self).await?;
        if materialized? {
            Ok(Prepared::FanOut)
        } else {
            Ok(Prepared::Direct)
        }
    }

    /// Nothing was discovered: run the step's own unit once, as if it had
    /// no file list. A unit that still names the placeholder cannot run.
    async fn run_without_files(
        &mut self,
        ctx: &RunContext<'_>,
        policy: RunPolicy,
    ) -> Result<(), PipelineError> {
        if self.command_is_template() || self.args.contains_placeholder() {
            self.done = false;
            self.failed = true;
            ctx.checkpoint.checkpoint(self).await?;
            return Err(PipelineError::NoFiles {
                step: self.name.clone(),
            });
        }
        info!("Running {} without a file list", self.name);
        self.execute_unit(ctx, policy.donetest).await
    }

    /// Run every substep in discovery order, checkpointing after each one
    pub(crate) async fn run_fanout_serial(
        &mut self,
        ctx: &RunContext<'_>,
        policy: RunPolicy,
    ) -> Result<(), PipelineError> {
        match self.prepare_container(ctx, policy).await? {
            Prepared::Skip => return Ok(()),
            Prepared::Direct => return self.run_without_files(ctx, policy).await,
            Prepared::FanOut => {}
        }
        let started = Utc::now();
        let detached = RunContext {
            registry: ctx.registry,
            root: ctx.root,
            checkpoint: &crate::core::step::NoCheckpoint,
        };

        let count = self.substeps.as_ref().map_or(0, Vec::len);
        let mut failures = Vec::new();
        for index in 0..count {
            if let Some(substep) = self.substeps.as_mut().and_then(|s| s.get_mut(index)) {
                if skip_substep(substep, ctx, policy) {
                    continue;
                }
                if let Err(e) = substep.run_unit(&detached, false, policy.donetest).await {
                    error!("Substep {} failed: {}", substep.name, e);
                    failures.push(substep.name.clone());
                }
            }
            ctx.checkpoint.checkpoint(self).await?;
        }

        self.finish_fanout(ctx, started, failures).await
    }

    /// Gate substeps in the coordinator, execute their units on a bounded
    /// pool, then apply every result in discovery order
    pub(crate) async fn run_fanout_parallel(
        &mut self,
        ctx: &RunContext<'_>,
        policy: RunPolicy,
        workers: Option<usize>,
    ) -> Result<(), PipelineError> {
        match self.prepare_container(ctx, policy).await? {
            Prepared::Skip => return Ok(()),
            Prepared::Direct => return self.run_without_files(ctx, policy).await,
            Prepared::FanOut => {}
        }
        let started = Utc::now();
        let substeps = self.substeps.get_or_insert_with(Vec::new);

        let mut failures = Vec::new();
        let mut dispatched = Vec::new();
        let mut invocations = Vec::new();
        for (index, substep) in substeps.iter_mut().enumerate() {
            if skip_substep(substep, ctx, policy) {
                continue;
            }
            substep.last_result = None;
            if substep.pretest.is_ready() && !substep.run_pretest(ctx.registry, false)? {
                substep.done = false;
                failures.push(substep.name.clone());
                continue;
            }
            invocations.push(substep.invocation()?);
            dispatched.push(index);
        }
        ctx.checkpoint.checkpoint(self).await?;

        let pool = WorkerPool::new(workers);
        info!(
            "Running {} substep(s) of {} on {} worker(s)",
            invocations.len(),
            self.name,
            pool.workers()
        );
        let results = pool.run(invocations, ctx.registry.clone()).await;

        let substeps = self.substeps.get_or_insert_with(Vec::new);
        for (index, result) in dispatched.into_iter().zip(results) {
            let substep = &mut substeps[index];
            let outcome = substep
                .apply_result(result)
                .and_then(|_| substep.verify(ctx.registry, policy.donetest));
            if let Err(e) = outcome {
                error!("Substep {} failed: {}", substep.name, e);
                failures.push(substep.name.clone());
            }
        }
        ctx.checkpoint.checkpoint(self).await?;

        // report in discovery order
        let order: Vec<String> = self.substeps.iter().flatten().map(|s| s.name.clone()).collect();
        failures.sort_by_key(|name| order.iter().position(|n| n == name));

        self.finish_fanout(ctx, started, failures).await
    }

    /// Roll substep flags up into the container and report failures together
    async fn finish_fanout(
        &mut self,
        ctx: &RunContext<'_>,
        started: chrono::DateTime<Utc>,
        failures: Vec<String>,
    ) -> Result<(), PipelineError> {
        let substeps = self.substeps.as_deref().unwrap_or_default();
        let all_done = substeps.iter().all(|s| s.done);
        let any_failed = substeps.iter().any(|s| s.failed);

        self.done = all_done && !any_failed;
        self.failed = any_failed;
        self.last_result = Some(ExecutionResult {
            start_time: started,
            end_time: Utc::now(),
            exit_code: None,
            output: None,
            error_output: None,
            succeeded: failures.is_empty() && !any_failed,
            raised_error: None,
        });

        let verified = if failures.is_empty() && !any_failed {
            self.verify(ctx.registry, crate::core::step::DonetestPolicy::Fail)
        } else {
            Ok(())
        };
        ctx.checkpoint.checkpoint(self).await?;
        verified?;

        if failures.is_empty() {
            info!("All substeps of {} completed", self.name);
            Ok(())
        } else {
            Err(PipelineError::AggregateFailure {
                step: self.name.clone(),
                failed: failures,
            })
        }
    }
}

/// What a container run does after its own gates
enum Prepared {
    /// Already done
    Skip,
    /// Discovery found nothing
    Direct,
    FanOut,
}

/// Donetest pre-check of a substep; true when it is already done
fn skip_substep(substep: &mut Step, ctx: &RunContext<'_>, policy: RunPolicy) -> bool {
    if policy.force {
        return false;
    }
    if substep.donetest.is_ready() {
        substep.precheck_done(ctx.registry);
    }
    substep.done
}
