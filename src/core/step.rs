//! Step domain model and its state machine
//!
//! A step wraps one unit of work (a shell command or a registered function)
//! with an optional pretest and donetest. A step with a fan-out runs once per
//! discovered file through substeps instead of running its own unit; see
//! `execution::fanout`.

use crate::core::args::{Args, PLACEHOLDER};
use crate::core::error::{ConstructionError, Gate, PipelineError, UnitKind};
use crate::core::gate::TestSpec;
use crate::core::registry::Registry;
use crate::core::state::{ExecutionResult, StepStatus};
use crate::discovery;
use crate::execution::executor::{ExecMode, Invocation, Work};
use crate::execution::process;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// The unit of work a step runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Unit {
    /// A program path, or a whole shell command line when the step has no
    /// arguments
    Process { program: String },
    /// Name of a registered function
    Function { function: String },
}

impl Unit {
    pub fn kind(&self) -> UnitKind {
        match self {
            Unit::Process { .. } => UnitKind::Process,
            Unit::Function { .. } => UnitKind::Function,
        }
    }

    /// The command or function name, for display
    pub fn target(&self) -> &str {
        match self {
            Unit::Process { program } => program,
            Unit::Function { function } => function,
        }
    }
}

/// Where a fan-out step gets its files from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FanOut {
    /// Regex resolved against the pipeline root when the step first runs
    Pattern(String),
    /// Explicit paths
    Files(Vec<PathBuf>),
}

/// How substeps of a fan-out step are run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    #[default]
    Serial,
    /// `None` uses every available core
    Parallel { workers: Option<usize> },
}

/// What a failing post-execution donetest does to the step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DonetestPolicy {
    /// Mark the step failed
    #[default]
    Fail,
    /// Leave the step not done, without marking it failed
    Leave,
}

/// Options for one run of a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunPolicy {
    /// Run even if the donetest already passes
    pub force: bool,
    pub donetest: DonetestPolicy,
    /// Overrides the step's own fan-out strategy
    pub strategy: Option<Strategy>,
}

impl RunPolicy {
    pub fn forced() -> Self {
        Self {
            force: true,
            ..Self::default()
        }
    }
}

/// How `add_comment` treats an existing comment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentMode {
    /// Refuse if a comment already exists
    New,
    Overwrite,
    Append,
}

/// Persisted after every state transition of a running step
#[async_trait::async_trait]
pub trait Checkpoint: Send + Sync {
    async fn checkpoint(&self, step: &Step) -> Result<(), PipelineError>;
}

/// Checkpoint that persists nothing, for steps run outside a pipeline
pub struct NoCheckpoint;

#[async_trait::async_trait]
impl Checkpoint for NoCheckpoint {
    async fn checkpoint(&self, _step: &Step) -> Result<(), PipelineError> {
        Ok(())
    }
}

/// What a running step can reach
pub struct RunContext<'a> {
    pub registry: &'a Arc<Registry>,
    /// Root for fan-out discovery
    pub root: &'a Path,
    pub checkpoint: &'a dyn Checkpoint,
}

/// Everything needed to build a step
#[derive(Debug, Clone, PartialEq)]
pub struct StepDefinition {
    pub name: String,
    pub unit: Unit,
    pub args: Args,
    pub capture: bool,
    pub pretest: TestSpec,
    pub donetest: TestSpec,
    pub depends: Vec<String>,
    pub fan_out: Option<FanOut>,
    pub strategy: Strategy,
    pub comment: Option<String>,
}

impl StepDefinition {
    fn new(name: impl Into<String>, unit: Unit) -> Self {
        Self {
            name: name.into(),
            unit,
            args: Args::None,
            capture: true,
            pretest: TestSpec::Absent,
            donetest: TestSpec::Absent,
            depends: Vec::new(),
            fan_out: None,
            strategy: Strategy::Serial,
            comment: None,
        }
    }

    /// A shell command: a single program (resolved on `PATH`) or a whole
    /// command line
    pub fn command(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self::new(name, Unit::Process { program: command.into() })
    }

    /// A registered function
    pub fn function(name: impl Into<String>, function: impl Into<String>) -> Self {
        Self::new(name, Unit::Function { function: function.into() })
    }

    pub fn args(mut self, args: Args) -> Self {
        self.args = args;
        self
    }

    pub fn capture(mut self, capture: bool) -> Self {
        self.capture = capture;
        self
    }

    pub fn pretest(mut self, test: TestSpec) -> Self {
        self.pretest = test;
        self
    }

    pub fn donetest(mut self, test: TestSpec) -> Self {
        self.donetest = test;
        self
    }

    pub fn depends<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends = names.into_iter().map(Into::into).collect();
        self
    }

    /// Fan out over files under the pipeline root matching `pattern`
    pub fn file_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.fan_out = Some(FanOut::Pattern(pattern.into()));
        self
    }

    /// Fan out over an explicit list of files
    pub fn files<I, P>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.fan_out = Some(FanOut::Files(files.into_iter().map(Into::into).collect()));
        self
    }

    pub fn parallel(mut self, workers: Option<usize>) -> Self {
        self.strategy = Strategy::Parallel { workers };
        self
    }

    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}

/// A single step in a pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    pub unit: Unit,
    pub args: Args,
    pub capture: bool,
    pub pretest: TestSpec,
    pub donetest: TestSpec,
    /// Stored, never enforced
    pub depends: Vec<String>,
    pub fan_out: Option<FanOut>,
    pub strategy: Strategy,
    /// Materialized on the first run of a fan-out step
    pub substeps: Option<Vec<Step>>,
    pub done: bool,
    pub failed: bool,
    pub failed_pretest: bool,
    pub failed_donetest: bool,
    pub last_result: Option<ExecutionResult>,
    pub comment: Option<String>,
}

impl Step {
    /// Validate a definition and build the step
    pub fn from_definition(
        definition: StepDefinition,
        registry: &Registry,
    ) -> Result<Self, ConstructionError> {
        let StepDefinition {
            name,
            unit,
            args,
            capture,
            pretest,
            donetest,
            depends,
            fan_out,
            strategy,
            comment,
        } = definition;

        let invalid = |reason: &str| ConstructionError::InvalidStep {
            step: name.clone(),
            reason: reason.to_string(),
        };

        if name.trim().is_empty() {
            return Err(invalid("a step needs a name"));
        }

        let unit = match unit {
            Unit::Function { function } => {
                if !registry.has_function(&function) {
                    return Err(ConstructionError::UnknownFunction(function));
                }
                Unit::Function { function }
            }
            Unit::Process { program } => {
                let program = program.trim().to_string();
                if program.is_empty() {
                    return Err(invalid("command is empty"));
                }
                if let Args::Named(_) = args {
                    return Err(invalid("named arguments cannot be passed to a command"));
                }
                if program.split_whitespace().count() == 1 {
                    if program.contains(PLACEHOLDER) {
                        Unit::Process { program }
                    } else {
                        let path = process::resolve(&program)?;
                        Unit::Process {
                            program: path.to_string_lossy().into_owned(),
                        }
                    }
                } else if !args.is_none() {
                    return Err(invalid(
                        "cannot have a multi-word command and arguments, pick one",
                    ));
                } else {
                    Unit::Process { program }
                }
            }
        };

        pretest.validate(registry)?;
        donetest.validate(registry)?;

        if let Strategy::Parallel { workers: Some(0) } = strategy {
            return Err(invalid("parallel fan-out needs at least one worker"));
        }

        if let Some(fan_out) = &fan_out {
            if let FanOut::Pattern(pattern) = fan_out {
                discovery::compile(pattern)?;
            }
            let substitutable = args.contains_placeholder()
                || matches!(&unit, Unit::Process { program } if program.contains(PLACEHOLDER))
                || args.append(PLACEHOLDER).is_some();
            if !substitutable {
                return Err(ConstructionError::FanOut {
                    step: name,
                    reason: format!(
                        "named arguments without {} leave nowhere to put the file",
                        PLACEHOLDER
                    ),
                });
            }
        }

        Ok(Step {
            name,
            unit,
            args,
            capture,
            pretest,
            donetest,
            depends,
            fan_out,
            strategy,
            substeps: None,
            done: false,
            failed: false,
            failed_pretest: false,
            failed_donetest: false,
            last_result: None,
            comment,
        })
    }

    pub fn status(&self) -> StepStatus {
        StepStatus::from_flags(self.done, self.failed)
    }

    pub fn is_container(&self) -> bool {
        self.fan_out.is_some()
    }

    /// Value snapshot of this step's unit, ready to run anywhere
    pub fn invocation(&self) -> Result<Invocation, PipelineError> {
        let work = match &self.unit {
            Unit::Process { program } => {
                let words = self.args.to_words().ok_or_else(|| {
                    ConstructionError::InvalidStep {
                        step: self.name.clone(),
                        reason: "named arguments cannot be passed to a command".to_string(),
                    }
                })?;
                let command_line = if words.is_empty() {
                    program.clone()
                } else {
                    format!("{} {}", program, words.join(" "))
                };
                Work::Process { command_line }
            }
            Unit::Function { function } => Work::Function {
                name: function.clone(),
                args: self.args.clone(),
            },
        };
        Ok(Invocation {
            step: self.name.clone(),
            work,
            mode: ExecMode::from_capture(self.capture),
        })
    }

    /// Run this step. Flags are set before any error is returned, and the
    /// checkpoint is hit after every transition.
    pub async fn run(&mut self, ctx: &RunContext<'_>, policy: RunPolicy) -> Result<(), PipelineError> {
        if self.is_container() {
            return match policy.strategy.unwrap_or(self.strategy) {
                Strategy::Serial => self.run_fanout_serial(ctx, policy).await,
                Strategy::Parallel { workers } => {
                    self.run_fanout_parallel(ctx, policy, workers).await
                }
            };
        }
        self.run_unit(ctx, !policy.force, policy.donetest).await
    }

    /// Gates, execution, post-check for a step without fan-out
    pub(crate) async fn run_unit(
        &mut self,
        ctx: &RunContext<'_>,
        precheck: bool,
        donetest: DonetestPolicy,
    ) -> Result<(), PipelineError> {
        let prepared = self.prepare(ctx.registry, precheck);
        ctx.checkpoint.checkpoint(self).await?;
        if !prepared? {
            return Ok(());
        }
        self.execute_unit(ctx, donetest).await
    }

    /// Execution and post-check, once the gates have passed
    pub(crate) async fn execute_unit(
        &mut self,
        ctx: &RunContext<'_>,
        donetest: DonetestPolicy,
    ) -> Result<(), PipelineError> {
        info!("Running step: {}", self.name);
        let result = self.invocation()?.execute(ctx.registry.clone()).await;
        let applied = self.apply_result(result);
        ctx.checkpoint.checkpoint(self).await?;
        applied?;

        let verified = self.verify(ctx.registry, donetest);
        ctx.checkpoint.checkpoint(self).await?;
        verified?;

        info!("Step {} completed successfully", self.name);
        Ok(())
    }

    /// Pretest, then the donetest pre-check. `Ok(false)` means the step is
    /// already done and must not execute.
    pub(crate) fn prepare(&mut self, registry: &Registry, precheck: bool) -> Result<bool, PipelineError> {
        self.last_result = None;
        if self.pretest.is_ready() {
            if let Err(e) = self.run_pretest(registry, true) {
                self.done = false;
                return Err(e);
            }
        }
        if precheck && self.donetest.is_ready() && self.precheck_done(registry) {
            info!("Step {} already done, skipping", self.name);
            return Ok(false);
        }
        Ok(true)
    }

    /// Overwrite run-state from an execution result
    pub(crate) fn apply_result(&mut self, result: ExecutionResult) -> Result<(), PipelineError> {
        let outcome = if result.succeeded {
            Ok(())
        } else {
            error!("Step {} failed", self.name);
            Err(PipelineError::ExecutionFailure {
                step: self.name.clone(),
                kind: self.unit.kind(),
                exit_code: result.exit_code,
                details: result.diagnostics(),
            })
        };
        self.done = result.succeeded;
        self.failed = !result.succeeded;
        self.failed_donetest = false;
        self.last_result = Some(result);
        outcome
    }

    /// Post-execution donetest, if one is ready
    pub(crate) fn verify(&mut self, registry: &Registry, policy: DonetestPolicy) -> Result<(), PipelineError> {
        if !self.donetest.is_ready() {
            return Ok(());
        }
        self.run_donetest(registry, policy == DonetestPolicy::Fail, true)
            .map(|_| ())
    }

    /// Evaluate the pretest and record the outcome in `failed_pretest`
    pub fn run_pretest(&mut self, registry: &Registry, raise: bool) -> Result<bool, PipelineError> {
        let reason = match self.pretest.evaluate(registry) {
            Ok(true) => {
                self.failed_pretest = false;
                return Ok(true);
            }
            Ok(false) => format!("{} returned failure", self.pretest),
            Err(e) => format!("{} raised: {}", self.pretest, e),
        };
        self.failed_pretest = true;
        warn!("Pretest of {} failed: {}", self.name, reason);
        if raise {
            Err(PipelineError::GateFailure {
                step: self.name.clone(),
                gate: Gate::Pretest,
                reason,
            })
        } else {
            Ok(false)
        }
    }

    /// Evaluate the donetest. Passing marks the step done; failing marks it
    /// not done, sets `failed_donetest`, and with `fail_step` also `failed`.
    pub fn run_donetest(
        &mut self,
        registry: &Registry,
        fail_step: bool,
        raise: bool,
    ) -> Result<bool, PipelineError> {
        let reason = match self.donetest.evaluate(registry) {
            Ok(true) => {
                self.done = true;
                self.failed = false;
                self.failed_donetest = false;
                return Ok(true);
            }
            Ok(false) => format!("{} returned failure", self.donetest),
            Err(e) => format!("{} raised: {}", self.donetest, e),
        };
        self.done = false;
        if fail_step {
            self.failed = true;
        }
        self.failed_donetest = true;
        warn!("Donetest of {} failed: {}", self.name, reason);
        if raise {
            Err(PipelineError::GateFailure {
                step: self.name.clone(),
                gate: Gate::Donetest,
                reason,
            })
        } else {
            Ok(false)
        }
    }

    /// Donetest before execution: passing marks the step done, failing only
    /// means it still has to run
    pub fn precheck_done(&mut self, registry: &Registry) -> bool {
        match self.donetest.evaluate(registry) {
            Ok(true) => {
                self.done = true;
                self.failed = false;
                self.failed_donetest = false;
                true
            }
            Ok(false) => {
                self.done = false;
                false
            }
            Err(e) => {
                debug!("Donetest pre-check of {} raised: {}", self.name, e);
                self.done = false;
                false
            }
        }
    }

    /// Set the comment. Returns false when a comment exists and `mode` is
    /// `CommentMode::New`.
    pub fn add_comment(&mut self, text: &str, mode: CommentMode) -> bool {
        match (&mut self.comment, mode) {
            (Some(existing), CommentMode::Append) if !existing.is_empty() => {
                existing.push('\n');
                existing.push_str(text);
                true
            }
            (Some(existing), CommentMode::New) if !existing.is_empty() => {
                error!(
                    "{} already has a comment, overwrite or append to replace it",
                    self.name
                );
                false
            }
            _ => {
                self.comment = Some(text.to_string());
                true
            }
        }
    }

    pub fn del_comment(&mut self) {
        self.comment = None;
    }
}
