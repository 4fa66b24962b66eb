//! Pipeline container
//!
//! Owns steps in insertion order and persists a full snapshot after every
//! mutation, including every transition of a running step.

use crate::core::error::{ConstructionError, PipelineError};
use crate::core::registry::Registry;
use crate::core::step::{
    Checkpoint, CommentMode, RunContext, RunPolicy, Step, StepDefinition, Strategy,
};
use crate::persistence::{Snapshot, SnapshotStore};
use chrono::Utc;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Name that `run` resolves to the current step
pub const CURRENT: &str = "current";

/// Options for `Pipeline::run_all`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunAllOptions {
    /// Trust stored `done` flags instead of re-running donetests first
    pub skip_pre_donecheck: bool,
    /// Run every step regardless of state
    pub force: bool,
}

/// Options for `Pipeline::check`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckPolicy {
    /// Mark the step failed when its donetest fails
    pub fail_on_error: bool,
    /// Return the gate failure instead of `Ok(false)`
    pub raise_on_error: bool,
}

/// An ordered, persisted collection of steps
pub struct Pipeline {
    id: Uuid,
    name: String,
    root: PathBuf,
    order: Vec<String>,
    steps: HashMap<String, Step>,
    registry: Arc<Registry>,
    store: Arc<dyn SnapshotStore>,
}

impl Pipeline {
    /// Restore the named pipeline from `store`, or create and save a new one
    pub async fn open(
        name: impl Into<String>,
        root: impl Into<PathBuf>,
        registry: impl Into<Arc<Registry>>,
        store: Arc<dyn SnapshotStore>,
    ) -> Result<Self, PipelineError> {
        let name = name.into();
        let registry = registry.into();

        if let Some(snapshot) = store.load(&name).await? {
            info!(
                "Restored pipeline '{}' with {} step(s)",
                snapshot.name,
                snapshot.steps.len()
            );
            return Ok(Self::from_snapshot(snapshot, registry, store));
        }

        let pipeline = Pipeline {
            id: Uuid::new_v4(),
            name,
            root: root.into(),
            order: Vec::new(),
            steps: HashMap::new(),
            registry,
            store,
        };
        info!("Created pipeline '{}'", pipeline.name);
        pipeline.save().await?;
        Ok(pipeline)
    }

    fn from_snapshot(snapshot: Snapshot, registry: Arc<Registry>, store: Arc<dyn SnapshotStore>) -> Self {
        let order = snapshot.steps.iter().map(|s| s.name.clone()).collect();
        let steps = snapshot
            .steps
            .into_iter()
            .map(|s| (s.name.clone(), s))
            .collect();
        Pipeline {
            id: snapshot.id,
            name: snapshot.name,
            root: snapshot.root,
            order,
            steps,
            registry,
            store,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.steps.contains_key(name)
    }

    pub fn step(&self, name: &str) -> Option<&Step> {
        self.steps.get(name)
    }

    /// Step names in order
    pub fn order(&self) -> &[String] {
        &self.order
    }

    /// Steps in order
    pub fn steps(&self) -> impl Iterator<Item = &Step> {
        self.order.iter().filter_map(|name| self.steps.get(name))
    }

    /// First step that is not done, or failed
    pub fn current(&self) -> Option<&str> {
        self.steps()
            .find(|s| !s.done || s.failed)
            .map(|s| s.name.as_str())
    }

    /// Snapshot of the whole pipeline
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            id: self.id,
            name: self.name.clone(),
            root: self.root.clone(),
            steps: self.steps().cloned().collect(),
            saved_at: Utc::now(),
        }
    }

    pub async fn save(&self) -> Result<(), PipelineError> {
        self.store.save(&self.snapshot()).await?;
        debug!("Saved pipeline '{}'", self.name);
        Ok(())
    }

    /// Add a step. Fails on a duplicate name, never overwrites.
    pub async fn add(&mut self, definition: StepDefinition) -> Result<(), PipelineError> {
        if self.steps.contains_key(&definition.name) {
            return Err(ConstructionError::DuplicateName(definition.name).into());
        }
        let step = Step::from_definition(definition, &self.registry)?;
        for dependency in &step.depends {
            if !self.steps.contains_key(dependency) {
                warn!("{} depends on {}, which is not a step yet", step.name, dependency);
            }
        }
        info!("Added step {}", step.name);
        self.order.push(step.name.clone());
        self.steps.insert(step.name.clone(), step);
        self.save().await
    }

    /// Delete a step. An unknown name is only logged.
    pub async fn delete(&mut self, name: &str) -> Result<(), PipelineError> {
        if self.steps.remove(name).is_none() {
            warn!("{} is not a step, not deleting", name);
            return Ok(());
        }
        self.order.retain(|n| n != name);
        info!("Deleted step {}", name);
        self.save().await
    }

    /// Run one step by name, or the current step for `"current"`
    pub async fn run(&mut self, name: &str) -> Result<(), PipelineError> {
        if name == CURRENT {
            return self.run_current().await;
        }
        self.run_step(name, RunPolicy::default()).await
    }

    /// Run the first step that is not done, or failed. A no-op when every
    /// step is done.
    pub async fn run_current(&mut self) -> Result<(), PipelineError> {
        if self.order.is_empty() {
            warn!("No steps added yet, not running");
            return Ok(());
        }
        let Some(current) = self.current().map(str::to_string) else {
            warn!("All steps already complete, not running");
            return Ok(());
        };
        self.run_step(&current, RunPolicy::default()).await
    }

    /// Run a fan-out step on a pool of `workers` (all cores when `None`)
    pub async fn run_parallel(&mut self, name: &str, workers: Option<usize>) -> Result<(), PipelineError> {
        let policy = RunPolicy {
            strategy: Some(Strategy::Parallel { workers }),
            ..RunPolicy::default()
        };
        self.run_step(name, policy).await
    }

    /// Run every step in order, stopping at the first failure
    pub async fn run_all(&mut self, options: RunAllOptions) -> Result<(), PipelineError> {
        self.save().await?;
        for name in self.order.clone() {
            let registry = &self.registry;
            let Some(step) = self.steps.get_mut(&name) else {
                continue;
            };
            let mut done = step.done;
            if !options.skip_pre_donecheck && !options.force && step.donetest.is_ready() {
                done = step.precheck_done(registry);
            }
            if done && !options.force {
                debug!("Step {} is done, skipping", name);
                continue;
            }
            let policy = RunPolicy {
                force: options.force,
                ..RunPolicy::default()
            };
            self.run_step(&name, policy).await?;
        }
        self.save().await
    }

    /// Run a step with an explicit policy
    pub async fn run_step(&mut self, name: &str, policy: RunPolicy) -> Result<(), PipelineError> {
        let mut step = self
            .steps
            .remove(name)
            .ok_or_else(|| PipelineError::UnknownStep(name.to_string()))?;

        let outcome = {
            let checkpoint = PipelineCheckpoint {
                pipeline: self,
                slot: name,
            };
            let ctx = RunContext {
                registry: &self.registry,
                root: &self.root,
                checkpoint: &checkpoint,
            };
            step.run(&ctx, policy).await
        };
        self.steps.insert(name.to_string(), step);

        if let Err(e) = &outcome {
            error!("Step {} failed! {}", name, e);
        }
        self.save().await?;
        outcome
    }

    /// Run the donetest of a step and mark it done when it passes
    pub async fn check(&mut self, name: &str, policy: CheckPolicy) -> Result<bool, PipelineError> {
        let registry = &self.registry;
        let step = self
            .steps
            .get_mut(name)
            .ok_or_else(|| PipelineError::UnknownStep(name.to_string()))?;
        if !step.donetest.is_ready() {
            warn!("{} has no donetest to check", name);
            return Ok(false);
        }
        let outcome = step.run_donetest(registry, policy.fail_on_error, policy.raise_on_error);
        self.save().await?;
        outcome
    }

    /// `check` every step that has a donetest; returns how many passed
    pub async fn check_all(&mut self, policy: CheckPolicy) -> Result<usize, PipelineError> {
        let mut passed = 0;
        for name in self.order.clone() {
            let ready = self.steps.get(&name).is_some_and(|s| s.donetest.is_ready());
            if ready && self.check(&name, policy).await? {
                passed += 1;
            }
        }
        Ok(passed)
    }

    pub async fn add_comment(&mut self, name: &str, text: &str, mode: CommentMode) -> Result<bool, PipelineError> {
        let step = self
            .steps
            .get_mut(name)
            .ok_or_else(|| PipelineError::UnknownStep(name.to_string()))?;
        let added = step.add_comment(text, mode);
        self.save().await?;
        Ok(added)
    }

    pub async fn del_comment(&mut self, name: &str) -> Result<(), PipelineError> {
        let step = self
            .steps
            .get_mut(name)
            .ok_or_else(|| PipelineError::UnknownStep(name.to_string()))?;
        step.del_comment();
        self.save().await
    }
}

/// Saves the pipeline with a running step, which is out of the step map
/// while it runs, put back in its slot
struct PipelineCheckpoint<'a> {
    pipeline: &'a Pipeline,
    slot: &'a str,
}

#[async_trait::async_trait]
impl Checkpoint for PipelineCheckpoint<'_> {
    async fn checkpoint(&self, step: &Step) -> Result<(), PipelineError> {
        let pipeline = self.pipeline;
        let steps = pipeline
            .order
            .iter()
            .filter_map(|name| {
                if name == self.slot {
                    Some(step.clone())
                } else {
                    pipeline.steps.get(name).cloned()
                }
            })
            .collect();
        let snapshot = Snapshot {
            id: pipeline.id,
            name: pipeline.name.clone(),
            root: pipeline.root.clone(),
            steps,
            saved_at: Utc::now(),
        };
        pipeline.store.save(&snapshot).await?;
        Ok(())
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("root", &self.root)
            .field("steps", &self.order.len())
            .field("done", &self.steps.values().filter(|s| s.done).count())
            .field("failed", &self.steps.values().filter(|s| s.failed).count())
            .finish()
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Pipeline:")?;
        if self.order.is_empty() {
            return write!(f, "No steps assigned");
        }
        let width = self.order.iter().map(String::len).max().unwrap_or(0) + 4;
        writeln!(f, "{:<7}{:<width$}Status", "Step", "Name", width = width)?;
        for (index, step) in self.steps().enumerate() {
            writeln!(
                f,
                "{:<7}{:<width$}{}",
                index,
                step.name,
                step.status(),
                width = width
            )?;
        }
        Ok(())
    }
}
