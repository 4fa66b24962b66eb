//! Pipeline configuration from YAML

use crate::core::args::Args;
use crate::core::error::{ConstructionError, PipelineError};
use crate::core::gate::TestSpec;
use crate::core::pipeline::Pipeline;
use crate::core::step::{FanOut, StepDefinition, Strategy, Unit};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Top-level pipeline configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name, also the key its state is stored under
    pub name: String,

    /// Directory that file patterns are discovered from
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Pipeline steps, in run order
    pub steps: Vec<StepConfig>,
}

/// Step configuration as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    /// Unique step name
    pub name: String,

    /// Shell command; a single word is looked up on PATH
    #[serde(default)]
    pub command: Option<String>,

    /// Name of a registered function
    #[serde(default)]
    pub function: Option<String>,

    /// Positional list, mapping or single value
    #[serde(default)]
    pub args: Option<Value>,

    /// Record output of the unit
    #[serde(default = "default_capture")]
    pub capture: bool,

    /// Predicate name, or `[predicate, args]`
    #[serde(default)]
    pub pretest: Option<Value>,

    #[serde(default)]
    pub donetest: Option<Value>,

    #[serde(default)]
    pub depends: Vec<String>,

    /// Regex pattern or explicit list of files to fan out over
    #[serde(default)]
    pub file_list: Option<FileList>,

    /// Run substeps on a worker pool: `true` for all cores, or a worker count
    #[serde(default)]
    pub parallel: Option<Parallelism>,

    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FileList {
    Pattern(String),
    Files(Vec<PathBuf>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Parallelism {
    Enabled(bool),
    Workers(usize),
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_capture() -> bool {
    true
}

impl PipelineConfig {
    /// Load pipeline configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_yaml(&content)
    }

    /// Parse pipeline configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: PipelineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the pipeline configuration
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.name.as_str()) {
                anyhow::bail!("Duplicate step name: {}", step.name);
            }
            step.definition()
                .with_context(|| format!("Invalid step '{}'", step.name))?;
        }

        for step in &self.steps {
            for dependency in &step.depends {
                if !seen.contains(dependency.as_str()) {
                    warn!("Step '{}' depends on unknown step '{}'", step.name, dependency);
                }
            }
        }
        Ok(())
    }

    /// Add every configured step the pipeline does not have yet. Existing
    /// steps keep their stored state. Returns how many were added.
    pub async fn apply(&self, pipeline: &mut Pipeline) -> Result<usize, PipelineError> {
        let mut added = 0;
        for step in &self.steps {
            if pipeline.contains(&step.name) {
                debug!("Step {} already in pipeline, keeping its state", step.name);
                continue;
            }
            pipeline.add(step.definition()?).await?;
            added += 1;
        }
        Ok(added)
    }
}

impl StepConfig {
    /// Convert to a definition. Registry checks happen when it is added.
    pub fn definition(&self) -> Result<StepDefinition, ConstructionError> {
        let unit = match (&self.command, &self.function) {
            (Some(program), None) => Unit::Process {
                program: program.clone(),
            },
            (None, Some(function)) => Unit::Function {
                function: function.clone(),
            },
            _ => {
                return Err(ConstructionError::InvalidStep {
                    step: self.name.clone(),
                    reason: "exactly one of command or function is required".to_string(),
                })
            }
        };

        let mut definition = match unit {
            Unit::Process { program } => StepDefinition::command(&self.name, program),
            Unit::Function { function } => StepDefinition::function(&self.name, function),
        };
        definition = definition
            .args(self.args.clone().map(Args::from_value).unwrap_or_default())
            .capture(self.capture)
            .pretest(test_spec(self.pretest.as_ref())?)
            .donetest(test_spec(self.donetest.as_ref())?)
            .depends(self.depends.iter().cloned());

        definition.fan_out = self.file_list.clone().map(|list| match list {
            FileList::Pattern(pattern) => FanOut::Pattern(pattern),
            FileList::Files(files) => FanOut::Files(files),
        });
        definition.strategy = match self.parallel {
            None | Some(Parallelism::Enabled(false)) => Strategy::Serial,
            Some(Parallelism::Enabled(true)) => Strategy::Parallel { workers: None },
            Some(Parallelism::Workers(n)) => Strategy::Parallel { workers: Some(n) },
        };
        definition.comment = self.comment.clone();
        Ok(definition)
    }
}

fn test_spec(value: Option<&Value>) -> Result<TestSpec, ConstructionError> {
    match value {
        None | Some(Value::Null) => Ok(TestSpec::Absent),
        Some(value) => TestSpec::from_value(value),
    }
}
