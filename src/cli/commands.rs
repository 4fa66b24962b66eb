//! CLI command definitions

use clap::Args;
use std::path::{Path, PathBuf};

/// Where pipeline state is kept
#[derive(Debug, Args, Clone)]
pub struct StateArgs {
    /// JSON state file (defaults to `<name>.state.json` beside the YAML file)
    #[arg(long)]
    pub state: Option<PathBuf>,

    /// Keep state in the SQLite database under the user data directory
    #[arg(long, conflicts_with = "state")]
    pub sqlite: bool,
}

impl StateArgs {
    /// State file used when `--state` is not given
    pub fn state_path(&self, config_file: &Path, pipeline_name: &str) -> PathBuf {
        self.state.clone().unwrap_or_else(|| {
            config_file
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join(format!("{}.state.json", pipeline_name))
        })
    }
}

/// Run a pipeline
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: PathBuf,

    #[command(flatten)]
    pub state: StateArgs,

    /// Run only this step, or `current` for the first unfinished one
    #[arg(long)]
    pub step: Option<String>,

    /// Run steps even when they are already done
    #[arg(long)]
    pub force: bool,

    /// Trust saved done flags instead of re-running donetests first
    #[arg(long)]
    pub skip_donecheck: bool,

    /// Run the selected fan-out step on this many workers
    #[arg(long, requires = "step")]
    pub workers: Option<usize>,
}

/// Show pipeline state
#[derive(Debug, Args, Clone)]
pub struct StatusCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: PathBuf,

    #[command(flatten)]
    pub state: StateArgs,

    /// Print the tab-delimited table
    #[arg(long)]
    pub table: bool,

    /// Print detailed stats including captured output
    #[arg(long, conflicts_with = "table")]
    pub outputs: bool,
}

/// Validate a pipeline configuration
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: PathBuf,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Delete a step
#[derive(Debug, Args, Clone)]
pub struct DeleteCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: PathBuf,

    #[command(flatten)]
    pub state: StateArgs,

    /// Step to delete
    #[arg(long)]
    pub step: String,
}

/// List pipelines kept in the SQLite database
#[derive(Debug, Args, Clone)]
pub struct ListCommand {
    /// Database file (defaults to the one under the user data directory)
    #[arg(long)]
    pub database: Option<PathBuf>,
}
