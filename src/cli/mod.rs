//! Command-line interface

pub mod commands;
pub mod output;
pub mod report;

use clap::{Parser, Subcommand};
use commands::{DeleteCommand, ListCommand, RunCommand, StatusCommand, ValidateCommand};
use std::ffi::OsString;

/// Resumable step pipelines
#[derive(Debug, Parser, Clone)]
#[command(name = "steppipe")]
#[command(version = "0.1.0")]
#[command(about = "Run resumable pipelines of shell commands gated by tests", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run a pipeline, resuming from its saved state
    Run(RunCommand),

    /// Show the saved state of a pipeline
    Status(StatusCommand),

    /// Validate a pipeline configuration
    Validate(ValidateCommand),

    /// Delete a step from a saved pipeline
    Delete(DeleteCommand),

    /// List pipelines stored in the SQLite database
    List(ListCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}
