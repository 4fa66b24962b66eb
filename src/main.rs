use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use steppipe::cli::commands::{
    DeleteCommand, ListCommand, RunCommand, StateArgs, StatusCommand, ValidateCommand,
};
use steppipe::cli::output::*;
use steppipe::cli::{report, Cli, Command};
use steppipe::core::{RunAllOptions, RunPolicy, CURRENT};
use steppipe::{JsonFileStore, Pipeline, PipelineConfig, Registry, SnapshotStore};
use tracing::{error, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.as_str().to_lowercase()));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    match &cli.command {
        Command::Run(cmd) => run_pipeline(cmd).await?,
        Command::Status(cmd) => show_status(cmd).await?,
        Command::Validate(cmd) => validate_pipeline(cmd)?,
        Command::Delete(cmd) => delete_step(cmd).await?,
        Command::List(cmd) => list_pipelines(cmd).await?,
    }

    Ok(())
}

async fn open_pipeline(file: &Path, state: &StateArgs) -> Result<(PipelineConfig, Pipeline)> {
    let config = PipelineConfig::from_file(file).context("Failed to load pipeline config")?;
    let base = file.parent().unwrap_or_else(|| Path::new("."));
    let root = if config.root.is_absolute() {
        config.root.clone()
    } else {
        base.join(&config.root)
    };

    let store = open_store(state, file, &config.name).await?;
    let mut pipeline = Pipeline::open(&config.name, root, Registry::with_builtins(), store)
        .await
        .context("Failed to open pipeline state")?;
    config
        .apply(&mut pipeline)
        .await
        .context("Failed to add configured steps")?;
    Ok((config, pipeline))
}

async fn open_store(state: &StateArgs, file: &Path, name: &str) -> Result<Arc<dyn SnapshotStore>> {
    if state.sqlite {
        return sqlite_store().await;
    }
    let path: PathBuf = state.state_path(file, name);
    Ok(Arc::new(JsonFileStore::new(path)))
}

#[cfg(feature = "sqlite")]
async fn sqlite_store() -> Result<Arc<dyn SnapshotStore>> {
    let store = steppipe::SqliteSnapshotStore::with_default_path()
        .await
        .context("Failed to open state database")?;
    Ok(Arc::new(store))
}

#[cfg(feature = "sqlite")]
async fn list_pipelines(cmd: &ListCommand) -> Result<()> {
    let store = match &cmd.database {
        Some(path) => steppipe::SqliteSnapshotStore::new(path).await,
        None => steppipe::SqliteSnapshotStore::with_default_path().await,
    }
    .context("Failed to open state database")?;

    let names = store.list_pipelines().await?;
    if names.is_empty() {
        println!("{}No stored pipelines", INFO);
    }
    for name in names {
        println!("  {}", style(name).bold());
    }
    Ok(())
}

#[cfg(not(feature = "sqlite"))]
async fn list_pipelines(_cmd: &ListCommand) -> Result<()> {
    anyhow::bail!("this build has no SQLite support")
}

#[cfg(not(feature = "sqlite"))]
async fn sqlite_store() -> Result<Arc<dyn SnapshotStore>> {
    anyhow::bail!("this build has no SQLite support")
}

async fn run_pipeline(cmd: &RunCommand) -> Result<()> {
    let (_, mut pipeline) = open_pipeline(&cmd.file, &cmd.state).await?;
    println!(
        "{}Running pipeline {} ({} steps)",
        ROCKET,
        style(pipeline.name()).bold(),
        pipeline.len()
    );

    let result = match (&cmd.step, cmd.workers) {
        (Some(step), Some(workers)) => {
            let step = resolve_step(&pipeline, step);
            pipeline.run_parallel(&step, Some(workers)).await
        }
        (Some(step), None) if cmd.force => {
            let step = resolve_step(&pipeline, step);
            pipeline.run_step(&step, RunPolicy::forced()).await
        }
        (Some(step), None) => pipeline.run(step).await,
        (None, _) => {
            pipeline
                .run_all(RunAllOptions {
                    skip_pre_donecheck: cmd.skip_donecheck,
                    force: cmd.force,
                })
                .await
        }
    };

    println!();
    for step in pipeline.steps() {
        println!("  {}", format_step_line(step));
        if let Some(excerpt) = failure_excerpt(step, 10) {
            for line in excerpt.lines() {
                println!("      {}", style(line).dim());
            }
        }
    }

    match result {
        Ok(()) => {
            println!(
                "\n{}{} completed {}",
                CHECK,
                style(pipeline.name()).bold(),
                style("successfully").green()
            );
            Ok(())
        }
        Err(e) => {
            println!(
                "\n{}{} {}",
                CROSS,
                style(pipeline.name()).bold(),
                style("failed").red()
            );
            error!("{}", e);
            std::process::exit(1);
        }
    }
}

/// `current` names the first unfinished step
fn resolve_step(pipeline: &Pipeline, step: &str) -> String {
    if step == CURRENT {
        pipeline.current().unwrap_or(CURRENT).to_string()
    } else {
        step.to_string()
    }
}

async fn show_status(cmd: &StatusCommand) -> Result<()> {
    let (_, pipeline) = open_pipeline(&cmd.file, &cmd.state).await?;
    if cmd.table {
        print!("{}", report::table(&pipeline));
    } else if cmd.outputs {
        println!("{}", report::stats(&pipeline, true));
    } else {
        println!("{}", pipeline);
        if let Some(current) = pipeline.current() {
            println!("{}Current step: {}", INFO, style(current).cyan());
        }
    }
    Ok(())
}

fn validate_pipeline(cmd: &ValidateCommand) -> Result<()> {
    println!("{}Validating pipeline...", INFO);

    match PipelineConfig::from_file(&cmd.file) {
        Ok(config) => {
            println!("{}Pipeline configuration is valid!", CHECK);
            println!("  Name: {}", style(&config.name).bold());
            println!("  Root: {}", style(config.root.display()).dim());
            println!("  Steps: {}", style(config.steps.len()).cyan());

            if cmd.json {
                let json = serde_json::to_string_pretty(&config)?;
                println!("\n{}", json);
            }
            Ok(())
        }
        Err(e) => {
            println!("{}Validation failed:", CROSS);
            println!("  {}", style(format!("{:#}", e)).red());
            std::process::exit(1);
        }
    }
}

async fn delete_step(cmd: &DeleteCommand) -> Result<()> {
    let (config, mut pipeline) = open_pipeline(&cmd.file, &cmd.state).await?;
    if !pipeline.contains(&cmd.step) {
        println!("{}{} is not a step", WARN, style(&cmd.step).yellow());
        return Ok(());
    }
    pipeline.delete(&cmd.step).await?;
    println!("{}Deleted {}", CHECK, style(&cmd.step).bold());
    if config.steps.iter().any(|s| s.name == cmd.step) {
        println!(
            "{}{} is still in {} and will be added again on the next run",
            WARN,
            cmd.step,
            cmd.file.display()
        );
    }
    Ok(())
}
