//! External process execution

use crate::core::error::ConstructionError;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

/// What a finished shell command reported
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub exit_code: Option<i32>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Absolute path of an executable, searched on `PATH` unless `name`
/// already contains a path separator
pub fn resolve(name: &str) -> Result<PathBuf, ConstructionError> {
    which::which(name).map_err(|e| {
        debug!("'{}' not found: {}", name, e);
        ConstructionError::Path(name.to_string())
    })
}

/// Run `command_line` through `sh -c`.
///
/// With `capture` set, stdout and stderr are collected with one trailing
/// newline removed; otherwise they are inherited and only the exit code is
/// observed.
pub async fn run_shell(command_line: &str, capture: bool) -> std::io::Result<ProcessOutput> {
    debug!("Running: {}", command_line);

    let mut command = Command::new("sh");
    command.arg("-c").arg(command_line).kill_on_drop(true);

    if !capture {
        let status = command
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await?;
        return Ok(ProcessOutput {
            exit_code: status.code(),
            stdout: None,
            stderr: None,
        });
    }

    let output = command.stdin(Stdio::null()).output().await?;
    let exit_code = output.status.code();
    if exit_code != Some(0) {
        warn!("'{}' exited with {:?}", command_line, exit_code);
    }

    Ok(ProcessOutput {
        exit_code,
        stdout: Some(trim_newline(String::from_utf8_lossy(&output.stdout).into_owned())),
        stderr: Some(trim_newline(String::from_utf8_lossy(&output.stderr).into_owned())),
    })
}

fn trim_newline(mut text: String) -> String {
    if text.ends_with('\n') {
        text.pop();
        if text.ends_with('\r') {
            text.pop();
        }
    }
    text
}
