//! Runs external collaborators (`aws`, `git`) with discrete argument vectors.

use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, error};

use crate::error::StoreError;

/// Captured result of a command that exited successfully.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runs `program` with `args` and extra environment `envs`. The arguments are
/// passed as-is; nothing goes through a shell. Values in `envs` are never logged.
pub async fn run(
    program: &str,
    operation: &'static str,
    args: &[String],
    envs: &[(&str, &str)],
) -> Result<CommandOutput, StoreError> {
    debug!(program, operation, ?args, "Running external command");

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    for (name, value) in envs {
        command.env(name, value);
    }

    let output = command.output().await.map_err(|e| {
        error!(error = ?e, program, operation, "Failed to launch external command");
        StoreError::Spawn {
            program: program.to_string(),
            source: e,
        }
    })?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if output.status.success() {
        Ok(CommandOutput { stdout, stderr })
    } else {
        Err(StoreError::Command {
            operation,
            status: output.status.code(),
            stderr: stderr.trim().to_string(),
        })
    }
}
