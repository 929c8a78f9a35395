//! Bounded subprocess execution
//!
//! Every external tool call goes through here: stdin is closed, the child
//! is killed when the future is dropped (Ctrl-C), and a timeout bounds the
//! wait.

use std::ffi::OsStr;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Subprocess errors
#[derive(Debug, Clone, Error)]
pub enum ProcessError {
    #[error("Command not found: {0}")]
    NotFound(String),

    #[error("{program} timed out after {secs}s")]
    Timeout { program: String, secs: u64 },

    #[error("Failed to run {program}: {message}")]
    Io { program: String, message: String },
}

/// Captured result of a finished command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    pub fn code(&self) -> Option<i32> {
        self.status.code()
    }

    /// Trimmed stderr, falling back to the exit status when empty.
    pub fn failure_detail(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.status.to_string()
        } else {
            stderr.to_string()
        }
    }
}

fn program_name(command: &Command) -> String {
    command
        .as_std()
        .get_program()
        .to_string_lossy()
        .to_string()
}

fn spawn_error(program: &str, e: std::io::Error) -> ProcessError {
    if e.kind() == std::io::ErrorKind::NotFound {
        ProcessError::NotFound(program.to_string())
    } else {
        ProcessError::Io {
            program: program.to_string(),
            message: e.to_string(),
        }
    }
}

/// Run `command` capturing stdout and stderr.
pub async fn output(mut command: Command, timeout: Duration) -> Result<CommandOutput, ProcessError> {
    let program = program_name(&command);
    debug!(command = ?command.as_std(), "running");
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = command.spawn().map_err(|e| spawn_error(&program, e))?;
    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| ProcessError::Timeout {
            program: program.clone(),
            secs: timeout.as_secs(),
        })?
        .map_err(|e| spawn_error(&program, e))?;

    Ok(CommandOutput {
        status: output.status,
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

/// Run `command` with inherited stdio.
pub async fn status(mut command: Command, timeout: Duration) -> Result<ExitStatus, ProcessError> {
    let program = program_name(&command);
    debug!(command = ?command.as_std(), "running (inherited stdio)");
    command.stdin(Stdio::null()).kill_on_drop(true);

    let mut child = command.spawn().map_err(|e| spawn_error(&program, e))?;
    tokio::time::timeout(timeout, child.wait())
        .await
        .map_err(|_| ProcessError::Timeout {
            program: program.clone(),
            secs: timeout.as_secs(),
        })?
        .map_err(|e| spawn_error(&program, e))
}

/// Human-readable command line for error messages.
pub fn display_command<I, S>(program: impl AsRef<OsStr>, args: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    std::iter::once(program.as_ref().to_string_lossy().to_string())
        .chain(args.into_iter().map(|a| a.as_ref().to_string_lossy().to_string()))
        .collect::<Vec<_>>()
        .join(" ")
}
