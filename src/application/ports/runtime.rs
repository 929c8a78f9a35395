//! Daemon runtime port interfaces

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::arch::Arch;
use crate::domain::runtime::{ProbeResult, RuntimeCandidate};

/// Runtime build errors
#[derive(Debug, Clone, Error)]
pub enum BuildError {
    #[error("Required command is missing: {0}")]
    MissingCommand(String),

    #[error("Command failed with exit code {code:?}: {command}{}", stderr_suffix(.stderr))]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Command timed out: {0}")]
    Timeout(String),

    #[error("Runtime project is incomplete: missing {missing} under {project_dir}")]
    ProjectIncomplete { missing: String, project_dir: String },

    #[error("I/O error: {0}")]
    Io(String),
}

fn stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!("\n{}", stderr)
    }
}

/// Checks whether a runtime candidate can load the native speech library.
#[async_trait]
pub trait RuntimeProbe: Send + Sync {
    /// A missing interpreter or failed load is reported in the result,
    /// never as an error.
    async fn probe(&self, candidate: &RuntimeCandidate, library_name: &str) -> ProbeResult;
}

/// Builds an isolated runtime directory with a toolchain.
#[async_trait]
pub trait RuntimeBuilder: Send + Sync {
    /// Recreate `candidate.venv_dir` from scratch, sync dependencies and
    /// record the fingerprint it was built from.
    async fn rebuild(&self, candidate: &RuntimeCandidate, project_dir: &Path) -> Result<(), BuildError>;

    /// Whether the recorded fingerprint for `candidate` no longer matches
    /// the project's dependency files and toolchain.
    async fn is_stale(&self, candidate: &RuntimeCandidate, project_dir: &Path) -> bool;
}

/// Host facts the repair engine depends on.
#[async_trait]
pub trait HostInspector: Send + Sync {
    /// Native architecture of the machine (not of this process).
    async fn os_arch(&self) -> Arch;

    /// Architecture an interpreter binary runs as.
    async fn interpreter_arch(&self, python: &Path) -> Arch;

    /// Whether `path` exists and is executable.
    fn is_executable(&self, path: &Path) -> bool;
}
