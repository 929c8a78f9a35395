//! Privacy permission port interfaces

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::permissions::{Capability, GrantState, PermissionSet};

/// In-process view of the OS privacy database for the running executable.
#[async_trait]
pub trait PermissionOracle: Send + Sync {
    /// Grant state without prompting.
    async fn status(&self, capability: Capability) -> GrantState;

    /// Show the OS consent prompt for `capability`. Returns once the
    /// request has been issued; callers re-query `status` afterwards.
    async fn prompt(&self, capability: Capability);
}

/// Login-context probe errors
#[derive(Debug, Clone, Error)]
pub enum ProbeError {
    #[error("Failed to run login-context check: {0}")]
    Launch(String),

    #[error("Could not parse permission status from login-context check output (exit={exit_code:?})")]
    Unparseable {
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("Login-context check exited unexpectedly (exit={exit_code:?})")]
    UnexpectedExit {
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },
}

impl ProbeError {
    /// Captured (stdout, stderr) of the check, when it ran.
    pub fn captured(&self) -> Option<(&str, &str)> {
        match self {
            ProbeError::Launch(_) => None,
            ProbeError::Unparseable { stdout, stderr, .. }
            | ProbeError::UnexpectedExit { stdout, stderr, .. } => Some((stdout, stderr)),
        }
    }
}

/// Runs a permission check inside the per-user login-service context.
#[async_trait]
pub trait LoginContextProbe: Send + Sync {
    /// Run `command` (already ending in `check-permissions`, optionally
    /// followed by `--request`) as the login service would.
    async fn check(&self, command: &[String]) -> Result<PermissionSet, ProbeError>;
}
