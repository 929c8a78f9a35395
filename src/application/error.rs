//! Top-level error taxonomy shared by all use cases

use std::path::PathBuf;

use thiserror::Error;

use crate::domain::error::ConfigError;
use crate::domain::permissions::Capability;

use super::ports::{LaunchdError, SigningError};

/// Errors surfaced by installer and launcher commands
#[derive(Debug, Error)]
pub enum FlowError {
    /// Interpreter and library disagree on architecture. Recoverable by repair.
    #[error("Environment mismatch: {0}")]
    EnvironmentMismatch(String),

    #[error("Runtime repair failed: {reason}\n{remediation}")]
    RepairFailed { reason: String, remediation: String },

    #[error("Code signing failed: {0}")]
    SigningFailed(#[from] SigningError),

    #[error(
        "Missing permissions for {}: {}",
        .target.display(),
        capability_list(.missing)
    )]
    PermissionIncomplete {
        missing: Vec<Capability>,
        target: PathBuf,
    },

    #[error("launchd operation failed: {0}")]
    LaunchdOperationFailed(#[from] LaunchdError),

    #[error("{0}")]
    NotConfigured(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Another install is in progress (lock held: {0})")]
    Lock(PathBuf),

    #[error("Daemon already running (PID: {0})")]
    AlreadyRunning(u32),

    #[error("Interrupted")]
    Cancelled,
}

fn capability_list(missing: &[Capability]) -> String {
    missing
        .iter()
        .map(|c| c.label())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Exit codes
pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_ERROR: u8 = 1;
pub const EXIT_USAGE_ERROR: u8 = 2;
pub const EXIT_PERMISSION_INCOMPLETE: u8 = 3;
pub const EXIT_REPAIR_FAILED: u8 = 4;
pub const EXIT_SIGNING_FAILED: u8 = 5;
pub const EXIT_LAUNCHD_FAILED: u8 = 6;
pub const EXIT_CANCELLED: u8 = 130;

impl FlowError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        FlowError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            FlowError::PermissionIncomplete { .. } => EXIT_PERMISSION_INCOMPLETE,
            FlowError::RepairFailed { .. } | FlowError::EnvironmentMismatch(_) => {
                EXIT_REPAIR_FAILED
            }
            FlowError::SigningFailed(_) => EXIT_SIGNING_FAILED,
            FlowError::LaunchdOperationFailed(_) => EXIT_LAUNCHD_FAILED,
            FlowError::Config(_) | FlowError::NotConfigured(_) => EXIT_USAGE_ERROR,
            FlowError::Cancelled => EXIT_CANCELLED,
            FlowError::Io { .. } | FlowError::Lock(_) | FlowError::AlreadyRunning(_) => EXIT_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_taxonomy() {
        let missing = FlowError::PermissionIncomplete {
            missing: vec![Capability::Accessibility],
            target: PathBuf::from("/Applications/MoonshineFlow.app/Contents/MacOS/MoonshineFlow"),
        };
        assert_eq!(missing.exit_code(), 3);
        assert_eq!(
            FlowError::RepairFailed {
                reason: "x".into(),
                remediation: "y".into()
            }
            .exit_code(),
            4
        );
        assert_eq!(FlowError::SigningFailed(SigningError::ToolNotFound).exit_code(), 5);
        assert_eq!(
            FlowError::LaunchdOperationFailed(LaunchdError::ToolNotFound).exit_code(),
            6
        );
        assert_eq!(FlowError::Cancelled.exit_code(), 130);
        assert_eq!(FlowError::Lock(PathBuf::from("/tmp/x.lock")).exit_code(), 1);
    }

    #[test]
    fn permission_message_names_target_and_capabilities() {
        let err = FlowError::PermissionIncomplete {
            missing: vec![Capability::Accessibility, Capability::Microphone],
            target: PathBuf::from("/bin/mflow"),
        };
        assert_eq!(
            err.to_string(),
            "Missing permissions for /bin/mflow: Accessibility, Microphone"
        );
    }
}
