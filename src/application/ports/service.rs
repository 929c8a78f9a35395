//! Service-registration (launchd) port interface

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

/// launchctl errors
#[derive(Debug, Clone, Error)]
pub enum LaunchdError {
    #[error("launchctl not found")]
    ToolNotFound,

    #[error("launchctl {operation} failed: {stderr}")]
    Failed { operation: String, stderr: String },

    #[error("launchctl {0} timed out")]
    Timeout(String),

    #[error("Failed to run launchctl: {0}")]
    Io(String),

    #[error("{kickstart}; reloading the registration also failed: {reload}")]
    RestartFailed {
        kickstart: Box<LaunchdError>,
        reload: Box<LaunchdError>,
    },
}

/// Port for the per-user login service manager.
#[async_trait]
pub trait ServiceManager: Send + Sync {
    /// Load a registration into the user's GUI domain.
    async fn bootstrap(&self, registration: &Path) -> Result<(), LaunchdError>;

    /// Unload a registration. Unloading a service that is not loaded is an error
    /// the caller may ignore.
    async fn bootout(&self, registration: &Path) -> Result<(), LaunchdError>;

    /// Kill and restart a loaded service in place.
    async fn kickstart(&self, label: &str) -> Result<(), LaunchdError>;

    /// Whether a service with this label is currently loaded.
    async fn is_loaded(&self, label: &str) -> bool;
}
