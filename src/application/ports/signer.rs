//! Code-signing port interface

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::bundle::CodeIdentity;

/// Signing tool errors
#[derive(Debug, Clone, Error)]
pub enum SigningError {
    #[error("codesign not found. Install the Xcode command line tools: xcode-select --install")]
    ToolNotFound,

    #[error("codesign failed ({status}): {stderr}")]
    Failed { status: String, stderr: String },

    #[error("codesign timed out after {0}s")]
    Timeout(u64),

    #[error("Failed to run codesign: {0}")]
    Io(String),
}

/// Port for the OS signing subsystem.
///
/// `CodeIdentity` is owned by the OS; this core only reads it, and only
/// changes it through `sign`.
#[async_trait]
pub trait CodeSigner: Send + Sync {
    /// Sign the bundle as a unit with the given identifier.
    async fn sign(&self, bundle: &Path, identifier: &str) -> Result<(), SigningError>;

    /// Current identity of the signed bundle, or `None` if unsigned or
    /// not inspectable.
    async fn identity(&self, bundle: &Path) -> Result<Option<CodeIdentity>, SigningError>;
}
