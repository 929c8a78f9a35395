//! Port interfaces (traits) for external systems
//!
//! Every shell-out and OS query sits behind one of these narrow traits,
//! so use cases never parse raw exit codes or tool output themselves.

pub mod config;
pub mod permissions;
pub mod runtime;
pub mod service;
pub mod signer;

// Re-export common types
pub use config::ConfigStore;
pub use permissions::{LoginContextProbe, ProbeError, PermissionOracle};
pub use runtime::{BuildError, HostInspector, RuntimeBuilder, RuntimeProbe};
pub use service::{LaunchdError, ServiceManager};
pub use signer::{CodeSigner, SigningError};
