//! Infrastructure layer - Adapter implementations
//!
//! Contains concrete implementations of the port interfaces, integrating
//! with launchctl, codesign, the TCC privacy database and the daemon's
//! python toolchain.

pub mod config;
pub mod launchd;
pub mod permissions;
pub mod process;
pub mod runtime;
pub mod signing;

// Re-export adapters
pub use config::XdgConfigStore;
pub use launchd::{LaunchctlLoginProbe, LaunchctlService};
pub use permissions::SystemPermissionOracle;
pub use runtime::{PythonRuntimeProbe, SystemHostInspector, UvRuntimeBuilder};
pub use signing::CodesignSigner;
