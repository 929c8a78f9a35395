//! Application layer - Use cases and port interfaces
//!
//! Contains the installer and launcher operations and the trait
//! definitions for external system interactions.

pub mod bundle;
pub mod diagnostics;
pub mod environment;
pub mod error;
pub mod launch_agent;
pub mod permissions;
pub mod persist;
pub mod ports;
pub mod repair;

// Re-export use cases
pub use bundle::{AppBundleManager, BundleInputs, InstallOutcome};
pub use diagnostics::{DiagnosticsOptions, DiagnosticsReport, DiagnosticsReporter};
pub use environment::{EnvironmentProbe, EnvironmentReport};
pub use error::FlowError;
pub use launch_agent::{AgentInstallReport, LaunchAgentController, LaunchAgentPaths};
pub use permissions::{PermissionCheck, PermissionProbe};
pub use repair::{RepairOutcome, RuntimeRepairEngine};
