//! Domain layer - Core business logic
//!
//! Contains value objects and pure decision logic: architectures,
//! permissions and their health classification, bundle manifests,
//! launchd registrations and runtime repair states.
//! This layer has no dependencies on external systems.

pub mod arch;
pub mod bundle;
pub mod config;
pub mod error;
pub mod launch_agent;
pub mod permissions;
pub mod plist;
pub mod runtime;
pub mod trust;

// Re-export common types
pub use arch::Arch;
pub use bundle::{BundleArtifact, BundleLayout, BundleManifest, CodeIdentity, ContentDigest, InfoDescriptor};
pub use config::AppConfig;
pub use error::*;
pub use launch_agent::{LaunchAgentDescriptor, LaunchAgentRecord};
pub use permissions::{
    classify, Capability, ExecutionContext, GrantState, HealthStatus, InvocationKind,
    LoginEvidence, PermissionSet,
};
pub use runtime::{BootstrapConfig, ProbeResult, RepairState, RuntimeCandidate, Toolchain};
pub use trust::TrustSignal;
