//! Moonshine Flow - installer, runtime self-repair and permission doctor
//! for the Moonshine Flow dictation daemon on macOS
//!
//! # Architecture
//!
//! The crate follows hexagonal (ports & adapters) architecture:
//!
//! - **Domain**: Value types and pure logic (architectures, permissions,
//!   bundle manifests, launch agent plists, repair states)
//! - **Application**: Use cases and port interfaces (traits)
//! - **Infrastructure**: Adapter implementations (codesign, launchctl,
//!   TCC oracle, python runtime probe and builder)
//! - **CLI**: Command-line interface, argument parsing and signal handling

pub mod application;
pub mod cli;
pub mod domain;
pub mod infrastructure;
