//! Privacy permission oracles

#[cfg(target_os = "macos")]
mod macos;
#[cfg(not(target_os = "macos"))]
mod unsupported;

#[cfg(target_os = "macos")]
pub use macos::MacPermissionOracle as SystemPermissionOracle;
#[cfg(not(target_os = "macos"))]
pub use unsupported::UnsupportedPermissionOracle as SystemPermissionOracle;
