//! Daemon runtime adapters

mod host;
mod probe;
mod uv_builder;

pub use host::SystemHostInspector;
pub use probe::PythonRuntimeProbe;
pub use uv_builder::UvRuntimeBuilder;
