//! CLI layer - Command-line interface
//!
//! Contains argument parsing, output formatting, signal handling,
//! adapter wiring and one handler module per command.

pub mod app;
pub mod args;
pub mod bundle_cmd;
pub mod config_cmd;
pub mod doctor_cmd;
pub mod launch_agent_cmd;
pub mod logging;
pub mod permissions_cmd;
pub mod pid_file;
pub mod presenter;
pub mod run_cmd;
pub mod signals;

// Re-export commonly used types
pub use app::{run, AppContext};
pub use args::{Cli, Commands, ConfigAction};
pub use presenter::Presenter;
