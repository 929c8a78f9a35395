//! CLI argument definitions using Clap

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Moonshine Flow - installer, self-repair and permission doctor for the
/// dictation daemon
#[derive(Parser, Debug)]
#[command(name = "moonshine-flow")]
#[command(version)]
#[command(about = "Install, repair and diagnose the Moonshine Flow macOS daemon")]
#[command(long_about = None)]
pub struct Cli {
    /// Use another config file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the daemon from a repaired runtime
    #[command(visible_alias = "r")]
    Run(RunOptions),

    /// Print environment, permission and registration diagnostics
    #[command(visible_alias = "dr")]
    Doctor(DoctorOptions),

    /// Show privacy permission states for this executable
    #[command(visible_alias = "perms")]
    CheckPermissions {
        /// Prompt for permissions that are not granted
        #[arg(long)]
        request: bool,
    },

    /// Install the app bundle and the login launch agent
    #[command(visible_alias = "install")]
    InstallLaunchAgent(InstallOptions),

    /// Reload the launch agent
    #[command(visible_alias = "restart")]
    RestartLaunchAgent,

    /// Unload and remove the launch agent
    #[command(visible_alias = "uninstall")]
    UninstallLaunchAgent,

    /// Build and sign the app bundle only
    #[command(visible_alias = "bundle")]
    InstallAppBundle(BundleOptions),

    /// Remove the app bundle and its manifest
    #[command(visible_alias = "unbundle")]
    UninstallAppBundle,

    /// Manage configuration
    #[command(visible_alias = "cfg")]
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct RunOptions {
    /// Stream runtime rebuild output
    #[arg(long)]
    pub verbose_bootstrap: bool,

    /// Extra arguments passed to the daemon
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct DoctorOptions {
    /// Also check permissions in the launchd login context
    #[arg(long)]
    pub launchd_check: bool,

    /// Emit the report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Clone, Default)]
pub struct InstallOptions {
    /// Install even if the login context lacks permissions
    #[arg(long)]
    pub allow_missing_permissions: bool,

    /// Check permissions without prompting
    #[arg(long)]
    pub no_request_permissions: bool,

    /// Stream runtime rebuild output
    #[arg(long)]
    pub verbose_bootstrap: bool,

    /// Skip the app bundle and launch this binary directly
    #[arg(long)]
    pub no_app_bundle: bool,
}

#[derive(Args, Debug, Clone, Default)]
pub struct BundleOptions {
    /// Stream runtime rebuild output
    #[arg(long)]
    pub verbose_bootstrap: bool,
}

/// Config action subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Create config file with defaults
    Init,
    /// List effective config values
    List,
    /// Show config file path
    Path,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn aliases_resolve_to_commands() {
        let cli = Cli::parse_from(["moonshine-flow", "dr", "--launchd-check"]);
        assert!(matches!(
            cli.command,
            Commands::Doctor(DoctorOptions {
                launchd_check: true,
                json: false
            })
        ));

        let cli = Cli::parse_from(["moonshine-flow", "perms", "--request"]);
        assert!(matches!(cli.command, Commands::CheckPermissions { request: true }));

        let cli = Cli::parse_from(["moonshine-flow", "bundle", "--verbose-bootstrap"]);
        assert!(matches!(
            cli.command,
            Commands::InstallAppBundle(BundleOptions {
                verbose_bootstrap: true
            })
        ));

        let cli = Cli::parse_from(["moonshine-flow", "unbundle"]);
        assert!(matches!(cli.command, Commands::UninstallAppBundle));

        let cli = Cli::parse_from(["moonshine-flow", "cfg", "path"]);
        assert!(matches!(
            cli.command,
            Commands::Config {
                action: ConfigAction::Path
            }
        ));
    }

    #[test]
    fn install_flags() {
        let cli = Cli::parse_from([
            "moonshine-flow",
            "install",
            "--allow-missing-permissions",
            "--no-request-permissions",
            "--no-app-bundle",
        ]);
        match cli.command {
            Commands::InstallLaunchAgent(opts) => {
                assert!(opts.allow_missing_permissions);
                assert!(opts.no_request_permissions);
                assert!(opts.no_app_bundle);
                assert!(!opts.verbose_bootstrap);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::parse_from(["moonshine-flow", "restart", "--verbose", "--config", "/tmp/c.toml"]);
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.toml")));
        assert!(matches!(cli.command, Commands::RestartLaunchAgent));
    }

    #[test]
    fn run_forwards_daemon_args() {
        let cli = Cli::parse_from(["moonshine-flow", "r", "--", "--model", "tiny"]);
        match cli.command {
            Commands::Run(opts) => assert_eq!(opts.args, vec!["--model", "tiny"]),
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
