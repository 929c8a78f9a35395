//! Application configuration value object

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::bundle::APP_BUNDLE_NAME;
use crate::domain::launch_agent::LAUNCH_AGENT_LABEL;
use crate::domain::runtime::{BootstrapConfig, DEFAULT_DAEMON_MODULE, DEFAULT_LIBRARY_NAME};

const DEFAULT_SUBPROCESS_TIMEOUT_SECS: u64 = 120;
const DEFAULT_REPAIR_TIMEOUT_SECS: u64 = 900;

/// Filesystem locations managed by the installer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathsConfig {
    pub bundle_path: Option<PathBuf>,
    pub launch_agents_dir: Option<PathBuf>,
    pub state_dir: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
}

/// Where the daemon runtime and its toolchain live.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub project_dir: Option<PathBuf>,
    pub state_dir: Option<PathBuf>,
    pub python: Option<PathBuf>,
    pub uv: Option<PathBuf>,
    pub daemon_module: Option<String>,
    pub library_name: Option<String>,
    /// Executable copied into the app bundle (defaults to this binary)
    pub source_executable: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchdConfig {
    pub label: Option<String>,
}

/// Application configuration.
/// All fields are optional to support partial configs and merging.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    pub subprocess_timeout_secs: Option<u64>,
    pub repair_timeout_secs: Option<u64>,
    pub paths: Option<PathsConfig>,
    pub runtime: Option<RuntimeConfig>,
    pub launchd: Option<LaunchdConfig>,
}

fn home() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"))
}

impl AppConfig {
    /// Create config with default values
    pub fn defaults() -> Self {
        let home = home();
        Self {
            subprocess_timeout_secs: Some(DEFAULT_SUBPROCESS_TIMEOUT_SECS),
            repair_timeout_secs: Some(DEFAULT_REPAIR_TIMEOUT_SECS),
            paths: Some(PathsConfig {
                bundle_path: Some(home.join("Applications").join(APP_BUNDLE_NAME)),
                launch_agents_dir: Some(home.join("Library").join("LaunchAgents")),
                state_dir: Some(
                    dirs::data_dir()
                        .unwrap_or_else(|| home.join(".local").join("share"))
                        .join("moonshine-flow"),
                ),
                log_dir: Some(home.join("Library").join("Logs").join("moonshine-flow")),
            }),
            runtime: None,
            launchd: Some(LaunchdConfig {
                label: Some(LAUNCH_AGENT_LABEL.to_string()),
            }),
        }
    }

    /// Create an empty config (all None)
    pub fn empty() -> Self {
        Self::default()
    }

    /// Merge this config with another, where other takes precedence.
    /// Only non-None values from other will override this.
    pub fn merge(self, other: Self) -> Self {
        Self {
            subprocess_timeout_secs: other.subprocess_timeout_secs.or(self.subprocess_timeout_secs),
            repair_timeout_secs: other.repair_timeout_secs.or(self.repair_timeout_secs),
            paths: merge_section(self.paths, other.paths, |b, o| PathsConfig {
                bundle_path: o.bundle_path.or(b.bundle_path),
                launch_agents_dir: o.launch_agents_dir.or(b.launch_agents_dir),
                state_dir: o.state_dir.or(b.state_dir),
                log_dir: o.log_dir.or(b.log_dir),
            }),
            runtime: merge_section(self.runtime, other.runtime, |b, o| RuntimeConfig {
                project_dir: o.project_dir.or(b.project_dir),
                state_dir: o.state_dir.or(b.state_dir),
                python: o.python.or(b.python),
                uv: o.uv.or(b.uv),
                daemon_module: o.daemon_module.or(b.daemon_module),
                library_name: o.library_name.or(b.library_name),
                source_executable: o.source_executable.or(b.source_executable),
            }),
            launchd: merge_section(self.launchd, other.launchd, |b, o| LaunchdConfig {
                label: o.label.or(b.label),
            }),
        }
    }

    /// Configured path, or the matching entry from `defaults()`.
    fn path_or_default(&self, pick: fn(&PathsConfig) -> Option<&PathBuf>) -> PathBuf {
        if let Some(path) = self.paths.as_ref().and_then(pick) {
            return path.clone();
        }
        let defaults = Self::defaults().paths.unwrap_or_default();
        pick(&defaults).cloned().unwrap_or_default()
    }

    pub fn bundle_path_or_default(&self) -> PathBuf {
        self.path_or_default(|p| p.bundle_path.as_ref())
    }

    pub fn launch_agents_dir_or_default(&self) -> PathBuf {
        self.path_or_default(|p| p.launch_agents_dir.as_ref())
    }

    /// Installer state root (manifest, lock, PID file).
    pub fn state_dir_or_default(&self) -> PathBuf {
        self.path_or_default(|p| p.state_dir.as_ref())
    }

    pub fn log_dir_or_default(&self) -> PathBuf {
        self.path_or_default(|p| p.log_dir.as_ref())
    }

    pub fn label_or_default(&self) -> &str {
        self.launchd
            .as_ref()
            .and_then(|l| l.label.as_deref())
            .unwrap_or(LAUNCH_AGENT_LABEL)
    }

    pub fn subprocess_timeout(&self) -> Duration {
        Duration::from_secs(
            self.subprocess_timeout_secs
                .unwrap_or(DEFAULT_SUBPROCESS_TIMEOUT_SECS),
        )
    }

    pub fn repair_timeout(&self) -> Duration {
        Duration::from_secs(self.repair_timeout_secs.unwrap_or(DEFAULT_REPAIR_TIMEOUT_SECS))
    }

    pub fn source_executable(&self) -> Option<PathBuf> {
        self.runtime
            .as_ref()
            .and_then(|r| r.source_executable.clone())
    }

    /// Runtime state root, versioned so that upgrades never reuse a
    /// runtime built for another release.
    pub fn runtime_state_dir_or_default(&self) -> PathBuf {
        self.runtime
            .as_ref()
            .and_then(|r| r.state_dir.clone())
            .unwrap_or_else(|| {
                self.state_dir_or_default()
                    .join("runtime")
                    .join(env!("CARGO_PKG_VERSION"))
            })
    }

    /// Bootstrap config for the daemon runtime, when the runtime section
    /// names a project and a toolchain.
    pub fn bootstrap_config(&self) -> Option<BootstrapConfig> {
        let runtime = self.runtime.as_ref()?;
        Some(BootstrapConfig {
            project_dir: runtime.project_dir.clone()?,
            state_dir: self.runtime_state_dir_or_default(),
            python: runtime.python.clone()?,
            uv: runtime.uv.clone()?,
            daemon_module: runtime
                .daemon_module
                .clone()
                .unwrap_or_else(|| DEFAULT_DAEMON_MODULE.to_string()),
            library_name: runtime
                .library_name
                .clone()
                .unwrap_or_else(|| DEFAULT_LIBRARY_NAME.to_string()),
        })
    }
}

fn merge_section<T>(base: Option<T>, other: Option<T>, both: impl FnOnce(T, T) -> T) -> Option<T> {
    match (base, other) {
        (None, None) => None,
        (Some(b), None) => Some(b),
        (None, Some(o)) => Some(o),
        (Some(b), Some(o)) => Some(both(b, o)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runtime(project: &str, python: &str, uv: &str) -> RuntimeConfig {
        RuntimeConfig {
            project_dir: Some(PathBuf::from(project)),
            python: Some(PathBuf::from(python)),
            uv: Some(PathBuf::from(uv)),
            ..Default::default()
        }
    }

    #[test]
    fn defaults_have_expected_values() {
        let config = AppConfig::defaults();
        assert!(config.runtime.is_none());
        assert_eq!(config.label_or_default(), LAUNCH_AGENT_LABEL);
        assert!(config
            .bundle_path_or_default()
            .ends_with("Applications/MoonshineFlow.app"));
        assert!(config
            .launch_agents_dir_or_default()
            .ends_with("Library/LaunchAgents"));
        assert_eq!(config.subprocess_timeout(), Duration::from_secs(120));
    }

    #[test]
    fn empty_config_falls_back_to_default_paths() {
        let config = AppConfig::empty();
        assert_eq!(
            config.bundle_path_or_default(),
            AppConfig::defaults().bundle_path_or_default()
        );
        assert_eq!(config.repair_timeout(), Duration::from_secs(900));
        assert!(config.bootstrap_config().is_none());
    }

    #[test]
    fn merge_other_takes_precedence() {
        let base = AppConfig {
            subprocess_timeout_secs: Some(10),
            runtime: Some(runtime("/base", "/base/python", "/base/uv")),
            ..Default::default()
        };
        let other = AppConfig {
            runtime: Some(RuntimeConfig {
                python: Some(PathBuf::from("/other/python")),
                ..Default::default()
            }),
            ..Default::default()
        };

        let merged = base.merge(other);
        let rt = merged.runtime.as_ref().unwrap();
        assert_eq!(merged.subprocess_timeout_secs, Some(10));
        assert_eq!(rt.python, Some(PathBuf::from("/other/python")));
        assert_eq!(rt.uv, Some(PathBuf::from("/base/uv")));
    }

    #[test]
    fn bootstrap_config_requires_project_and_toolchain() {
        let partial = AppConfig {
            runtime: Some(RuntimeConfig {
                project_dir: Some(PathBuf::from("/libexec")),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(partial.bootstrap_config().is_none());

        let full = AppConfig {
            runtime: Some(runtime("/libexec", "/py", "/uv")),
            ..Default::default()
        };
        let bootstrap = full.bootstrap_config().unwrap();
        assert_eq!(bootstrap.project_dir, PathBuf::from("/libexec"));
        assert_eq!(bootstrap.daemon_module, DEFAULT_DAEMON_MODULE);
        assert!(bootstrap
            .state_dir
            .ends_with(format!("runtime/{}", env!("CARGO_PKG_VERSION"))));
    }

    #[test]
    fn runtime_state_dir_override_wins() {
        let config = AppConfig {
            runtime: Some(RuntimeConfig {
                state_dir: Some(PathBuf::from("/opt/homebrew/var/moonshine-flow")),
                ..runtime("/libexec", "/py", "/uv")
            }),
            ..Default::default()
        };
        assert_eq!(
            config.bootstrap_config().unwrap().state_dir,
            PathBuf::from("/opt/homebrew/var/moonshine-flow")
        );
    }

    #[test]
    fn toml_round_trip_keeps_sections() {
        let config = AppConfig {
            runtime: Some(runtime("/libexec", "/py", "/uv")),
            ..AppConfig::defaults()
        };
        let text = toml::to_string_pretty(&config).unwrap();
        assert!(text.contains("[runtime]"));
        let parsed: AppConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }
}
