//! XDG config store adapter

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs;

use crate::application::ports::ConfigStore;
use crate::domain::config::AppConfig;
use crate::domain::error::ConfigError;

const APP_DIR: &str = "moonshine-flow";
const FILE_NAME: &str = "config.toml";

/// TOML config file under the XDG config directory
pub struct XdgConfigStore {
    path: PathBuf,
}

impl XdgConfigStore {
    /// `$XDG_CONFIG_HOME/moonshine-flow/config.toml`
    pub fn new() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join(APP_DIR);

        Self {
            path: config_dir.join(FILE_NAME),
        }
    }

    /// Create with custom path (`--config`)
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn parse_toml(content: &str) -> Result<AppConfig, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    fn to_toml(config: &AppConfig) -> Result<String, ConfigError> {
        toml::to_string_pretty(config).map_err(|e| ConfigError::WriteError(e.to_string()))
    }
}

impl Default for XdgConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConfigStore for XdgConfigStore {
    async fn load(&self) -> Result<AppConfig, ConfigError> {
        if !self.exists() {
            return Ok(AppConfig::empty());
        }

        let content = fs::read_to_string(&self.path)
            .await
            .map_err(|e| ConfigError::ReadError(e.to_string()))?;

        Self::parse_toml(&content)
    }

    async fn save(&self, config: &AppConfig) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| ConfigError::WriteError(e.to_string()))?;
        }

        let content = Self::to_toml(config)?;

        fs::write(&self.path, content)
            .await
            .map_err(|e| ConfigError::WriteError(e.to_string()))
    }

    fn path(&self) -> PathBuf {
        self.path.clone()
    }

    fn exists(&self) -> bool {
        self.path.exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::RuntimeConfig;

    #[test]
    fn default_path_is_xdg() {
        let store = XdgConfigStore::new();
        let path = store.path();
        assert!(path.to_string_lossy().contains("moonshine-flow"));
        assert!(path.ends_with("config.toml"));
    }

    #[test]
    fn parse_toml_sections() {
        let content = r#"
subprocess_timeout_secs = 30

[paths]
bundle_path = "/Users/me/Applications/MoonshineFlow.app"

[runtime]
project_dir = "/opt/homebrew/opt/moonshine-flow/libexec"
python = "/opt/homebrew/opt/python@3.11/bin/python3.11"
uv = "/opt/homebrew/opt/uv/bin/uv"
"#;

        let config = XdgConfigStore::parse_toml(content).unwrap();
        assert_eq!(config.subprocess_timeout_secs, Some(30));
        assert_eq!(
            config.bundle_path_or_default(),
            PathBuf::from("/Users/me/Applications/MoonshineFlow.app")
        );
        assert!(config.bootstrap_config().is_some());
    }

    #[test]
    fn invalid_toml_is_parse_error() {
        let err = XdgConfigStore::parse_toml("paths = 3").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = XdgConfigStore::with_path(dir.path().join("absent.toml"));
        assert_eq!(store.load().await.unwrap(), AppConfig::empty());
    }

    #[tokio::test]
    async fn save_then_init_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = XdgConfigStore::with_path(dir.path().join("nested").join("config.toml"));
        let config = AppConfig {
            runtime: Some(RuntimeConfig {
                python: Some(PathBuf::from("/py")),
                ..Default::default()
            }),
            ..Default::default()
        };

        store.save(&config).await.unwrap();
        assert_eq!(store.load().await.unwrap(), config);
        assert!(matches!(
            store.init().await,
            Err(ConfigError::AlreadyExists(_))
        ));
    }
}
