//! Config command handler

use std::path::Path;

use crate::application::ports::ConfigStore;
use crate::application::FlowError;
use crate::domain::config::AppConfig;

use super::app::env_config;
use super::args::ConfigAction;
use super::presenter::Presenter;

const NOT_SET: &str = "(not set)";

/// Handle config subcommand
pub async fn handle_config_command<S: ConfigStore>(
    action: ConfigAction,
    store: &S,
    presenter: &Presenter,
) -> Result<(), FlowError> {
    match action {
        ConfigAction::Init => handle_init(store, presenter).await,
        ConfigAction::List => handle_list(store, presenter).await,
        ConfigAction::Path => {
            presenter.output(&store.path().to_string_lossy());
            Ok(())
        }
    }
}

async fn handle_init<S: ConfigStore>(store: &S, presenter: &Presenter) -> Result<(), FlowError> {
    store.init().await?;
    presenter.success(&format!(
        "Config file created at: {}",
        store.path().display()
    ));
    Ok(())
}

/// Effective values after merging defaults, file and environment.
async fn handle_list<S: ConfigStore>(store: &S, presenter: &Presenter) -> Result<(), FlowError> {
    let config = AppConfig::defaults()
        .merge(store.load().await?)
        .merge(env_config());

    for (key, value) in effective_values(&config) {
        presenter.key_value(key, &value);
    }
    Ok(())
}

fn show(path: Option<impl AsRef<Path>>) -> String {
    path.map(|p| p.as_ref().display().to_string())
        .unwrap_or_else(|| NOT_SET.to_string())
}

fn effective_values(config: &AppConfig) -> Vec<(&'static str, String)> {
    let runtime = config.runtime.clone().unwrap_or_default();
    vec![
        (
            "subprocess_timeout_secs",
            config.subprocess_timeout().as_secs().to_string(),
        ),
        (
            "repair_timeout_secs",
            config.repair_timeout().as_secs().to_string(),
        ),
        ("paths.bundle_path", show(Some(&config.bundle_path_or_default()))),
        (
            "paths.launch_agents_dir",
            show(Some(&config.launch_agents_dir_or_default())),
        ),
        ("paths.state_dir", show(Some(&config.state_dir_or_default()))),
        ("paths.log_dir", show(Some(&config.log_dir_or_default()))),
        ("runtime.project_dir", show(runtime.project_dir.as_deref())),
        (
            "runtime.state_dir",
            show(Some(&config.runtime_state_dir_or_default())),
        ),
        ("runtime.python", show(runtime.python.as_deref())),
        ("runtime.uv", show(runtime.uv.as_deref())),
        (
            "runtime.daemon_module",
            runtime
                .daemon_module
                .unwrap_or_else(|| crate::domain::runtime::DEFAULT_DAEMON_MODULE.to_string()),
        ),
        (
            "runtime.library_name",
            runtime
                .library_name
                .unwrap_or_else(|| crate::domain::runtime::DEFAULT_LIBRARY_NAME.to_string()),
        ),
        (
            "runtime.source_executable",
            show(runtime.source_executable.as_deref()),
        ),
        ("launchd.label", config.label_or_default().to_string()),
    ]
}
