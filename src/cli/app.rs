//! Command dispatch, config merging and adapter wiring

use std::env;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use crate::application::error::{EXIT_CANCELLED, EXIT_SUCCESS};
use crate::application::persist::INSTALL_LOCK_FILE;
use crate::application::ports::ConfigStore;
use crate::application::{
    AppBundleManager, EnvironmentProbe, FlowError, LaunchAgentController, LaunchAgentPaths,
    PermissionProbe, RuntimeRepairEngine,
};
use crate::domain::config::{AppConfig, RuntimeConfig};
use crate::domain::runtime::BootstrapConfig;
use crate::infrastructure::{
    CodesignSigner, LaunchctlLoginProbe, LaunchctlService, PythonRuntimeProbe,
    SystemHostInspector, SystemPermissionOracle, UvRuntimeBuilder, XdgConfigStore,
};

use super::args::{Cli, Commands};
use super::presenter::Presenter;
use super::{
    bundle_cmd, config_cmd, doctor_cmd, launch_agent_cmd, logging, permissions_cmd, run_cmd,
    signals,
};

pub const ENV_LIBEXEC: &str = "MOONSHINE_FLOW_LIBEXEC";
pub const ENV_VAR_DIR: &str = "MOONSHINE_FLOW_VAR_DIR";
pub const ENV_PYTHON: &str = "MOONSHINE_FLOW_PYTHON";
pub const ENV_UV: &str = "MOONSHINE_FLOW_UV";

pub type Environment = EnvironmentProbe<SystemHostInspector, PythonRuntimeProbe>;
pub type RepairEngine = RuntimeRepairEngine<SystemHostInspector, PythonRuntimeProbe, UvRuntimeBuilder>;
pub type Permissions = PermissionProbe<SystemPermissionOracle, LaunchctlLoginProbe>;

/// Everything a command handler needs: merged config and the running binary.
pub struct AppContext {
    pub config: AppConfig,
    pub current_exe: PathBuf,
    pub verbose: bool,
}

impl AppContext {
    pub fn new(config: AppConfig, verbose: bool) -> Result<Self, FlowError> {
        let current_exe = env::current_exe()
            .and_then(|p| p.canonicalize())
            .map_err(|e| FlowError::io("Failed to resolve current executable", e))?;
        Ok(Self {
            config,
            current_exe,
            verbose,
        })
    }

    pub fn bundle_manager(&self) -> AppBundleManager<CodesignSigner> {
        AppBundleManager::new(
            CodesignSigner::new(self.config.subprocess_timeout()),
            self.config.bundle_path_or_default(),
            self.config.state_dir_or_default(),
        )
    }

    pub fn launch_agent_paths(&self) -> LaunchAgentPaths {
        LaunchAgentPaths {
            launch_agents_dir: self.config.launch_agents_dir_or_default(),
            log_dir: self.config.log_dir_or_default(),
            label: self.config.label_or_default().to_string(),
            install_lock: self.config.state_dir_or_default().join(INSTALL_LOCK_FILE),
        }
    }

    pub fn launch_agents(&self) -> LaunchAgentController<LaunchctlService> {
        LaunchAgentController::new(
            LaunchctlService::new(self.config.subprocess_timeout()),
            self.launch_agent_paths(),
        )
    }

    pub fn permission_probe(&self) -> Permissions {
        PermissionProbe::new(
            SystemPermissionOracle::new(),
            LaunchctlLoginProbe::new(self.config.subprocess_timeout()),
        )
    }

    /// Environment probe; `project_src_dir` is put on the probe's PYTHONPATH.
    pub fn environment_probe(&self, project_src_dir: Option<PathBuf>) -> Environment {
        let timeout = self.config.subprocess_timeout();
        EnvironmentProbe::new(
            SystemHostInspector::new(timeout),
            PythonRuntimeProbe::new(project_src_dir, timeout),
        )
    }

    pub fn repair_engine(&self, bootstrap: &BootstrapConfig, verbose_bootstrap: bool) -> RepairEngine {
        RuntimeRepairEngine::new(
            self.environment_probe(Some(bootstrap.src_dir())),
            UvRuntimeBuilder::new(
                &bootstrap.state_dir,
                self.config.repair_timeout(),
                verbose_bootstrap,
            ),
        )
    }

    /// Bootstrap config from the merged configuration.
    pub fn bootstrap(&self) -> Result<BootstrapConfig, FlowError> {
        self.config.bootstrap_config().ok_or_else(|| {
            FlowError::NotConfigured(format!(
                "runtime project and toolchain are not set; configure [runtime] project_dir, python and uv, or export {}, {} and {}",
                ENV_LIBEXEC, ENV_PYTHON, ENV_UV
            ))
        })
    }
}

/// Config overrides taken from the Homebrew wrapper's environment.
pub fn env_config() -> AppConfig {
    env_config_from(|key| env::var(key).ok())
}

fn env_config_from(lookup: impl Fn(&str) -> Option<String>) -> AppConfig {
    let path = |key: &str| lookup(key).filter(|v| !v.is_empty()).map(PathBuf::from);
    let runtime = RuntimeConfig {
        project_dir: path(ENV_LIBEXEC),
        state_dir: path(ENV_VAR_DIR),
        python: path(ENV_PYTHON),
        uv: path(ENV_UV),
        ..Default::default()
    };
    AppConfig {
        runtime: (runtime != RuntimeConfig::default()).then_some(runtime),
        ..Default::default()
    }
}

/// Load and merge configuration: defaults < file < env
pub async fn load_merged_config<S: ConfigStore>(store: &S) -> Result<AppConfig, FlowError> {
    let file_config = store.load().await?;
    Ok(AppConfig::defaults().merge(file_config).merge(env_config()))
}

fn config_store(path: Option<&Path>) -> XdgConfigStore {
    match path {
        Some(path) => XdgConfigStore::with_path(path),
        None => XdgConfigStore::new(),
    }
}

/// Parse-free entry point used by `main`.
pub async fn run(cli: Cli) -> ExitCode {
    logging::init(cli.verbose);
    let mut presenter = Presenter::new();
    let store = config_store(cli.config.as_deref());

    match execute(cli, &store, &mut presenter).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            presenter.stop_spinner();
            report_error(&presenter, &e);
            ExitCode::from(e.exit_code())
        }
    }
}

async fn execute(cli: Cli, store: &XdgConfigStore, presenter: &mut Presenter) -> Result<u8, FlowError> {
    if let Commands::Config { action } = cli.command {
        config_cmd::handle_config_command(action, store, presenter).await?;
        return Ok(EXIT_SUCCESS);
    }

    let config = load_merged_config(store).await?;
    let ctx = AppContext::new(config, cli.verbose)?;

    // `run` forwards signals to the daemon itself.
    if let Commands::Run(options) = cli.command {
        return run_cmd::handle_run(&ctx, options, presenter).await;
    }

    tokio::select! {
        result = dispatch(cli.command, &ctx, presenter) => result,
        _ = signals::interrupted() => Err(FlowError::Cancelled),
    }
}

async fn dispatch(command: Commands, ctx: &AppContext, presenter: &mut Presenter) -> Result<u8, FlowError> {
    match command {
        Commands::Doctor(options) => doctor_cmd::handle_doctor(ctx, options, presenter).await,
        Commands::CheckPermissions { request } => {
            permissions_cmd::handle_check_permissions(ctx, request, presenter).await
        }
        Commands::InstallLaunchAgent(options) => {
            launch_agent_cmd::handle_install(ctx, options, presenter).await
        }
        Commands::RestartLaunchAgent => launch_agent_cmd::handle_restart(ctx, presenter).await,
        Commands::UninstallLaunchAgent => launch_agent_cmd::handle_uninstall(ctx, presenter).await,
        Commands::InstallAppBundle(options) => {
            bundle_cmd::handle_install(ctx, options, presenter).await
        }
        Commands::UninstallAppBundle => bundle_cmd::handle_uninstall(ctx, presenter).await,
        Commands::Run(_) | Commands::Config { .. } => Ok(EXIT_SUCCESS),
    }
}

fn report_error(presenter: &Presenter, error: &FlowError) {
    if error.exit_code() == EXIT_CANCELLED {
        presenter.warn("Cancelled");
        return;
    }
    presenter.error(&error.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn env_overrides_fill_runtime_section() {
        let config = env_config_from(lookup(&[
            (ENV_LIBEXEC, "/opt/homebrew/opt/moonshine-flow/libexec"),
            (ENV_VAR_DIR, "/opt/homebrew/var/moonshine-flow"),
            (ENV_PYTHON, "/opt/homebrew/opt/python@3.11/bin/python3.11"),
            (ENV_UV, "/opt/homebrew/opt/uv/bin/uv"),
        ]));
        let bootstrap = config.bootstrap_config().unwrap();
        assert_eq!(
            bootstrap.state_dir,
            PathBuf::from("/opt/homebrew/var/moonshine-flow")
        );
        assert_eq!(bootstrap.uv, PathBuf::from("/opt/homebrew/opt/uv/bin/uv"));
    }

    #[test]
    fn empty_env_leaves_runtime_unset() {
        let config = env_config_from(lookup(&[(ENV_PYTHON, "")]));
        assert!(config.runtime.is_none());
    }

    #[test]
    fn env_wins_over_file() {
        let file = AppConfig {
            runtime: Some(RuntimeConfig {
                project_dir: Some(PathBuf::from("/file/libexec")),
                python: Some(PathBuf::from("/file/python")),
                uv: Some(PathBuf::from("/file/uv")),
                ..Default::default()
            }),
            ..Default::default()
        };
        let merged = AppConfig::defaults()
            .merge(file)
            .merge(env_config_from(lookup(&[(ENV_PYTHON, "/env/python")])));
        let bootstrap = merged.bootstrap_config().unwrap();
        assert_eq!(bootstrap.python, PathBuf::from("/env/python"));
        assert_eq!(bootstrap.project_dir, PathBuf::from("/file/libexec"));
    }
}
