//! `run`: repair the runtime, then start the daemon under it

use std::io::ErrorKind;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info};

use crate::application::FlowError;
use crate::domain::bundle::BundleLayout;
use crate::domain::permissions::InvocationKind;
use crate::domain::runtime::{BootstrapConfig, RuntimeCandidate};
use crate::domain::trust::DAEMON_START_MARKER;

use super::app::AppContext;
use super::args::RunOptions;
use super::pid_file::PidFile;
use super::presenter::Presenter;
use super::signals;

/// Set by launchd to the job label for every process it spawns.
const LAUNCHD_SERVICE_ENV: &str = "XPC_SERVICE_NAME";

pub async fn handle_run(
    ctx: &AppContext,
    options: RunOptions,
    presenter: &mut Presenter,
) -> Result<u8, FlowError> {
    eprintln!("{}", DAEMON_START_MARKER);

    let pid_file = PidFile::in_state_dir(&ctx.config.state_dir_or_default());
    pid_file.acquire()?;

    let bootstrap = load_bootstrap(ctx).await?;
    let kind = invocation_kind(ctx.config.label_or_default());
    let runtime = tokio::select! {
        runtime = ensure_runtime(ctx, &bootstrap, kind, options.verbose_bootstrap, presenter) => runtime?,
        _ = signals::interrupted() => return Err(FlowError::Cancelled),
    };

    let command = runtime.daemon_command(&bootstrap.daemon_module, &options.args);
    let Some((program, args)) = command.split_first() else {
        return Err(FlowError::NotConfigured("empty daemon command".to_string()));
    };
    info!(command = %command.join(" "), "starting daemon");

    let mut child = Command::new(program)
        .args(args)
        .current_dir(&bootstrap.project_dir)
        .stdin(Stdio::null())
        .spawn()
        .map_err(|e| FlowError::io(format!("Failed to start {}", program), e))?;
    let code = signals::wait_forwarding(&mut child)
        .await
        .map_err(|e| FlowError::io("Failed to wait for daemon", e))?;
    debug!(code, "daemon exited");

    Ok(u8::try_from(code).unwrap_or(1))
}

fn invocation_kind(label: &str) -> InvocationKind {
    match std::env::var(LAUNCHD_SERVICE_ENV) {
        Ok(service) if service == label => InvocationKind::LoginService,
        _ => InvocationKind::Terminal,
    }
}

/// The bundle's `bootstrap.json` when running from inside a bundle,
/// otherwise the configured runtime.
async fn load_bootstrap(ctx: &AppContext) -> Result<BootstrapConfig, FlowError> {
    if let Some(layout) = BundleLayout::containing(&ctx.current_exe) {
        let path = layout.bootstrap_config();
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => {
                return BootstrapConfig::from_json(&text).map_err(|e| {
                    FlowError::NotConfigured(format!("Invalid {}: {}", path.display(), e))
                })
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "bundle has no bootstrap config");
            }
            Err(e) => return Err(FlowError::io(format!("Failed to read {}", path.display()), e)),
        }
    }
    ctx.bootstrap()
}

/// Run the repair engine and return a usable runtime.
pub async fn ensure_runtime(
    ctx: &AppContext,
    bootstrap: &BootstrapConfig,
    kind: InvocationKind,
    verbose_bootstrap: bool,
    presenter: &mut Presenter,
) -> Result<RuntimeCandidate, FlowError> {
    let engine = ctx.repair_engine(bootstrap, verbose_bootstrap);
    let context = engine
        .environment()
        .context(&ctx.current_exe, kind, Some(&bootstrap.python))
        .await;

    // Inherited toolchain output would tear through the spinner.
    if !verbose_bootstrap {
        presenter.start_spinner("Checking daemon runtime...");
    }
    let outcome = engine.repair(&context, bootstrap).await;
    if outcome.is_ok() {
        let name = outcome
            .runtime
            .as_ref()
            .map(RuntimeCandidate::name)
            .unwrap_or_default();
        presenter.spinner_success(&format!("Daemon runtime ready ({})", name));
    } else {
        presenter.spinner_fail("Daemon runtime could not be repaired");
    }

    if ctx.verbose || verbose_bootstrap {
        presenter.info(&format!("Runtime repair: {}", outcome.describe_trail()));
        for attempt in &outcome.attempts {
            presenter.info(&format!("  {}: {}", attempt.runtime, attempt.detail));
        }
    }
    outcome.into_runtime()
}
