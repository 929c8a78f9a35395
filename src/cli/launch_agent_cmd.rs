//! Launch agent install / restart / uninstall handlers

use std::path::Path;

use crate::application::error::EXIT_SUCCESS;
use crate::application::permissions::{guidance, login_command};
use crate::application::ports::HostInspector;
use crate::application::{FlowError, PermissionCheck};
use crate::domain::permissions::{ExecutionContext, InvocationKind};

use super::app::AppContext;
use super::args::InstallOptions;
use super::bundle_cmd::{bundle_inputs, install_bundle};
use super::presenter::Presenter;
use super::run_cmd::ensure_runtime;

pub async fn handle_install(
    ctx: &AppContext,
    options: InstallOptions,
    presenter: &mut Presenter,
) -> Result<u8, FlowError> {
    let target = if options.no_app_bundle {
        match ctx.config.bootstrap_config() {
            Some(bootstrap) => {
                ensure_runtime(
                    ctx,
                    &bootstrap,
                    InvocationKind::Terminal,
                    options.verbose_bootstrap,
                    presenter,
                )
                .await?;
            }
            None => presenter.warn("Daemon runtime is not configured; skipping runtime check."),
        }
        ctx.current_exe.clone()
    } else {
        let inputs = bundle_inputs(ctx)?;
        install_bundle(ctx, &inputs, options.verbose_bootstrap, presenter).await?;
        ctx.bundle_manager().layout().executable()
    };

    let os_arch = ctx.environment_probe(None).host().os_arch().await;
    let login_context = ExecutionContext::login_service(&target, os_arch);
    let request = !options.no_request_permissions;
    presenter.info(&format!(
        "Launchd permission check command: {}",
        login_command(&login_context, request).join(" ")
    ));

    let check = ctx
        .permission_probe()
        .check_login(&login_context, request)
        .await;
    explain_check(ctx, &check, &target, options.allow_missing_permissions, presenter);

    let report = ctx
        .launch_agents()
        .install(&target, &check, options.allow_missing_permissions)
        .await?;

    let registration = report.record.registration_path.display().to_string();
    if report.registration_changed {
        presenter.success(&format!("Installed launch agent: {}", registration));
    } else {
        presenter.success(&format!("Launch agent reloaded: {}", registration));
    }
    presenter.info(&format!(
        "Launch target: {}",
        report.record.target_executable_path.display()
    ));
    if !report.record.loaded {
        presenter.warn("launchctl does not list the agent as loaded. Check `moonshine-flow doctor`.");
    }
    Ok(EXIT_SUCCESS)
}

/// Print what the login-context check found and what happens next.
fn explain_check(
    ctx: &AppContext,
    check: &PermissionCheck,
    target: &Path,
    allow_missing: bool,
    presenter: &Presenter,
) {
    match check {
        PermissionCheck::Checked(set) if set.all_granted() => {
            presenter.success("Launchd context has all permissions.");
        }
        PermissionCheck::Checked(set) => {
            for line in guidance(set, &ctx.current_exe, target) {
                eprintln!("{}", line);
            }
            if allow_missing {
                presenter.warn("Continuing with missing permissions because `--allow-missing-permissions` was specified.");
            } else {
                presenter.warn("Launch agent installation was aborted because missing launchd permissions can prevent hotkey detection and paste output.");
                presenter.info("Retry after granting permissions, or run with `--allow-missing-permissions` to install anyway.");
            }
        }
        PermissionCheck::Unavailable(e) => {
            presenter.warn("Could not verify launchd permission state before installing launch agent.");
            eprintln!("{}", e);
            if let Some((stdout, stderr)) = e.captured() {
                if !stdout.is_empty() {
                    eprintln!("Launchd check stdout:\n{}", stdout);
                }
                if !stderr.is_empty() {
                    eprintln!("Launchd check stderr:\n{}", stderr);
                }
            }
            if allow_missing {
                presenter.warn("Continuing with unverified permissions because `--allow-missing-permissions` was specified.");
            } else {
                presenter.info("Retry after fixing permission checks, or run with `--allow-missing-permissions` to install anyway.");
            }
        }
    }
}

pub async fn handle_restart(ctx: &AppContext, presenter: &Presenter) -> Result<u8, FlowError> {
    let record = ctx.launch_agents().restart().await?;
    presenter.success(&format!(
        "Restarted launch agent: {}",
        record.registration_path.display()
    ));
    if !record.loaded {
        presenter.warn("launchctl does not list the agent as loaded after restart.");
    }
    Ok(EXIT_SUCCESS)
}

pub async fn handle_uninstall(ctx: &AppContext, presenter: &Presenter) -> Result<u8, FlowError> {
    let agents = ctx.launch_agents();
    if agents.uninstall().await? {
        presenter.success(&format!(
            "Removed launch agent: {}",
            agents.paths().registration().display()
        ));
    } else {
        presenter.info("Launch agent is not installed.");
    }
    Ok(EXIT_SUCCESS)
}
