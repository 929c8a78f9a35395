//! `install-app-bundle` / `uninstall-app-bundle` handlers

use crate::application::error::EXIT_SUCCESS;
use crate::application::{BundleInputs, FlowError, InstallOutcome};
use crate::domain::bundle::InfoDescriptor;
use crate::domain::permissions::InvocationKind;

use super::app::AppContext;
use super::args::BundleOptions;
use super::presenter::Presenter;
use super::run_cmd::ensure_runtime;

/// Inputs for the bundle: this binary (or the configured one), the
/// identity descriptor and the bootstrap manifest.
pub fn bundle_inputs(ctx: &AppContext) -> Result<BundleInputs, FlowError> {
    Ok(BundleInputs {
        source_executable: ctx
            .config
            .source_executable()
            .unwrap_or_else(|| ctx.current_exe.clone()),
        descriptor: InfoDescriptor::default(),
        bootstrap: ctx.bootstrap()?,
    })
}

/// Repair the runtime named by `inputs`, then install with a spinner and
/// report what changed. Nothing is written or signed when repair fails.
pub async fn install_bundle(
    ctx: &AppContext,
    inputs: &BundleInputs,
    verbose_bootstrap: bool,
    presenter: &mut Presenter,
) -> Result<InstallOutcome, FlowError> {
    ensure_runtime(
        ctx,
        &inputs.bootstrap,
        InvocationKind::Terminal,
        verbose_bootstrap,
        presenter,
    )
    .await?;

    let bundles = ctx.bundle_manager();

    presenter.start_spinner("Installing app bundle...");
    let outcome = match bundles.install(inputs).await {
        Ok(outcome) => outcome,
        Err(e) => {
            presenter.spinner_fail("App bundle installation failed");
            return Err(e);
        }
    };

    let root = bundles.layout().root.display().to_string();
    if outcome.resigned {
        let changed = outcome
            .changed
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        presenter.spinner_success(&format!(
            "Installed app bundle: {} (revision {}, updated: {})",
            root, outcome.manifest.bundle_version, changed
        ));
        presenter.warn(
            "The bundle was re-signed. macOS may drop existing Accessibility and Input Monitoring grants; re-grant them if the daemon reports a trust failure.",
        );
    } else {
        presenter.spinner_success(&format!("App bundle up to date: {}", root));
    }
    Ok(outcome)
}

pub async fn handle_install(
    ctx: &AppContext,
    options: BundleOptions,
    presenter: &mut Presenter,
) -> Result<u8, FlowError> {
    let inputs = bundle_inputs(ctx)?;
    install_bundle(ctx, &inputs, options.verbose_bootstrap, presenter).await?;
    Ok(EXIT_SUCCESS)
}

pub async fn handle_uninstall(ctx: &AppContext, presenter: &mut Presenter) -> Result<u8, FlowError> {
    let bundles = ctx.bundle_manager();
    let root = bundles.layout().root.display().to_string();
    if bundles.remove().await? {
        presenter.success(&format!("Removed app bundle: {}", root));
    } else {
        presenter.info("App bundle is not installed.");
    }
    Ok(EXIT_SUCCESS)
}
