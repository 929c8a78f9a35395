//! `check-permissions` handler

use std::path::PathBuf;

use tracing::warn;

use crate::application::error::{EXIT_PERMISSION_INCOMPLETE, EXIT_SUCCESS};
use crate::application::permissions::guidance;
use crate::application::{FlowError, LaunchAgentController};
use crate::domain::permissions::{GrantState, InvocationKind, PermissionSet};
use crate::infrastructure::LaunchctlService;

use super::app::AppContext;
use super::presenter::Presenter;

/// Print `Label: STATE` lines for this executable. Exits 3 when any
/// capability is not granted so the login-context probe can tell.
pub async fn handle_check_permissions(
    ctx: &AppContext,
    request: bool,
    presenter: &Presenter,
) -> Result<u8, FlowError> {
    let probe = ctx.permission_probe();
    let context = ctx
        .environment_probe(None)
        .context(&ctx.current_exe, InvocationKind::Terminal, None)
        .await;

    let result = if request {
        probe.request(&context).await
    } else {
        probe.query(&context).await
    };
    let set = result.unwrap_or_else(|e| {
        warn!(error = %e, "permission query failed");
        PermissionSet::uniform(GrantState::Unknown)
    });

    presenter.permission_report(&set);
    if set.all_granted() {
        return Ok(EXIT_SUCCESS);
    }

    for line in guidance(&set, &ctx.current_exe, &recommended_target(ctx)) {
        eprintln!("{}", line);
    }
    Ok(EXIT_PERMISSION_INCOMPLETE)
}

/// Where grants should go: the managed bundle executable when installed.
fn recommended_target(ctx: &AppContext) -> PathBuf {
    let bundles = ctx.bundle_manager();
    let layout = bundles.layout();
    let bundle = layout.executable().exists().then_some(layout);
    LaunchAgentController::<LaunchctlService>::resolve_target(bundle, &ctx.current_exe)
}
