//! `doctor` handler

use std::path::Path;

use crate::application::diagnostics::LaunchdCheckReport;
use crate::application::error::EXIT_SUCCESS;
use crate::application::{DiagnosticsOptions, DiagnosticsReport, DiagnosticsReporter, FlowError};

use super::app::AppContext;
use super::args::DoctorOptions;
use super::presenter::Presenter;

/// Print the diagnostics report. Always exits 0; the health line carries
/// the verdict.
pub async fn handle_doctor(
    ctx: &AppContext,
    options: DoctorOptions,
    presenter: &mut Presenter,
) -> Result<u8, FlowError> {
    let bootstrap = ctx.config.bootstrap_config();
    let environment = ctx.environment_probe(bootstrap.as_ref().map(|b| b.src_dir()));
    let permissions = ctx.permission_probe();
    let bundles = ctx.bundle_manager();
    let agents = ctx.launch_agents();
    let reporter = DiagnosticsReporter::new(&environment, &permissions, &bundles, &agents);

    if !options.json {
        presenter.start_spinner("Collecting diagnostics...");
    }
    let report = reporter
        .report(&DiagnosticsOptions {
            current_exe: ctx.current_exe.clone(),
            bootstrap,
            launchd_check: options.launchd_check,
        })
        .await;
    presenter.stop_spinner();
    let report = report?;

    if options.json {
        let text = serde_json::to_string_pretty(&report)
            .map_err(|e| FlowError::io("Failed to serialize report", e.into()))?;
        presenter.output(&text);
    } else {
        print_report(&report, options.launchd_check, presenter);
    }
    Ok(EXIT_SUCCESS)
}

fn print_report(report: &DiagnosticsReport, launchd_check: bool, presenter: &Presenter) {
    presenter.key_value("Platform", &report.platform);
    presenter.key_value("Executable", &report.context.binary_path.display().to_string());
    presenter.key_value("Invocation", &report.context.invocation_kind.to_string());
    presenter.key_value("Host arch", &report.context.os_arch.to_string());
    presenter.key_value(
        "Interpreter arch",
        &report.context.resolved_interpreter_arch.to_string(),
    );

    presenter.section("Runtimes");
    if report.runtimes.is_empty() {
        presenter.output("  (runtime not configured)");
    }
    for runtime in &report.runtimes {
        let state = if runtime.native_library_loadable {
            "ok".to_string()
        } else {
            runtime
                .mismatch()
                .or_else(|| runtime.probe.error.clone())
                .unwrap_or_else(|| "unusable".to_string())
        };
        presenter.output(&format!(
            "  {} ({}, {}): {}",
            runtime.runtime,
            runtime.python.display(),
            runtime.interpreter_arch,
            state
        ));
    }
    if report.rosetta {
        presenter.warn("Apple Silicon host is running an x86_64 interpreter under Rosetta. Install an arm64 python and uv.");
    }

    presenter.section("Terminal permissions");
    presenter.permission_states(&report.terminal_permissions);
    presenter.key_value(
        "Permission target (recommended)",
        &report.permission_target.display().to_string(),
    );

    presenter.section("App bundle");
    presenter.key_value("Path", &report.bundle.path.display().to_string());
    presenter.key_value("Installed", &report.bundle.installed.to_string());
    match &report.bundle.manifest {
        Some(manifest) => {
            presenter.key_value("Revision", &manifest.bundle_version.to_string());
            presenter.key_value("Executable digest", manifest.executable_digest.short());
        }
        None => presenter.key_value("Manifest", "(none)"),
    }

    presenter.section("Launch agent");
    presenter.key_value("Registration", &report.registration.path.display().to_string());
    match &report.registration.record {
        Some(record) => {
            presenter.key_value("Target", &record.target_executable_path.display().to_string());
            presenter.key_value("Loaded", &record.loaded.to_string());
        }
        None => presenter.key_value("Installed", "false"),
    }
    print_path("Stdout log", &report.stdout_log, presenter);
    print_path("Stderr log", &report.stderr_log, presenter);
    presenter.key_value("Runtime trust", &report.trust.describe());

    if let Some(launchd) = &report.launchd {
        print_launchd(launchd, presenter);
    }

    if launchd_check {
        println!();
        presenter.health(report.status);
    }
    for line in &report.guidance {
        presenter.info(line);
    }
}

fn print_path(label: &str, path: &Path, presenter: &Presenter) {
    let suffix = if path.exists() { "" } else { " (missing)" };
    presenter.key_value(label, &format!("{}{}", path.display(), suffix));
}

fn print_launchd(launchd: &LaunchdCheckReport, presenter: &Presenter) {
    presenter.section("Launchd context");
    presenter.key_value("Permission target", &launchd.target.display().to_string());
    presenter.key_value("Check command", &launchd.command.join(" "));
    match &launchd.permissions {
        Some(set) => presenter.permission_states(set),
        None => {
            if let Some(error) = &launchd.error {
                presenter.warn(error);
            }
            if let Some(stdout) = &launchd.stdout {
                presenter.output(&format!("Launchd check stdout:\n{}", stdout));
            }
            if let Some(stderr) = &launchd.stderr {
                presenter.output(&format!("Launchd check stderr:\n{}", stderr));
            }
        }
    }
    match &launchd.identity {
        Some(identity) => {
            presenter.key_value("CDHash", &identity.signature_hash);
            presenter.key_value(
                "Executable mtime",
                &identity
                    .executable_mtime
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "(unknown)".to_string()),
            );
        }
        None => presenter.key_value("CDHash", "(unsigned or not a bundle)"),
    }
    for note in &launchd.notes {
        presenter.warn(note);
    }
}
