//! Diagnostics report use case (`doctor`)

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::domain::arch::Arch;
use crate::domain::bundle::{BundleLayout, BundleManifest};
use crate::domain::launch_agent::LaunchAgentRecord;
use crate::domain::permissions::{
    classify, ExecutionContext, GrantState, HealthStatus, InvocationKind, LoginEvidence,
    PermissionSet,
};
use crate::domain::runtime::{BootstrapConfig, RuntimeCandidate, Toolchain};
use crate::domain::trust::TrustSignal;

use super::bundle::AppBundleManager;
use super::environment::{EnvironmentProbe, EnvironmentReport};
use super::error::FlowError;
use super::launch_agent::LaunchAgentController;
use super::permissions::{guidance, login_command, PermissionCheck, PermissionProbe};
use super::ports::{
    CodeSigner, HostInspector, LoginContextProbe, PermissionOracle, RuntimeProbe,
    ServiceManager,
};

/// Input parameters for a diagnostics run
#[derive(Debug, Clone)]
pub struct DiagnosticsOptions {
    pub current_exe: PathBuf,
    pub bootstrap: Option<BootstrapConfig>,
    /// Also probe the login-service context
    pub launchd_check: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct BundleStatus {
    pub path: PathBuf,
    pub installed: bool,
    pub manifest_path: PathBuf,
    pub manifest: Option<BundleManifest>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistrationStatus {
    pub path: PathBuf,
    pub label: Option<String>,
    pub program: Option<Vec<String>>,
    pub record: Option<LaunchAgentRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IdentityReport {
    pub signature_hash: String,
    pub executable_mtime: Option<u64>,
}

/// Login-service section, present with `launchd_check`.
#[derive(Debug, Clone, Serialize)]
pub struct LaunchdCheckReport {
    pub target: PathBuf,
    pub command: Vec<String>,
    pub permissions: Option<PermissionSet>,
    pub error: Option<String>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub identity: Option<IdentityReport>,
    pub notes: Vec<String>,
}

/// Everything `doctor` prints.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticsReport {
    pub platform: String,
    pub context: ExecutionContext,
    pub runtimes: Vec<EnvironmentReport>,
    pub rosetta: bool,
    pub terminal_permissions: PermissionSet,
    pub permission_target: PathBuf,
    pub bundle: BundleStatus,
    pub registration: RegistrationStatus,
    pub stdout_log: PathBuf,
    pub stderr_log: PathBuf,
    pub trust: TrustSignal,
    pub launchd: Option<LaunchdCheckReport>,
    pub status: HealthStatus,
    pub guidance: Vec<String>,
}

/// Aggregates every component into one read-only report.
pub struct DiagnosticsReporter<'a, H, P, O, L, C, S>
where
    H: HostInspector,
    P: RuntimeProbe,
    O: PermissionOracle,
    L: LoginContextProbe,
    C: CodeSigner,
    S: ServiceManager,
{
    environment: &'a EnvironmentProbe<H, P>,
    permissions: &'a PermissionProbe<O, L>,
    bundles: &'a AppBundleManager<C>,
    agents: &'a LaunchAgentController<S>,
}

impl<'a, H, P, O, L, C, S> DiagnosticsReporter<'a, H, P, O, L, C, S>
where
    H: HostInspector,
    P: RuntimeProbe,
    O: PermissionOracle,
    L: LoginContextProbe,
    C: CodeSigner,
    S: ServiceManager,
{
    pub fn new(
        environment: &'a EnvironmentProbe<H, P>,
        permissions: &'a PermissionProbe<O, L>,
        bundles: &'a AppBundleManager<C>,
        agents: &'a LaunchAgentController<S>,
    ) -> Self {
        Self {
            environment,
            permissions,
            bundles,
            agents,
        }
    }

    pub async fn report(&self, options: &DiagnosticsOptions) -> Result<DiagnosticsReport, FlowError> {
        let context = self
            .environment
            .context(
                &options.current_exe,
                InvocationKind::Terminal,
                options.bootstrap.as_ref().map(|b| b.python.as_path()),
            )
            .await;

        let runtimes = match &options.bootstrap {
            Some(bootstrap) => self.runtimes(&context, bootstrap).await,
            None => Vec::new(),
        };
        let rosetta = context.os_arch == Arch::Arm64
            && (context.resolved_interpreter_arch == Arch::X86_64
                || runtimes.iter().any(EnvironmentReport::is_rosetta));

        let terminal_permissions = self
            .permissions
            .query(&context)
            .await
            .unwrap_or_else(|_| PermissionSet::uniform(GrantState::Unknown));

        let layout = self.bundles.layout().clone();
        let bundle = BundleStatus {
            path: layout.root.clone(),
            installed: layout.executable().exists(),
            manifest_path: self.bundles.manifest_path(),
            manifest: self.bundles.read_manifest().await?,
        };

        let descriptor = self.agents.descriptor().await?;
        let record = self.agents.record().await?;
        let registration = RegistrationStatus {
            path: self.agents.paths().registration(),
            label: descriptor.as_ref().map(|d| d.label.clone()),
            program: descriptor.as_ref().map(|d| d.program_arguments.clone()),
            record: record.clone(),
        };

        let permission_target = match (&record, bundle.installed) {
            (Some(record), _) => record.target_executable_path.clone(),
            (None, true) => layout.executable(),
            (None, false) => options.current_exe.clone(),
        };

        let stderr_log = self.agents.paths().stderr_log();
        let trust = read_trust_signal(&stderr_log).await?;

        let (launchd, login_check) = if options.launchd_check {
            let (section, check) = self
                .launchd_section(&context, &permission_target, &layout, &terminal_permissions, &bundle, &trust)
                .await;
            (Some(section), Some(check))
        } else {
            (None, None)
        };

        let evidence = match &login_check {
            Some(check) => check.evidence(),
            None => LoginEvidence::NotChecked,
        };
        let status = classify(&terminal_permissions, evidence.clone(), &trust);
        let guidance = final_guidance(
            &terminal_permissions,
            evidence,
            status,
            &options.current_exe,
            &permission_target,
        );

        Ok(DiagnosticsReport {
            platform: format!("{} {}", std::env::consts::OS, std::env::consts::ARCH),
            context,
            runtimes,
            rosetta,
            terminal_permissions,
            permission_target,
            bundle,
            registration,
            stdout_log: self.agents.paths().stdout_log(),
            stderr_log,
            trust,
            launchd,
            status,
            guidance,
        })
    }

    async fn runtimes(
        &self,
        context: &ExecutionContext,
        bootstrap: &BootstrapConfig,
    ) -> Vec<EnvironmentReport> {
        let arch = if context.resolved_interpreter_arch.is_known() {
            context.resolved_interpreter_arch.clone()
        } else {
            context.os_arch.clone()
        };
        let toolchain = Toolchain::new("configured", &bootstrap.python, &bootstrap.uv, arch);
        let candidates = [
            RuntimeCandidate::primary(&bootstrap.project_dir, &toolchain),
            RuntimeCandidate::legacy(&bootstrap.project_dir, &toolchain),
            RuntimeCandidate::recovery(&bootstrap.state_dir, &toolchain),
        ];
        let mut reports = Vec::with_capacity(candidates.len());
        for candidate in &candidates {
            reports.push(
                self.environment
                    .inspect(context, candidate, &bootstrap.library_name)
                    .await,
            );
        }
        reports
    }

    async fn launchd_section(
        &self,
        context: &ExecutionContext,
        target: &Path,
        layout: &BundleLayout,
        terminal: &PermissionSet,
        bundle: &BundleStatus,
        trust: &TrustSignal,
    ) -> (LaunchdCheckReport, PermissionCheck) {
        let login_context = ExecutionContext::login_service(target, context.os_arch.clone());
        let check = self.permissions.check_login(&login_context, false).await;

        let mut notes = Vec::new();
        let identity = if BundleLayout::containing(target).as_ref() == Some(layout) {
            match self.bundles.identity().await {
                Ok(identity) => identity.map(|i| IdentityReport {
                    executable_mtime: i.mtime_unix_secs(),
                    signature_hash: i.signature_hash,
                }),
                Err(e) => {
                    notes.push(format!("Could not read code signature: {}", e));
                    None
                }
            }
        } else {
            None
        };

        if bundle.installed && target != layout.executable() {
            notes.push(format!(
                "Registration target differs from the managed bundle executable ({}). Rerun install-launch-agent.",
                layout.executable().display()
            ));
        }

        let (permissions, error, stdout, stderr) = match &check {
            PermissionCheck::Checked(set) => {
                if set.missing() != terminal.missing() {
                    notes.push(
                        "Permission mismatch detected between terminal and launchd contexts. \
                         Grant permissions for the launchd target shown above."
                            .to_string(),
                    );
                }
                if trust.is_untrusted() {
                    notes.push(
                        "Launchd runtime log indicates trust failure despite check output. \
                         Restart the launch agent after granting permissions."
                            .to_string(),
                    );
                }
                (Some(set.clone()), None, None, None)
            }
            PermissionCheck::Unavailable(e) => {
                let (stdout, stderr) = match e.captured() {
                    Some((stdout, stderr)) => (
                        Some(stdout.to_string()).filter(|s| !s.is_empty()),
                        Some(stderr.to_string()).filter(|s| !s.is_empty()),
                    ),
                    None => (None, None),
                };
                (None, Some(e.to_string()), stdout, stderr)
            }
        };

        let section = LaunchdCheckReport {
            target: target.to_path_buf(),
            command: login_command(&login_context, false),
            permissions,
            error,
            stdout,
            stderr,
            identity,
            notes,
        };
        (section, check)
    }
}

async fn read_trust_signal(log: &Path) -> Result<TrustSignal, FlowError> {
    match tokio::fs::read(log).await {
        Ok(bytes) => Ok(TrustSignal::scan(&String::from_utf8_lossy(&bytes))),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(TrustSignal::NoEvidence),
        Err(e) => Err(FlowError::io(format!("Failed to read {}", log.display()), e)),
    }
}

fn final_guidance(
    terminal: &PermissionSet,
    login: LoginEvidence<'_>,
    status: HealthStatus,
    current_exe: &Path,
    target: &Path,
) -> Vec<String> {
    if !terminal.all_granted() {
        return guidance(terminal, current_exe, target);
    }
    match login {
        LoginEvidence::Checked(set) if !set.all_granted() => vec![format!(
            "Grant permissions for this launchd target and restart the launch agent: {}",
            target.display()
        )],
        LoginEvidence::Unavailable => {
            vec!["Could not verify launchd permission state from launchctl output.".to_string()]
        }
        _ if status == HealthStatus::Warn => vec![format!(
            "Launchd check reports OK but the runtime log shows a trust failure. \
             The bundle was likely re-signed and the OS dropped the permission binding. \
             Re-grant Accessibility and Input Monitoring for this target and restart: {}",
            target.display()
        )],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::permissions::Capability;
    use crate::domain::trust::DAEMON_START_MARKER;
    use tempfile::TempDir;

    #[tokio::test]
    async fn trust_signal_from_log_file() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("daemon.err.log");
        assert_eq!(read_trust_signal(&log).await.unwrap(), TrustSignal::NoEvidence);

        std::fs::write(
            &log,
            format!(
                "{}\n2026-02-27 10:00:00,100 ERROR This process is not trusted! Input event monitoring will not be possible\n",
                DAEMON_START_MARKER
            ),
        )
        .unwrap();
        assert!(read_trust_signal(&log).await.unwrap().is_untrusted());
    }

    #[test]
    fn guidance_follows_first_failing_context() {
        let granted = PermissionSet::uniform(GrantState::Granted);
        let denied = PermissionSet::from_states([(Capability::Microphone, GrantState::Denied)]);
        let exe = Path::new("/bin/cli");
        let target = Path::new("/Apps/MoonshineFlow.app/Contents/MacOS/MoonshineFlow");

        let lines = final_guidance(&denied, LoginEvidence::NotChecked, HealthStatus::Incomplete, exe, target);
        assert!(lines[0].starts_with("Missing permissions"));

        let lines = final_guidance(
            &granted,
            LoginEvidence::Checked(&denied),
            HealthStatus::Incomplete,
            exe,
            target,
        );
        assert!(lines[0].ends_with("MacOS/MoonshineFlow"));

        let lines = final_guidance(
            &granted,
            LoginEvidence::Checked(&granted),
            HealthStatus::Warn,
            exe,
            target,
        );
        assert!(lines[0].contains("re-signed"));

        assert!(final_guidance(&granted, LoginEvidence::NotChecked, HealthStatus::Ok, exe, target).is_empty());
    }
}
