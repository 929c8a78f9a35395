//! Runtime self-repair use case
//!
//! Staged cheapest-first: reuse an existing runtime, rebuild the recovery
//! runtime with the configured toolchain, then rebuild it with the
//! well-known fallback toolchain. Every run ends either healed or in
//! `RepairState::Failed` with remediation text.

use std::path::Path;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::domain::arch::Arch;
use crate::domain::permissions::ExecutionContext;
use crate::domain::runtime::{
    BootstrapConfig, CandidateKind, RepairState, RuntimeCandidate, Toolchain,
    FALLBACK_INSTALL_COMMAND, FALLBACK_PYTHON, FALLBACK_UV,
};

use super::environment::EnvironmentProbe;
use super::error::FlowError;
use super::ports::{HostInspector, RuntimeBuilder, RuntimeProbe};

/// One candidate that was looked at and rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepairAttempt {
    pub runtime: String,
    pub detail: String,
}

/// Result of one repair run.
#[derive(Debug, Clone, Serialize)]
pub struct RepairOutcome {
    /// Final state
    pub state: RepairState,
    /// Every state visited, in order
    pub trail: Vec<RepairState>,
    pub runtime: Option<RuntimeCandidate>,
    pub attempts: Vec<RepairAttempt>,
    pub remediation: Option<String>,
}

impl RepairOutcome {
    fn new() -> Self {
        Self {
            state: RepairState::Ok,
            trail: Vec::new(),
            runtime: None,
            attempts: Vec::new(),
            remediation: None,
        }
    }

    fn enter(&mut self, state: RepairState) {
        debug!(state = %state, "runtime repair transition");
        self.trail.push(state.clone());
        self.state = state;
    }

    fn healed(mut self, runtime: RuntimeCandidate) -> Self {
        info!(runtime = %runtime.name(), "runtime ready");
        self.enter(RepairState::Ok);
        self.runtime = Some(runtime);
        self
    }

    fn reject(&mut self, runtime: impl Into<String>, detail: impl Into<String>) {
        let attempt = RepairAttempt {
            runtime: runtime.into(),
            detail: detail.into(),
        };
        debug!(runtime = %attempt.runtime, detail = %attempt.detail, "runtime rejected");
        self.attempts.push(attempt);
    }

    pub fn is_ok(&self) -> bool {
        self.state == RepairState::Ok
    }

    /// `needs-venv-rebuild -> ok`
    pub fn describe_trail(&self) -> String {
        self.trail
            .iter()
            .map(|s| match s {
                RepairState::Failed(_) => "failed".to_string(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(" -> ")
    }

    /// The healed runtime, or `RepairFailed` carrying the remediation.
    pub fn into_runtime(self) -> Result<RuntimeCandidate, FlowError> {
        match (self.state, self.runtime) {
            (RepairState::Ok, Some(runtime)) => Ok(runtime),
            (RepairState::Failed(reason), _) => Err(FlowError::RepairFailed {
                reason,
                remediation: self.remediation.unwrap_or_default(),
            }),
            (state, _) => Err(FlowError::RepairFailed {
                reason: format!("repair stopped in state {}", state),
                remediation: self.remediation.unwrap_or_default(),
            }),
        }
    }
}

/// Heals interpreter/library architecture mismatches at startup.
pub struct RuntimeRepairEngine<H, P, B>
where
    H: HostInspector,
    P: RuntimeProbe,
    B: RuntimeBuilder,
{
    environment: EnvironmentProbe<H, P>,
    builder: B,
}

impl<H, P, B> RuntimeRepairEngine<H, P, B>
where
    H: HostInspector,
    P: RuntimeProbe,
    B: RuntimeBuilder,
{
    pub fn new(environment: EnvironmentProbe<H, P>, builder: B) -> Self {
        Self {
            environment,
            builder,
        }
    }

    pub fn environment(&self) -> &EnvironmentProbe<H, P> {
        &self.environment
    }

    /// Toolchain rooted at `python`/`uv`. Its arch is the interpreter's
    /// when known, else the host's.
    pub async fn toolchain(
        &self,
        name: &str,
        python: &Path,
        uv: &Path,
        os_arch: &Arch,
    ) -> Toolchain {
        let host = self.environment.host();
        let arch = if host.is_executable(python) {
            host.interpreter_arch(python).await
        } else {
            Arch::Unknown
        };
        let arch = if arch.is_known() { arch } else { os_arch.clone() };
        Toolchain::new(name, python, uv, arch)
    }

    /// Candidates in probe order: primary, legacy, recovery.
    pub fn candidates(bootstrap: &BootstrapConfig, toolchain: &Toolchain) -> Vec<RuntimeCandidate> {
        vec![
            RuntimeCandidate::primary(&bootstrap.project_dir, toolchain),
            RuntimeCandidate::legacy(&bootstrap.project_dir, toolchain),
            RuntimeCandidate::recovery(&bootstrap.state_dir, toolchain),
        ]
    }

    /// Run the repair state machine once.
    pub async fn repair(&self, context: &ExecutionContext, bootstrap: &BootstrapConfig) -> RepairOutcome {
        let os_arch = &context.os_arch;
        let mut outcome = RepairOutcome::new();
        let configured = self
            .toolchain("configured", &bootstrap.python, &bootstrap.uv, os_arch)
            .await;

        for candidate in Self::candidates(bootstrap, &configured) {
            if candidate.kind == CandidateKind::Recovery
                && self.builder.is_stale(&candidate, &bootstrap.project_dir).await
            {
                outcome.reject(candidate.name(), "fingerprint changed since last build");
                continue;
            }
            let report = self
                .environment
                .inspect(context, &candidate, &bootstrap.library_name)
                .await;
            match report.ensure_usable() {
                Ok(()) => return outcome.healed(candidate),
                Err(e) => {
                    debug!(error = %e, "runtime needs repair");
                    outcome.reject(candidate.name(), report.probe.summarize(&candidate));
                }
            }
        }

        outcome.enter(RepairState::NeedsVenvRebuild);
        match self.rebuild(context, bootstrap, &configured).await {
            Ok(runtime) => return outcome.healed(runtime),
            Err(detail) => outcome.reject(format!("rebuild-{}", configured.arch), detail),
        }

        outcome.enter(RepairState::NeedsToolchainFallback);
        let fallback = self
            .toolchain(
                "fallback",
                Path::new(FALLBACK_PYTHON),
                Path::new(FALLBACK_UV),
                os_arch,
            )
            .await;
        if fallback.python_bin == configured.python_bin && fallback.uv_bin == configured.uv_bin {
            outcome.reject("fallback", "fallback toolchain is the configured toolchain");
        } else {
            match self.rebuild(context, bootstrap, &fallback).await {
                Ok(runtime) => return outcome.healed(runtime),
                Err(detail) => outcome.reject(format!("fallback-{}", fallback.arch), detail),
            }
        }

        let reason = format!(
            "no runtime for {} could load {}",
            os_arch, bootstrap.library_name
        );
        warn!(%reason, attempts = outcome.attempts.len(), "runtime repair failed");
        outcome.remediation = Some(remediation(os_arch, &outcome.attempts));
        outcome.enter(RepairState::Failed(reason));
        outcome
    }

    async fn rebuild(
        &self,
        context: &ExecutionContext,
        bootstrap: &BootstrapConfig,
        toolchain: &Toolchain,
    ) -> Result<RuntimeCandidate, String> {
        let host = self.environment.host();
        for (tool, path) in [("python", &toolchain.python_bin), ("uv", &toolchain.uv_bin)] {
            if !host.is_executable(path) {
                return Err(format!(
                    "{} toolchain {} is missing: {}",
                    toolchain.name,
                    tool,
                    path.display()
                ));
            }
        }
        if !toolchain.arch.runs_natively_on(&context.os_arch) {
            return Err(format!(
                "{} toolchain is {} on a {} host",
                toolchain.name, toolchain.arch, context.os_arch
            ));
        }

        let candidate = RuntimeCandidate::recovery(&bootstrap.state_dir, toolchain);
        info!(runtime = %candidate.name(), dir = %candidate.venv_dir.display(), "rebuilding runtime");
        self.builder
            .rebuild(&candidate, &bootstrap.project_dir)
            .await
            .map_err(|e| e.to_string())?;

        let report = self
            .environment
            .inspect(context, &candidate, &bootstrap.library_name)
            .await;
        match report.mismatch() {
            None => Ok(candidate),
            Some(_) => Err(format!(
                "rebuilt runtime still unusable: {}",
                report.probe.summarize(&candidate)
            )),
        }
    }
}

fn remediation(os_arch: &Arch, attempts: &[RepairAttempt]) -> String {
    let mut lines = vec![
        format!(
            "Expected an architecture-correct toolchain for {} at:",
            os_arch
        ),
        format!("  python: {}", FALLBACK_PYTHON),
        format!("  uv:     {}", FALLBACK_UV),
        format!("Install it with: {}", FALLBACK_INSTALL_COMMAND),
        "Then rerun: moonshine-flow install-launch-agent".to_string(),
    ];
    if !attempts.is_empty() {
        lines.push("Attempts:".to_string());
        lines.extend(
            attempts
                .iter()
                .map(|a| format!("  - {}: {}", a.runtime, a.detail)),
        );
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::BuildError;
    use crate::domain::permissions::InvocationKind;
    use crate::domain::runtime::ProbeResult;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::path::PathBuf;
    use std::sync::Mutex;

    struct MockHost {
        os: Arch,
        python: Arch,
        executables: HashSet<PathBuf>,
    }

    #[async_trait]
    impl HostInspector for MockHost {
        async fn os_arch(&self) -> Arch {
            self.os.clone()
        }

        async fn interpreter_arch(&self, _python: &Path) -> Arch {
            self.python.clone()
        }

        fn is_executable(&self, path: &Path) -> bool {
            self.executables.contains(path)
        }
    }

    /// Loads only in runtime dirs listed in `working`.
    struct MockProbe {
        working: Mutex<HashSet<PathBuf>>,
    }

    #[async_trait]
    impl RuntimeProbe for MockProbe {
        async fn probe(&self, candidate: &RuntimeCandidate, _library_name: &str) -> ProbeResult {
            if self.working.lock().unwrap().contains(&candidate.venv_dir) {
                ProbeResult {
                    ok: true,
                    python_arch: Some(candidate.toolchain.arch.clone()),
                    ..Default::default()
                }
            } else {
                ProbeResult::failed("incompatible architecture (have 'x86_64', need 'arm64')")
            }
        }
    }

    struct MockBuilder {
        fail: bool,
        stale: bool,
        built: Mutex<Vec<PathBuf>>,
    }

    impl MockBuilder {
        fn new() -> Self {
            Self {
                fail: false,
                stale: false,
                built: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl RuntimeBuilder for &MockBuilder {
        async fn rebuild(&self, candidate: &RuntimeCandidate, _project_dir: &Path) -> Result<(), BuildError> {
            self.built.lock().unwrap().push(candidate.venv_dir.clone());
            if self.fail {
                Err(BuildError::CommandFailed {
                    command: "uv sync".to_string(),
                    code: Some(1),
                    stderr: "resolution failed".to_string(),
                })
            } else {
                Ok(())
            }
        }

        async fn is_stale(&self, _candidate: &RuntimeCandidate, _project_dir: &Path) -> bool {
            self.stale
        }
    }

    fn bootstrap() -> BootstrapConfig {
        BootstrapConfig {
            project_dir: PathBuf::from("/libexec"),
            state_dir: PathBuf::from("/var/mflow"),
            python: PathBuf::from("/usr/local/bin/python3.11"),
            uv: PathBuf::from("/usr/local/bin/uv"),
            daemon_module: "moonshine_flow.daemon".to_string(),
            library_name: "libmoonshine.dylib".to_string(),
        }
    }

    fn context(os: Arch) -> ExecutionContext {
        ExecutionContext {
            binary_path: PathBuf::from("/bin/mflow"),
            invocation_kind: InvocationKind::Terminal,
            resolved_interpreter_arch: Arch::Unknown,
            os_arch: os,
        }
    }

    fn engine<'a>(
        host: MockHost,
        working: &[&str],
        builder: &'a MockBuilder,
    ) -> RuntimeRepairEngine<MockHost, MockProbe, &'a MockBuilder> {
        let probe = MockProbe {
            working: Mutex::new(working.iter().map(PathBuf::from).collect()),
        };
        RuntimeRepairEngine::new(EnvironmentProbe::new(host, probe), builder)
    }

    fn host(os: Arch, python: Arch, executables: &[&str]) -> MockHost {
        MockHost {
            os,
            python,
            executables: executables.iter().map(PathBuf::from).collect(),
        }
    }

    #[tokio::test]
    async fn existing_primary_runtime_is_ok() {
        let builder = MockBuilder::new();
        let engine = engine(
            host(Arch::Arm64, Arch::Arm64, &["/usr/local/bin/python3.11", "/usr/local/bin/uv"]),
            &["/libexec/.venv-arm64"],
            &builder,
        );
        let outcome = engine.repair(&context(Arch::Arm64), &bootstrap()).await;
        assert!(outcome.is_ok());
        assert_eq!(outcome.trail, vec![RepairState::Ok]);
        assert_eq!(
            outcome.runtime.as_ref().unwrap().venv_dir,
            PathBuf::from("/libexec/.venv-arm64")
        );
        assert!(builder.built.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn stale_recovery_runtime_is_rebuilt() {
        let builder = MockBuilder {
            stale: true,
            ..MockBuilder::new()
        };
        let engine = engine(
            host(Arch::Arm64, Arch::Arm64, &["/usr/local/bin/python3.11", "/usr/local/bin/uv"]),
            &["/var/mflow/.venv-arm64"],
            &builder,
        );
        let outcome = engine.repair(&context(Arch::Arm64), &bootstrap()).await;
        assert_eq!(
            outcome.trail,
            vec![RepairState::NeedsVenvRebuild, RepairState::Ok]
        );
        assert_eq!(outcome.describe_trail(), "needs-venv-rebuild -> ok");
        assert_eq!(
            *builder.built.lock().unwrap(),
            vec![PathBuf::from("/var/mflow/.venv-arm64")]
        );
    }

    #[tokio::test]
    async fn foreign_arch_toolchains_are_never_rebuilt() {
        let builder = MockBuilder::new();
        // Every interpreter reports x86_64 on an arm64 host.
        let engine = engine(
            host(
                Arch::Arm64,
                Arch::X86_64,
                &["/usr/local/bin/python3.11", "/usr/local/bin/uv", FALLBACK_PYTHON, FALLBACK_UV],
            ),
            &["/var/mflow/.venv-x86_64"],
            &builder,
        );
        let outcome = engine.repair(&context(Arch::Arm64), &bootstrap()).await;
        assert!(!outcome.is_ok());
        assert!(builder.built.lock().unwrap().is_empty());
        assert_eq!(outcome.trail.len(), 3);
    }

    #[tokio::test]
    async fn failed_rebuild_escalates_to_fallback() {
        let builder = MockBuilder {
            fail: true,
            ..MockBuilder::new()
        };
        let engine = engine(
            host(
                Arch::Arm64,
                Arch::Arm64,
                &["/usr/local/bin/python3.11", "/usr/local/bin/uv", FALLBACK_PYTHON, FALLBACK_UV],
            ),
            &[],
            &builder,
        );
        let outcome = engine.repair(&context(Arch::Arm64), &bootstrap()).await;
        assert_eq!(builder.built.lock().unwrap().len(), 2);
        assert!(matches!(outcome.state, RepairState::Failed(_)));
        assert!(outcome
            .attempts
            .iter()
            .any(|a| a.detail.contains("resolution failed")));
    }

    #[tokio::test]
    async fn missing_toolchains_fail_with_remediation() {
        let builder = MockBuilder::new();
        let engine = engine(host(Arch::Arm64, Arch::Unknown, &[]), &[], &builder);
        let outcome = engine.repair(&context(Arch::Arm64), &bootstrap()).await;

        assert_eq!(
            &outcome.trail[..2],
            &[RepairState::NeedsVenvRebuild, RepairState::NeedsToolchainFallback]
        );
        let err = outcome.into_runtime().unwrap_err();
        match err {
            FlowError::RepairFailed { remediation, .. } => {
                assert!(remediation.contains(FALLBACK_PYTHON));
                assert!(remediation.contains(FALLBACK_INSTALL_COMMAND));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(builder.built.lock().unwrap().is_empty());
    }
}
