//! Environment probe use case

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::domain::arch::Arch;
use crate::domain::permissions::{ExecutionContext, InvocationKind};
use crate::domain::runtime::{ProbeResult, RuntimeCandidate};

use super::error::FlowError;
use super::ports::{HostInspector, RuntimeProbe};

/// Architecture facts and native library loadability for one runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvironmentReport {
    pub os_arch: Arch,
    pub interpreter_arch: Arch,
    pub native_library_loadable: bool,
    pub runtime: String,
    pub python: PathBuf,
    pub probe: ProbeResult,
}

impl EnvironmentReport {
    /// Reason this runtime cannot be used as-is, if any.
    pub fn mismatch(&self) -> Option<String> {
        if !self.interpreter_arch.runs_natively_on(&self.os_arch) {
            return Some(format!(
                "interpreter arch {} does not match host arch {}",
                self.interpreter_arch, self.os_arch
            ));
        }
        if !self.native_library_loadable {
            let detail = self
                .probe
                .error
                .clone()
                .unwrap_or_else(|| "native library failed to load".to_string());
            return Some(detail);
        }
        None
    }

    pub fn ensure_usable(&self) -> Result<(), FlowError> {
        match self.mismatch() {
            Some(reason) => Err(FlowError::EnvironmentMismatch(format!("{}: {}", self.runtime, reason))),
            None => Ok(()),
        }
    }

    /// Apple Silicon host running an x86_64 interpreter through Rosetta.
    pub fn is_rosetta(&self) -> bool {
        self.os_arch == Arch::Arm64 && self.interpreter_arch == Arch::X86_64
    }
}

/// Detects host/interpreter architecture and whether the speech library loads.
pub struct EnvironmentProbe<H, P>
where
    H: HostInspector,
    P: RuntimeProbe,
{
    host: H,
    probe: P,
}

impl<H, P> EnvironmentProbe<H, P>
where
    H: HostInspector,
    P: RuntimeProbe,
{
    pub fn new(host: H, probe: P) -> Self {
        Self { host, probe }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    /// Build the execution context for this invocation.
    pub async fn context(
        &self,
        binary_path: &Path,
        invocation_kind: InvocationKind,
        interpreter: Option<&Path>,
    ) -> ExecutionContext {
        let os_arch = self.host.os_arch().await;
        let resolved_interpreter_arch = match interpreter {
            Some(python) if self.host.is_executable(python) => {
                self.host.interpreter_arch(python).await
            }
            _ => Arch::Unknown,
        };
        ExecutionContext {
            binary_path: binary_path.to_path_buf(),
            invocation_kind,
            resolved_interpreter_arch,
            os_arch,
        }
    }

    /// Probe one runtime candidate in `context`. Never fails: load errors
    /// are reported as `native_library_loadable = false`.
    pub async fn inspect(
        &self,
        context: &ExecutionContext,
        candidate: &RuntimeCandidate,
        library_name: &str,
    ) -> EnvironmentReport {
        let probe = self.probe.probe(candidate, library_name).await;
        let interpreter_arch = probe
            .python_arch
            .clone()
            .filter(Arch::is_known)
            .unwrap_or_else(|| context.resolved_interpreter_arch.clone());
        EnvironmentReport {
            os_arch: context.os_arch.clone(),
            interpreter_arch,
            native_library_loadable: probe.ok,
            runtime: candidate.name(),
            python: candidate.python_path(),
            probe,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::runtime::Toolchain;
    use async_trait::async_trait;

    struct MockHost {
        os: Arch,
        python: Arch,
    }

    #[async_trait]
    impl HostInspector for MockHost {
        async fn os_arch(&self) -> Arch {
            self.os.clone()
        }

        async fn interpreter_arch(&self, _python: &Path) -> Arch {
            self.python.clone()
        }

        fn is_executable(&self, _path: &Path) -> bool {
            true
        }
    }

    struct MockProbe(ProbeResult);

    #[async_trait]
    impl RuntimeProbe for MockProbe {
        async fn probe(&self, _candidate: &RuntimeCandidate, _library_name: &str) -> ProbeResult {
            self.0.clone()
        }
    }

    fn candidate() -> RuntimeCandidate {
        let tc = Toolchain::new("configured", "/py", "/uv", Arch::Arm64);
        RuntimeCandidate::primary(Path::new("/libexec"), &tc)
    }

    async fn report(os: Arch, python: Arch, probe: ProbeResult) -> EnvironmentReport {
        let env = EnvironmentProbe::new(MockHost { os, python }, MockProbe(probe));
        let ctx = env
            .context(Path::new("/bin/mflow"), InvocationKind::Terminal, Some(Path::new("/py")))
            .await;
        env.inspect(&ctx, &candidate(), "libmoonshine.dylib").await
    }

    #[tokio::test]
    async fn loadable_native_runtime_is_usable() {
        let probe = ProbeResult {
            ok: true,
            python_arch: Some(Arch::Arm64),
            ..Default::default()
        };
        let report = report(Arch::Arm64, Arch::Arm64, probe).await;
        assert!(report.native_library_loadable);
        assert!(report.mismatch().is_none());
        assert!(report.ensure_usable().is_ok());
    }

    #[tokio::test]
    async fn load_failure_is_data_not_error() {
        let report = report(
            Arch::Arm64,
            Arch::Arm64,
            ProbeResult::failed("dlopen: image not found"),
        )
        .await;
        assert!(!report.native_library_loadable);
        assert_eq!(report.mismatch().as_deref(), Some("dlopen: image not found"));
        assert!(matches!(
            report.ensure_usable(),
            Err(FlowError::EnvironmentMismatch(_))
        ));
    }

    #[tokio::test]
    async fn probe_arch_wins_over_context_arch() {
        let probe = ProbeResult {
            ok: true,
            python_arch: Some(Arch::X86_64),
            ..Default::default()
        };
        let report = report(Arch::Arm64, Arch::Arm64, probe).await;
        assert_eq!(report.interpreter_arch, Arch::X86_64);
        assert!(report.is_rosetta());
        assert!(report.mismatch().unwrap().contains("does not match"));
    }
}
