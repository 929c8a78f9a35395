//! Host and interpreter architecture inspection

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::application::ports::HostInspector;
use crate::domain::arch::Arch;
use crate::infrastructure::process;

const SYSCTL: &str = "/usr/sbin/sysctl";
const LIPO: &str = "/usr/bin/lipo";
const FILE: &str = "/usr/bin/file";

/// Inspects the running machine with stock macOS tools
pub struct SystemHostInspector {
    timeout: Duration,
}

impl SystemHostInspector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Trimmed stdout of a successful command, `None` otherwise.
    async fn stdout_of(&self, cmd: Command) -> Option<String> {
        match process::output(cmd, self.timeout).await {
            Ok(out) if out.success() => {
                let text = out.stdout.trim().to_string();
                (!text.is_empty()).then_some(text)
            }
            Ok(out) => {
                debug!(detail = %out.failure_detail(), "arch probe failed");
                None
            }
            Err(e) => {
                debug!(error = %e, "arch probe failed");
                None
            }
        }
    }

    async fn translated_arm64(&self) -> bool {
        let mut cmd = Command::new(SYSCTL);
        cmd.args(["-n", "hw.optional.arm64"]);
        self.stdout_of(cmd).await.as_deref() == Some("1")
    }
}

#[async_trait]
impl HostInspector for SystemHostInspector {
    async fn os_arch(&self) -> Arch {
        let compiled = Arch::compiled();
        if cfg!(target_os = "macos") && compiled == Arch::X86_64 && self.translated_arm64().await {
            return Arch::Arm64;
        }
        compiled
    }

    async fn interpreter_arch(&self, python: &Path) -> Arch {
        let mut cmd = Command::new(python);
        cmd.args(["-c", "import platform; print(platform.machine())"]);
        if let Some(machine) = self.stdout_of(cmd).await {
            let arch = Arch::normalize(&machine);
            if arch.is_known() {
                return arch;
            }
        }

        for tool in [LIPO, FILE] {
            let mut cmd = Command::new(tool);
            if tool == LIPO {
                cmd.arg("-archs");
            }
            cmd.arg(python);
            if let Some(text) = self.stdout_of(cmd).await {
                return Arch::normalize(&text);
            }
        }
        Arch::Unknown
    }

    fn is_executable(&self, path: &Path) -> bool {
        is_executable_file(path)
    }
}

pub(crate) fn is_executable_file(path: &Path) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    if !meta.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}
