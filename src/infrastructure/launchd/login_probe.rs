//! Permission check in the login-service context via `launchctl asuser`

use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::{current_uid, LAUNCHCTL};
use crate::application::error::{EXIT_PERMISSION_INCOMPLETE, EXIT_SUCCESS};
use crate::application::ports::{LoginContextProbe, ProbeError};
use crate::domain::permissions::PermissionSet;
use crate::infrastructure::process;

/// Runs `launchctl asuser <uid> <command>` and parses its permission report
pub struct LaunchctlLoginProbe {
    uid: u32,
    timeout: Duration,
}

impl LaunchctlLoginProbe {
    pub fn new(timeout: Duration) -> Self {
        Self {
            uid: current_uid(),
            timeout,
        }
    }
}

#[async_trait]
impl LoginContextProbe for LaunchctlLoginProbe {
    async fn check(&self, command: &[String]) -> Result<PermissionSet, ProbeError> {
        if command.is_empty() {
            return Err(ProbeError::Launch("empty permission check command".to_string()));
        }
        let mut cmd = Command::new(LAUNCHCTL);
        cmd.arg("asuser").arg(self.uid.to_string()).args(command);

        let output = process::output(cmd, self.timeout)
            .await
            .map_err(|e| ProbeError::Launch(e.to_string()))?;
        debug!(code = ?output.code(), "login-context permission check finished");

        interpret_report(output.code(), &output.stdout, &output.stderr)
    }
}

/// `check-permissions` exits 0 when everything is granted and 3 when
/// something is missing. Any other status means the report can't be trusted.
fn interpret_report(code: Option<i32>, stdout: &str, stderr: &str) -> Result<PermissionSet, ProbeError> {
    let exit_code = code.and_then(|c| u8::try_from(c).ok());
    if !matches!(exit_code, Some(EXIT_SUCCESS | EXIT_PERMISSION_INCOMPLETE)) {
        return Err(ProbeError::UnexpectedExit {
            exit_code: code,
            stdout: stdout.trim().to_string(),
            stderr: stderr.trim().to_string(),
        });
    }

    let combined = format!("{}\n{}", stdout, stderr);
    PermissionSet::parse_report(&combined).ok_or_else(|| ProbeError::Unparseable {
        exit_code: code,
        stdout: stdout.trim().to_string(),
        stderr: stderr.trim().to_string(),
    })
}
