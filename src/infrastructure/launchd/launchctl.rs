//! Service manager adapter using launchctl

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use super::{current_uid, LAUNCHCTL};
use crate::application::ports::{LaunchdError, ServiceManager};
use crate::infrastructure::process::{self, CommandOutput, ProcessError};

/// launchctl adapter scoped to the user's GUI domain
pub struct LaunchctlService {
    uid: u32,
    timeout: Duration,
}

impl LaunchctlService {
    pub fn new(timeout: Duration) -> Self {
        Self::for_uid(current_uid(), timeout)
    }

    pub fn for_uid(uid: u32, timeout: Duration) -> Self {
        Self { uid, timeout }
    }

    fn domain(&self) -> String {
        format!("gui/{}", self.uid)
    }

    async fn launchctl(&self, operation: &str, args: &[&str]) -> Result<CommandOutput, LaunchdError> {
        let mut cmd = Command::new(LAUNCHCTL);
        cmd.arg(operation).args(args);
        process::output(cmd, self.timeout)
            .await
            .map_err(|e| match e {
                ProcessError::NotFound(_) => LaunchdError::ToolNotFound,
                ProcessError::Timeout { .. } => LaunchdError::Timeout(operation.to_string()),
                ProcessError::Io { message, .. } => LaunchdError::Io(message),
            })
    }

    async fn checked(&self, operation: &str, args: &[&str]) -> Result<(), LaunchdError> {
        let output = self.launchctl(operation, args).await?;
        if output.success() {
            Ok(())
        } else {
            Err(LaunchdError::Failed {
                operation: operation.to_string(),
                stderr: output.failure_detail(),
            })
        }
    }
}

#[async_trait]
impl ServiceManager for LaunchctlService {
    async fn bootstrap(&self, registration: &Path) -> Result<(), LaunchdError> {
        let path = registration.to_string_lossy();
        self.checked("bootstrap", &[&self.domain(), &path]).await
    }

    async fn bootout(&self, registration: &Path) -> Result<(), LaunchdError> {
        let path = registration.to_string_lossy();
        self.checked("bootout", &[&self.domain(), &path]).await
    }

    async fn kickstart(&self, label: &str) -> Result<(), LaunchdError> {
        let target = format!("{}/{}", self.domain(), label);
        self.checked("kickstart", &["-k", &target]).await
    }

    async fn is_loaded(&self, label: &str) -> bool {
        let target = format!("{}/{}", self.domain(), label);
        matches!(self.launchctl("print", &[&target]).await, Ok(out) if out.success())
    }
}
