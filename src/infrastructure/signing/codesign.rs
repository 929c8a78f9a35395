//! Ad-hoc signing with the macOS `codesign` tool

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::application::ports::{CodeSigner, SigningError};
use crate::domain::bundle::{BundleLayout, CodeIdentity};
use crate::infrastructure::process::{self, ProcessError};

const CODESIGN: &str = "/usr/bin/codesign";

/// `codesign` adapter
pub struct CodesignSigner {
    timeout: Duration,
}

impl CodesignSigner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn map_error(&self, e: ProcessError) -> SigningError {
        match e {
            ProcessError::NotFound(_) => SigningError::ToolNotFound,
            ProcessError::Timeout { secs, .. } => SigningError::Timeout(secs),
            ProcessError::Io { message, .. } => SigningError::Io(message),
        }
    }
}

/// Extract the `CDHash=` value from `codesign --display --verbose=4` output.
fn parse_cdhash(text: &str) -> Option<String> {
    text.lines()
        .find_map(|line| line.trim().strip_prefix("CDHash="))
        .map(|hash| hash.trim().to_string())
        .filter(|hash| !hash.is_empty())
}

#[async_trait]
impl CodeSigner for CodesignSigner {
    async fn sign(&self, bundle: &Path, identifier: &str) -> Result<(), SigningError> {
        let mut cmd = Command::new(CODESIGN);
        cmd.args(["--force", "--deep", "--sign", "-", "--identifier", identifier])
            .arg(bundle);

        let output = process::output(cmd, self.timeout)
            .await
            .map_err(|e| self.map_error(e))?;
        if !output.success() {
            return Err(SigningError::Failed {
                status: output.status.to_string(),
                stderr: output.failure_detail(),
            });
        }
        Ok(())
    }

    async fn identity(&self, bundle: &Path) -> Result<Option<CodeIdentity>, SigningError> {
        let mut cmd = Command::new(CODESIGN);
        cmd.args(["--display", "--verbose=4"]).arg(bundle);

        let output = process::output(cmd, self.timeout)
            .await
            .map_err(|e| self.map_error(e))?;
        if !output.success() {
            // Unsigned or not a bundle
            return Ok(None);
        }

        // codesign writes its display output to stderr
        let text = format!("{}\n{}", output.stderr, output.stdout);
        let Some(signature_hash) = parse_cdhash(&text) else {
            return Ok(None);
        };
        let executable_mtime = tokio::fs::metadata(BundleLayout::new(bundle).executable())
            .await
            .and_then(|m| m.modified())
            .ok();

        Ok(Some(CodeIdentity {
            signature_hash,
            executable_mtime,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_cdhash_line() {
        let text = "\
Executable=/Users/me/Applications/MoonshineFlow.app/Contents/MacOS/MoonshineFlow
Identifier=com.moonshineflow.app
Format=app bundle with Mach-O thin (arm64)
CodeDirectory v=20400 size=1234 flags=0x2(adhoc) hashes=28+7 location=embedded
CDHash=3f1c2a9e0b7d4e5f6a7b8c9d0e1f2a3b4c5d6e7f
Signature=adhoc
";
        assert_eq!(
            parse_cdhash(text).as_deref(),
            Some("3f1c2a9e0b7d4e5f6a7b8c9d0e1f2a3b4c5d6e7f")
        );
    }

    #[test]
    fn missing_cdhash_is_none() {
        assert_eq!(parse_cdhash("code object is not signed at all"), None);
        assert_eq!(parse_cdhash("CDHash=\n"), None);
    }
}
