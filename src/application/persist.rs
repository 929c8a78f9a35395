//! Install lock and atomic file writes shared by the installers

use std::fs::{File, OpenOptions};
use std::path::Path;

use fs2::FileExt;

use super::error::FlowError;

/// Install lock file name under the state directory
pub const INSTALL_LOCK_FILE: &str = "bundle.lock";

/// Exclusive install lock, released on drop.
pub struct InstallLock {
    _file: File,
}

impl InstallLock {
    /// Take the lock without blocking. A held lock is `FlowError::Lock`.
    pub fn acquire(path: &Path) -> Result<Self, FlowError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| FlowError::io(format!("Failed to create {}", parent.display()), e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(|e| FlowError::io(format!("Failed to open {}", path.display()), e))?;
        file.try_lock_exclusive()
            .map_err(|_| FlowError::Lock(path.to_path_buf()))?;
        Ok(Self { _file: file })
    }
}

/// Write via a sibling temp file and rename, so readers never see a
/// partially written file.
pub async fn write_atomic(path: &Path, bytes: &[u8], mode: u32) -> Result<(), FlowError> {
    let parent = path
        .parent()
        .ok_or_else(|| FlowError::NotConfigured(format!("Invalid path: {}", path.display())))?;
    tokio::fs::create_dir_all(parent)
        .await
        .map_err(|e| FlowError::io(format!("Failed to create {}", parent.display()), e))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let tmp = parent.join(format!(".{}.tmp", file_name));
    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|e| FlowError::io(format!("Failed to write {}", tmp.display()), e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(mode))
            .await
            .map_err(|e| FlowError::io(format!("Failed to chmod {}", tmp.display()), e))?;
    }
    #[cfg(not(unix))]
    let _ = mode;

    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| FlowError::io(format!("Failed to move {} into place", path.display()), e))
}
