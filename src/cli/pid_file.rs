//! PID file guarding the daemon launcher

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process;

use crate::application::FlowError;

const PID_FILE_NAME: &str = "daemon.pid";

/// `<state_dir>/daemon.pid`
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn in_state_dir(state_dir: &Path) -> Self {
        Self::with_path(state_dir.join(PID_FILE_NAME))
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// PID of a live launcher holding the file. A stale file is removed.
    pub fn is_running(&self) -> Option<u32> {
        let mut contents = String::new();
        File::open(&self.path)
            .and_then(|mut f| f.read_to_string(&mut contents))
            .ok()?;
        let pid: u32 = contents.trim().parse().ok()?;
        if pid == process::id() {
            return None;
        }

        if process_alive(pid) {
            Some(pid)
        } else {
            let _ = fs::remove_file(&self.path);
            None
        }
    }

    /// Write our PID, failing if another launcher is alive.
    pub fn acquire(&self) -> Result<(), FlowError> {
        if let Some(pid) = self.is_running() {
            return Err(FlowError::AlreadyRunning(pid));
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| FlowError::io(format!("Failed to create {}", parent.display()), e))?;
        }

        let mut file = File::create(&self.path)
            .map_err(|e| FlowError::io("Failed to create PID file", e))?;
        write!(file, "{}", process::id()).map_err(|e| FlowError::io("Failed to write PID", e))
    }

    pub fn release(&self) {
        let _ = fs::remove_file(&self.path);
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        // Only remove a file we wrote.
        let ours = fs::read_to_string(&self.path)
            .map(|c| c.trim() == process::id().to_string())
            .unwrap_or(false);
        if ours {
            self.release();
        }
    }
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    // Signal 0 only checks existence; EPERM means it exists under another user.
    match kill(Pid::from_raw(pid as i32), None) {
        Ok(()) => true,
        Err(nix::errno::Errno::ESRCH) => false,
        Err(_) => true,
    }
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    false
}
