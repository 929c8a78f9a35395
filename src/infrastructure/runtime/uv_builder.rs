//! Runtime builder using `python -m venv` and `uv sync`

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info};

use super::host::is_executable_file;
use crate::application::ports::{BuildError, RuntimeBuilder};
use crate::domain::runtime::{runtime_fingerprint, RuntimeCandidate, Toolchain};
use crate::infrastructure::process::{self, display_command, ProcessError};

const REQUIRED_PROJECT_FILES: [&str; 2] = ["pyproject.toml", "uv.lock"];

/// Builds recovery runtimes and records the fingerprint they were built from
pub struct UvRuntimeBuilder {
    state_dir: PathBuf,
    timeout: Duration,
    /// Stream tool output to the terminal instead of capturing it
    verbose: bool,
}

impl UvRuntimeBuilder {
    pub fn new(state_dir: impl Into<PathBuf>, timeout: Duration, verbose: bool) -> Self {
        Self {
            state_dir: state_dir.into(),
            timeout,
            verbose,
        }
    }

    pub fn fingerprint_path(&self, toolchain: &Toolchain) -> PathBuf {
        let scope: String = toolchain
            .arch
            .as_str()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
            .collect();
        self.state_dir
            .join(format!("runtime-fingerprint-{}.txt", scope))
    }

    async fn current_fingerprint(&self, project_dir: &Path, toolchain: &Toolchain) -> Option<String> {
        let pyproject = fs::read(project_dir.join("pyproject.toml")).await.ok()?;
        let lock = fs::read(project_dir.join("uv.lock")).await.ok()?;
        Some(runtime_fingerprint(&pyproject, &lock, toolchain))
    }

    fn validate_project(project_dir: &Path) -> Result<(), BuildError> {
        let missing: Vec<&str> = REQUIRED_PROJECT_FILES
            .iter()
            .copied()
            .filter(|name| !project_dir.join(name).is_file())
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        Err(BuildError::ProjectIncomplete {
            missing: missing.join(", "),
            project_dir: project_dir.display().to_string(),
        })
    }

    fn validate_toolchain(toolchain: &Toolchain) -> Result<(), BuildError> {
        for tool in [&toolchain.python_bin, &toolchain.uv_bin] {
            if !is_executable_file(tool) {
                return Err(BuildError::MissingCommand(tool.display().to_string()));
            }
        }
        Ok(())
    }

    async fn run(&self, cmd: Command) -> Result<(), BuildError> {
        let std_cmd = cmd.as_std();
        let command = display_command(std_cmd.get_program(), std_cmd.get_args());
        debug!(command = %command, "runtime build step");

        let map_err = |e: ProcessError| match e {
            ProcessError::NotFound(program) => BuildError::MissingCommand(program),
            ProcessError::Timeout { .. } => BuildError::Timeout(command.clone()),
            ProcessError::Io { message, .. } => BuildError::Io(message),
        };

        if self.verbose {
            let status = process::status(cmd, self.timeout).await.map_err(map_err)?;
            if !status.success() {
                return Err(BuildError::CommandFailed {
                    command,
                    code: status.code(),
                    stderr: String::new(),
                });
            }
        } else {
            let output = process::output(cmd, self.timeout).await.map_err(map_err)?;
            if !output.success() {
                return Err(BuildError::CommandFailed {
                    command,
                    code: output.code(),
                    stderr: output.stderr.trim().to_string(),
                });
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RuntimeBuilder for UvRuntimeBuilder {
    async fn rebuild(&self, candidate: &RuntimeCandidate, project_dir: &Path) -> Result<(), BuildError> {
        Self::validate_project(project_dir)?;
        let toolchain = &candidate.toolchain;
        Self::validate_toolchain(toolchain)?;

        let venv = &candidate.venv_dir;
        info!(venv = %venv.display(), toolchain = %toolchain.name, "rebuilding runtime");
        if let Some(parent) = venv.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| BuildError::Io(e.to_string()))?;
        }
        if venv.exists() {
            fs::remove_dir_all(venv)
                .await
                .map_err(|e| BuildError::Io(format!("{}: {}", venv.display(), e)))?;
        }

        let mut create = Command::new(&toolchain.python_bin);
        create.args(["-m", "venv"]).arg(venv);
        self.run(create).await?;

        let mut path = OsString::from(venv.join("bin"));
        if let Some(existing) = std::env::var_os("PATH") {
            path.push(":");
            path.push(existing);
        }
        let mut sync = Command::new(&toolchain.uv_bin);
        sync.arg("sync")
            .arg("--project")
            .arg(project_dir)
            .args(["--frozen", "--active"])
            .env("UV_PROJECT", project_dir)
            .env("UV_PYTHON", &toolchain.python_bin)
            .env("UV_PYTHON_DOWNLOADS", "never")
            .env("VIRTUAL_ENV", venv)
            .env("PATH", path);
        self.run(sync).await?;

        if let Some(fingerprint) = self.current_fingerprint(project_dir, toolchain).await {
            let file = self.fingerprint_path(toolchain);
            fs::create_dir_all(&self.state_dir)
                .await
                .map_err(|e| BuildError::Io(e.to_string()))?;
            fs::write(&file, format!("{}\n", fingerprint))
                .await
                .map_err(|e| BuildError::Io(format!("{}: {}", file.display(), e)))?;
        }
        Ok(())
    }

    async fn is_stale(&self, candidate: &RuntimeCandidate, project_dir: &Path) -> bool {
        let Some(current) = self.current_fingerprint(project_dir, &candidate.toolchain).await else {
            return true;
        };
        match fs::read_to_string(self.fingerprint_path(&candidate.toolchain)).await {
            Ok(recorded) => recorded.trim() != current,
            Err(_) => true,
        }
    }
}
