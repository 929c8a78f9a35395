//! Daemon runtime model: toolchains, runtime candidates and repair states

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

use super::arch::Arch;

pub const DEFAULT_DAEMON_MODULE: &str = "moonshine_flow.daemon";
pub const DEFAULT_LIBRARY_NAME: &str = "libmoonshine.dylib";

/// Well-known prefix of an architecture-correct fallback toolchain on
/// Apple Silicon.
pub const FALLBACK_PYTHON: &str = "/opt/homebrew/opt/python@3.11/bin/python3.11";
pub const FALLBACK_UV: &str = "/opt/homebrew/opt/uv/bin/uv";
pub const FALLBACK_INSTALL_COMMAND: &str = "arch -arm64 /opt/homebrew/bin/brew install python@3.11 uv";

/// Everything the launcher needs to locate and repair the daemon runtime.
/// Persisted as `bootstrap.json` inside the app bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapConfig {
    /// Daemon project root (`pyproject.toml`, `uv.lock`, `src/`)
    pub project_dir: PathBuf,
    /// Writable state root for recovery runtimes
    pub state_dir: PathBuf,
    pub python: PathBuf,
    pub uv: PathBuf,
    #[serde(default = "default_daemon_module")]
    pub daemon_module: String,
    #[serde(default = "default_library_name")]
    pub library_name: String,
}

fn default_daemon_module() -> String {
    DEFAULT_DAEMON_MODULE.to_string()
}

fn default_library_name() -> String {
    DEFAULT_LIBRARY_NAME.to_string()
}

impl BootstrapConfig {
    /// Canonical serialized form; the bundle digest is taken over these bytes.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut text = serde_json::to_string_pretty(self)?;
        text.push('\n');
        Ok(text.into_bytes())
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn src_dir(&self) -> PathBuf {
        self.project_dir.join("src")
    }
}

/// One python + uv pair able to build a runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Toolchain {
    pub name: String,
    pub python_bin: PathBuf,
    pub uv_bin: PathBuf,
    pub arch: Arch,
}

impl Toolchain {
    pub fn new(
        name: impl Into<String>,
        python_bin: impl Into<PathBuf>,
        uv_bin: impl Into<PathBuf>,
        arch: Arch,
    ) -> Self {
        Self {
            name: name.into(),
            python_bin: python_bin.into(),
            uv_bin: uv_bin.into(),
            arch,
        }
    }
}

/// Which isolated runtime directory a candidate refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CandidateKind {
    /// `<project>/.venv-<arch>`
    Primary,
    /// `<project>/.venv`
    Legacy,
    /// `<state>/.venv-<arch>`, the only one this core rebuilds
    Recovery,
}

/// An isolated runtime directory paired with the toolchain that owns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuntimeCandidate {
    pub kind: CandidateKind,
    pub venv_dir: PathBuf,
    pub toolchain: Toolchain,
}

impl RuntimeCandidate {
    pub fn primary(project_dir: &Path, toolchain: &Toolchain) -> Self {
        Self {
            kind: CandidateKind::Primary,
            venv_dir: project_dir.join(format!(".venv-{}", toolchain.arch)),
            toolchain: toolchain.clone(),
        }
    }

    pub fn legacy(project_dir: &Path, toolchain: &Toolchain) -> Self {
        Self {
            kind: CandidateKind::Legacy,
            venv_dir: project_dir.join(".venv"),
            toolchain: toolchain.clone(),
        }
    }

    pub fn recovery(state_dir: &Path, toolchain: &Toolchain) -> Self {
        Self {
            kind: CandidateKind::Recovery,
            venv_dir: state_dir.join(format!(".venv-{}", toolchain.arch)),
            toolchain: toolchain.clone(),
        }
    }

    pub fn name(&self) -> String {
        let prefix = match self.kind {
            CandidateKind::Primary => "primary",
            CandidateKind::Legacy => "primary-legacy",
            CandidateKind::Recovery => "recovery",
        };
        format!("{}-{}", prefix, self.toolchain.arch)
    }

    pub fn python_path(&self) -> PathBuf {
        self.venv_dir.join("bin").join("python")
    }

    /// Command line that starts the daemon from this runtime.
    pub fn daemon_command(&self, daemon_module: &str, args: &[String]) -> Vec<String> {
        let mut command = vec![
            self.python_path().to_string_lossy().to_string(),
            "-m".to_string(),
            daemon_module.to_string(),
        ];
        command.extend(args.iter().cloned());
        command
    }
}

/// Fingerprint of the inputs a runtime was built from. A recovery runtime
/// whose recorded fingerprint differs is rebuilt even if it still loads.
pub fn runtime_fingerprint(pyproject: &[u8], lock: &[u8], toolchain: &Toolchain) -> String {
    let mut hasher = Sha256::new();
    hasher.update(pyproject);
    hasher.update(b"\0");
    hasher.update(lock);
    hasher.update(b"\0");
    hasher.update(toolchain.arch.as_str().as_bytes());
    hasher.update(b"\0");
    hasher.update(toolchain.python_bin.to_string_lossy().as_bytes());
    hasher.update(b"\0");
    hasher.update(toolchain.uv_bin.to_string_lossy().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Result of probing one runtime candidate. A failed probe is data, not an error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProbeResult {
    pub ok: bool,
    pub python_arch: Option<Arch>,
    pub lib_path: Option<String>,
    pub lib_arches: Option<String>,
    pub error: Option<String>,
    pub stderr: Option<String>,
    pub exit_code: Option<i32>,
}

impl ProbeResult {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// One-line summary used in failure reports.
    pub fn summarize(&self, candidate: &RuntimeCandidate) -> String {
        let python = candidate.python_path();
        if self.ok {
            return format!("ok (python={})", python.display());
        }
        let mut parts = vec![format!("python={}", python.display())];
        if let Some(arch) = &self.python_arch {
            parts.push(format!("python_arch={}", arch));
        }
        if let Some(arches) = &self.lib_arches {
            parts.push(format!("lib_arches={}", arches));
        }
        if let Some(lib) = &self.lib_path {
            parts.push(format!("lib={}", lib));
        }
        match (&self.error, &self.stderr) {
            (Some(error), _) => parts.push(format!("error={}", error)),
            (None, Some(stderr)) => parts.push(format!("stderr={}", stderr)),
            (None, None) => {}
        }
        if let Some(code) = self.exit_code {
            parts.push(format!("exit={}", code));
        }
        parts.join("; ")
    }
}

/// Transient repair state, computed per startup and never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RepairState {
    Ok,
    NeedsVenvRebuild,
    NeedsToolchainFallback,
    Failed(String),
}

impl fmt::Display for RepairState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepairState::Ok => write!(f, "ok"),
            RepairState::NeedsVenvRebuild => write!(f, "needs-venv-rebuild"),
            RepairState::NeedsToolchainFallback => write!(f, "needs-toolchain-fallback"),
            RepairState::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toolchain() -> Toolchain {
        Toolchain::new("primary", "/usr/local/bin/python3.11", "/usr/local/bin/uv", Arch::X86_64)
    }

    #[test]
    fn candidate_dirs_are_arch_suffixed() {
        let tc = toolchain();
        let primary = RuntimeCandidate::primary(Path::new("/libexec"), &tc);
        let recovery = RuntimeCandidate::recovery(Path::new("/var/mflow"), &tc);
        assert_eq!(primary.venv_dir, PathBuf::from("/libexec/.venv-x86_64"));
        assert_eq!(recovery.venv_dir, PathBuf::from("/var/mflow/.venv-x86_64"));
        assert_eq!(recovery.name(), "recovery-x86_64");
        assert_eq!(
            RuntimeCandidate::legacy(Path::new("/libexec"), &tc).python_path(),
            PathBuf::from("/libexec/.venv/bin/python")
        );
    }

    #[test]
    fn daemon_command_appends_args() {
        let candidate = RuntimeCandidate::recovery(Path::new("/var"), &toolchain());
        let command = candidate.daemon_command("pkg.daemon", &["--config".to_string(), "x".to_string()]);
        assert_eq!(command[0], "/var/.venv-x86_64/bin/python");
        assert_eq!(&command[1..], &["-m", "pkg.daemon", "--config", "x"]);
    }

    #[test]
    fn bootstrap_config_defaults_optional_fields() {
        let json = r#"{"project_dir":"/p","state_dir":"/s","python":"/py","uv":"/uv"}"#;
        let config = BootstrapConfig::from_json(json).unwrap();
        assert_eq!(config.daemon_module, DEFAULT_DAEMON_MODULE);
        assert_eq!(config.library_name, DEFAULT_LIBRARY_NAME);
        assert_eq!(config.src_dir(), PathBuf::from("/p/src"));
    }

    #[test]
    fn fingerprint_tracks_lock_and_toolchain() {
        let tc = toolchain();
        let base = runtime_fingerprint(b"[project]", b"lock-1", &tc);
        assert_eq!(base, runtime_fingerprint(b"[project]", b"lock-1", &tc));
        assert_ne!(base, runtime_fingerprint(b"[project]", b"lock-2", &tc));

        let arm = Toolchain::new("fallback", "/usr/local/bin/python3.11", "/usr/local/bin/uv", Arch::Arm64);
        assert_ne!(base, runtime_fingerprint(b"[project]", b"lock-1", &arm));
    }

    #[test]
    fn probe_summary_lists_details() {
        let candidate = RuntimeCandidate::recovery(Path::new("/var"), &toolchain());
        let probe = ProbeResult {
            python_arch: Some(Arch::X86_64),
            error: Some("incompatible architecture".to_string()),
            exit_code: Some(2),
            ..Default::default()
        };
        let summary = probe.summarize(&candidate);
        assert!(summary.contains("python_arch=x86_64"));
        assert!(summary.contains("error=incompatible architecture"));
        assert!(summary.ends_with("exit=2"));
    }
}
