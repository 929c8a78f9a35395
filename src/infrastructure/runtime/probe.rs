//! Runtime probe that loads the native speech library inside a candidate

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use super::host::is_executable_file;
use crate::application::ports::RuntimeProbe;
use crate::domain::arch::Arch;
use crate::domain::runtime::{ProbeResult, RuntimeCandidate};
use crate::infrastructure::process::{self, CommandOutput};

/// Prints one JSON line and exits 0 when the library loads, 2 otherwise.
/// `sys.argv[1]` is the library file name.
const PROBE_SCRIPT: &str = r#"
import ctypes
import json
import platform
import subprocess
import sys
from pathlib import Path

def describe_arches(path):
    for cmd in (["/usr/bin/lipo", "-archs", str(path)], ["/usr/bin/file", str(path)]):
        try:
            output = subprocess.check_output(cmd, text=True, stderr=subprocess.DEVNULL).strip()
        except Exception:
            continue
        if output:
            return output
    return None

result = {"ok": False, "python_arch": platform.machine(), "lib_path": None, "lib_arches": None, "error": None}
try:
    import moonshine_voice
    lib_path = Path(moonshine_voice.__file__).resolve().with_name(sys.argv[1])
    result["lib_path"] = str(lib_path)
    result["lib_arches"] = describe_arches(lib_path)
    ctypes.CDLL(str(lib_path))
    result["ok"] = True
except Exception as exc:
    result["error"] = str(exc)

print(json.dumps(result))
raise SystemExit(0 if result["ok"] else 2)
"#;

#[derive(Debug, Deserialize)]
struct ProbePayload {
    #[serde(default)]
    ok: bool,
    python_arch: Option<String>,
    lib_path: Option<String>,
    lib_arches: Option<String>,
    error: Option<String>,
}

/// Runs the probe script with the candidate's interpreter
pub struct PythonRuntimeProbe {
    project_src_dir: Option<PathBuf>,
    timeout: Duration,
}

impl PythonRuntimeProbe {
    pub fn new(project_src_dir: Option<PathBuf>, timeout: Duration) -> Self {
        Self {
            project_src_dir,
            timeout,
        }
    }

    fn python_path_env(&self) -> Option<String> {
        let src = self.project_src_dir.as_ref().filter(|p| p.is_dir())?;
        let src = src.to_string_lossy().to_string();
        Some(match std::env::var("PYTHONPATH") {
            Ok(existing) if !existing.is_empty() => format!("{}:{}", src, existing),
            _ => src,
        })
    }
}

fn non_empty(text: &str) -> Option<String> {
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// Last stdout line that parses as a probe payload.
fn last_payload(stdout: &str) -> Option<ProbePayload> {
    stdout
        .lines()
        .rev()
        .map(str::trim)
        .filter(|line| line.starts_with('{'))
        .find_map(|line| serde_json::from_str(line).ok())
}

fn interpret(output: &CommandOutput) -> ProbeResult {
    let code = output.code();
    let stderr = non_empty(&output.stderr);

    let Some(payload) = last_payload(&output.stdout) else {
        if output.success() {
            return ProbeResult {
                ok: true,
                exit_code: code,
                ..Default::default()
            };
        }
        let mut error = "runtime probe failed without JSON output".to_string();
        if let Some(last) = output.stdout.trim().lines().last() {
            error = format!("{}: {}", error, last.trim());
        }
        return ProbeResult {
            error: Some(error),
            stderr,
            exit_code: code,
            ..Default::default()
        };
    };

    let ok = payload.ok && output.success();
    let error = payload.error.filter(|e| !e.is_empty()).or_else(|| {
        (!ok).then(|| {
            stderr
                .clone()
                .unwrap_or_else(|| format!("runtime probe failed (exit {:?})", code))
        })
    });
    ProbeResult {
        ok,
        python_arch: payload.python_arch.map(|a| Arch::normalize(&a)),
        lib_path: payload.lib_path,
        lib_arches: payload.lib_arches,
        error,
        stderr,
        exit_code: code,
    }
}

#[async_trait]
impl RuntimeProbe for PythonRuntimeProbe {
    async fn probe(&self, candidate: &RuntimeCandidate, library_name: &str) -> ProbeResult {
        let python = candidate.python_path();
        if !is_executable_file(&python) {
            return ProbeResult::failed("runtime python is missing or not executable");
        }

        let mut cmd = Command::new(&python);
        cmd.args(["-c", PROBE_SCRIPT, library_name]);
        if let Some(path) = self.python_path_env() {
            cmd.env("PYTHONPATH", path);
        }

        match process::output(cmd, self.timeout).await {
            Ok(output) => interpret(&output),
            Err(e) => ProbeResult::failed(format!("failed to execute runtime python: {}", e)),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::domain::runtime::Toolchain;
    use std::os::unix::fs::PermissionsExt;
    use std::os::unix::process::ExitStatusExt;
    use std::process::ExitStatus;

    fn output(code: i32, stdout: &str, stderr: &str) -> CommandOutput {
        CommandOutput {
            status: ExitStatus::from_raw(code << 8),
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        }
    }

    #[test]
    fn uses_last_json_line() {
        let stdout = "warming up\n{\"ok\": false}\n{\"ok\": true, \"python_arch\": \"arm64\", \"lib_path\": \"/x/libmoonshine.dylib\", \"lib_arches\": \"arm64\", \"error\": null}\n";
        let result = interpret(&output(0, stdout, ""));
        assert!(result.ok);
        assert_eq!(result.python_arch, Some(Arch::Arm64));
        assert_eq!(result.lib_arches.as_deref(), Some("arm64"));
        assert!(result.error.is_none());
    }

    #[test]
    fn failed_load_keeps_payload_error() {
        let stdout = r#"{"ok": false, "python_arch": "x86_64", "lib_path": "/x/libmoonshine.dylib", "lib_arches": "arm64", "error": "incompatible architecture"}"#;
        let result = interpret(&output(2, stdout, ""));
        assert!(!result.ok);
        assert_eq!(result.python_arch, Some(Arch::X86_64));
        assert_eq!(result.error.as_deref(), Some("incompatible architecture"));
        assert_eq!(result.exit_code, Some(2));
    }

    #[test]
    fn missing_json_depends_on_exit_status() {
        assert!(interpret(&output(0, "", "")).ok);

        let failed = interpret(&output(1, "Traceback\nImportError: boom\n", "trace"));
        assert!(!failed.ok);
        assert_eq!(
            failed.error.as_deref(),
            Some("runtime probe failed without JSON output: ImportError: boom")
        );
        assert_eq!(failed.stderr.as_deref(), Some("trace"));
    }

    #[tokio::test]
    async fn missing_python_is_structured_failure() {
        let dir = tempfile::tempdir().unwrap();
        let toolchain = Toolchain::new("configured", "/py", "/uv", Arch::Arm64);
        let candidate = RuntimeCandidate::recovery(dir.path(), &toolchain);

        let probe = PythonRuntimeProbe::new(None, Duration::from_secs(5));
        let result = probe.probe(&candidate, "libmoonshine.dylib").await;
        assert!(!result.ok);
        assert_eq!(
            result.error.as_deref(),
            Some("runtime python is missing or not executable")
        );
    }

    #[tokio::test]
    async fn runs_candidate_interpreter() {
        let dir = tempfile::tempdir().unwrap();
        let toolchain = Toolchain::new("configured", "/py", "/uv", Arch::Arm64);
        let candidate = RuntimeCandidate::recovery(dir.path(), &toolchain);
        let python = candidate.python_path();
        std::fs::create_dir_all(python.parent().unwrap()).unwrap();
        std::fs::write(
            &python,
            "#!/bin/sh\necho '{\"ok\": true, \"python_arch\": \"arm64\"}'\n",
        )
        .unwrap();
        std::fs::set_permissions(&python, std::fs::Permissions::from_mode(0o755)).unwrap();

        let probe = PythonRuntimeProbe::new(None, Duration::from_secs(5));
        let result = probe.probe(&candidate, "libmoonshine.dylib").await;
        assert!(result.ok);
        assert_eq!(result.python_arch, Some(Arch::Arm64));
    }
}
