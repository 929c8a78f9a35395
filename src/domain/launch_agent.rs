//! Login-launched service registration (launchd LaunchAgent)

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;

use super::plist::{self, PlistValue};

pub const LAUNCH_AGENT_LABEL: &str = "com.moonshineflow.daemon";

/// Content of the registration descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchAgentDescriptor {
    pub label: String,
    pub program_arguments: Vec<String>,
    pub stdout_path: PathBuf,
    pub stderr_path: PathBuf,
}

impl LaunchAgentDescriptor {
    /// Descriptor that launches `target run`.
    pub fn for_target(
        label: impl Into<String>,
        target: &Path,
        stdout_path: PathBuf,
        stderr_path: PathBuf,
    ) -> Self {
        Self {
            label: label.into(),
            program_arguments: vec![target.to_string_lossy().to_string(), "run".to_string()],
            stdout_path,
            stderr_path,
        }
    }

    /// The executable launchd starts, and therefore the permission target.
    pub fn target_executable(&self) -> Option<PathBuf> {
        self.program_arguments
            .first()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
    }

    pub fn to_plist_bytes(&self) -> Vec<u8> {
        let mut map = BTreeMap::new();
        map.insert("Label".to_string(), PlistValue::from(self.label.as_str()));
        map.insert(
            "ProgramArguments".to_string(),
            PlistValue::Array(
                self.program_arguments
                    .iter()
                    .map(|a| PlistValue::from(a.as_str()))
                    .collect(),
            ),
        );
        map.insert("RunAtLoad".to_string(), PlistValue::Bool(true));
        map.insert("KeepAlive".to_string(), PlistValue::Bool(false));
        map.insert("ProcessType".to_string(), PlistValue::from("Interactive"));
        map.insert(
            "StandardOutPath".to_string(),
            PlistValue::from(self.stdout_path.to_string_lossy().to_string()),
        );
        map.insert(
            "StandardErrorPath".to_string(),
            PlistValue::from(self.stderr_path.to_string_lossy().to_string()),
        );
        plist::to_xml(&PlistValue::Dict(map)).into_bytes()
    }

    /// Read back a registration. Unknown keys are ignored; `Label` and a
    /// non-empty `ProgramArguments` are required.
    pub fn from_plist(text: &str) -> Option<Self> {
        let root = plist::from_xml(text)?;
        let dict = root.as_dict()?;
        let label = dict.get("Label")?.as_str()?.to_string();
        let program_arguments: Vec<String> = dict
            .get("ProgramArguments")?
            .as_array()?
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect();
        if program_arguments.is_empty() {
            return None;
        }
        let path_of = |key: &str| {
            dict.get(key)
                .and_then(PlistValue::as_str)
                .map(PathBuf::from)
                .unwrap_or_default()
        };
        Some(Self {
            label,
            program_arguments,
            stdout_path: path_of("StandardOutPath"),
            stderr_path: path_of("StandardErrorPath"),
        })
    }
}

/// Installed registration as observed on disk and in launchd.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaunchAgentRecord {
    pub registration_path: PathBuf,
    pub target_executable_path: PathBuf,
    pub loaded: bool,
}
