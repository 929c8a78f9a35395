//! App bundle value objects: manifest, code identity and bundle inputs

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

use super::plist::{self, PlistValue};

pub const APP_BUNDLE_NAME: &str = "MoonshineFlow.app";
pub const APP_EXECUTABLE_NAME: &str = "MoonshineFlow";
pub const APP_BUNDLE_IDENTIFIER: &str = "com.moonshineflow.app";

/// Hex SHA-256 digest of an artifact's content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentDigest(String);

impl ContentDigest {
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self(format!("{:x}", Sha256::digest(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for display.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The three artifacts that make up a bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BundleArtifact {
    Executable,
    InfoDescriptor,
    BootstrapConfig,
}

impl fmt::Display for BundleArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BundleArtifact::Executable => write!(f, "executable"),
            BundleArtifact::InfoDescriptor => write!(f, "Info.plist"),
            BundleArtifact::BootstrapConfig => write!(f, "bootstrap.json"),
        }
    }
}

/// Persisted record of the content digests that were signed at the last
/// install. Re-signing happens iff a freshly computed digest differs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleManifest {
    pub bundle_path: PathBuf,
    pub executable_digest: ContentDigest,
    pub info_descriptor_digest: ContentDigest,
    pub bootstrap_config_digest: ContentDigest,
    /// Revision counter, bumped on every re-sign
    pub bundle_version: u64,
}

impl BundleManifest {
    /// Artifacts whose digest differs between `self` and `other`.
    pub fn changed_artifacts(&self, other: &BundleDigests) -> Vec<BundleArtifact> {
        let mut changed = Vec::new();
        if self.executable_digest != other.executable {
            changed.push(BundleArtifact::Executable);
        }
        if self.info_descriptor_digest != other.info_descriptor {
            changed.push(BundleArtifact::InfoDescriptor);
        }
        if self.bootstrap_config_digest != other.bootstrap_config {
            changed.push(BundleArtifact::BootstrapConfig);
        }
        changed
    }
}

/// Freshly computed digests of the install inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleDigests {
    pub executable: ContentDigest,
    pub info_descriptor: ContentDigest,
    pub bootstrap_config: ContentDigest,
}

impl BundleDigests {
    pub fn into_manifest(self, bundle_path: PathBuf, bundle_version: u64) -> BundleManifest {
        BundleManifest {
            bundle_path,
            executable_digest: self.executable,
            info_descriptor_digest: self.info_descriptor,
            bootstrap_config_digest: self.bootstrap_config,
            bundle_version,
        }
    }
}

/// Content-derived identity of the signed executable, as seen by the OS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CodeIdentity {
    /// `CDHash` reported by the signing tool
    pub signature_hash: String,
    pub executable_mtime: Option<SystemTime>,
}

impl CodeIdentity {
    pub fn mtime_unix_secs(&self) -> Option<u64> {
        self.executable_mtime
            .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
    }
}

/// Filesystem layout of a bundle rooted at `root`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleLayout {
    pub root: PathBuf,
}

impl BundleLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn executable(&self) -> PathBuf {
        self.root
            .join("Contents")
            .join("MacOS")
            .join(APP_EXECUTABLE_NAME)
    }

    pub fn info_plist(&self) -> PathBuf {
        self.root.join("Contents").join("Info.plist")
    }

    pub fn resources_dir(&self) -> PathBuf {
        self.root.join("Contents").join("Resources")
    }

    pub fn bootstrap_config(&self) -> PathBuf {
        self.resources_dir().join("bootstrap.json")
    }

    pub fn artifact_path(&self, artifact: BundleArtifact) -> PathBuf {
        match artifact {
            BundleArtifact::Executable => self.executable(),
            BundleArtifact::InfoDescriptor => self.info_plist(),
            BundleArtifact::BootstrapConfig => self.bootstrap_config(),
        }
    }

    /// If `executable` sits at `<bundle>/Contents/MacOS/<name>`, return the
    /// bundle's layout.
    pub fn containing(executable: &Path) -> Option<Self> {
        let macos = executable.parent()?;
        let contents = macos.parent()?;
        if macos.file_name()? != "MacOS" || contents.file_name()? != "Contents" {
            return None;
        }
        Some(Self::new(contents.parent()?))
    }
}

/// Identity descriptor rendered into `Contents/Info.plist`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoDescriptor {
    pub identifier: String,
    pub name: String,
    pub executable: String,
    pub short_version: String,
    pub microphone_usage: String,
}

impl Default for InfoDescriptor {
    fn default() -> Self {
        Self {
            identifier: APP_BUNDLE_IDENTIFIER.to_string(),
            name: "MoonshineFlow".to_string(),
            executable: APP_EXECUTABLE_NAME.to_string(),
            short_version: "1.0".to_string(),
            microphone_usage: "MoonshineFlow records audio only while hotkey is held.".to_string(),
        }
    }
}

impl InfoDescriptor {
    pub fn to_plist_bytes(&self) -> Vec<u8> {
        let entries: [(&str, PlistValue); 11] = [
            ("CFBundleDevelopmentRegion", "en".into()),
            ("CFBundleDisplayName", self.name.clone().into()),
            ("CFBundleExecutable", self.executable.clone().into()),
            ("CFBundleIdentifier", self.identifier.clone().into()),
            ("CFBundleInfoDictionaryVersion", "6.0".into()),
            ("CFBundleName", self.name.clone().into()),
            ("CFBundlePackageType", "APPL".into()),
            ("CFBundleShortVersionString", self.short_version.clone().into()),
            ("CFBundleVersion", "1".into()),
            ("LSBackgroundOnly", true.into()),
            ("NSMicrophoneUsageDescription", self.microphone_usage.clone().into()),
        ];
        let map: BTreeMap<String, PlistValue> = entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        plist::to_xml(&PlistValue::Dict(map)).into_bytes()
    }
}
