//! App bundle install use case
//!
//! The single writer of the bundle and its manifest. Re-signing, and with
//! it a new code identity, only happens when an artifact digest changed.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::domain::bundle::{
    BundleArtifact, BundleDigests, BundleLayout, BundleManifest, CodeIdentity, ContentDigest,
    InfoDescriptor, APP_BUNDLE_IDENTIFIER,
};
use crate::domain::runtime::BootstrapConfig;

use super::error::FlowError;
use super::persist::{write_atomic, InstallLock, INSTALL_LOCK_FILE};
use super::ports::CodeSigner;

const MANIFEST_FILE: &str = "bundle-manifest.json";

/// Inputs of one bundle install
#[derive(Debug, Clone)]
pub struct BundleInputs {
    pub source_executable: PathBuf,
    pub descriptor: InfoDescriptor,
    pub bootstrap: BootstrapConfig,
}

/// Output from `AppBundleManager::install`
#[derive(Debug, Clone)]
pub struct InstallOutcome {
    pub manifest: BundleManifest,
    /// Whether the bundle was signed during this install
    pub resigned: bool,
    pub changed: Vec<BundleArtifact>,
}

/// Builds and updates the signed application bundle.
pub struct AppBundleManager<C: CodeSigner> {
    signer: C,
    layout: BundleLayout,
    state_dir: PathBuf,
    identifier: String,
}

impl<C: CodeSigner> AppBundleManager<C> {
    pub fn new(signer: C, bundle_path: impl Into<PathBuf>, state_dir: impl Into<PathBuf>) -> Self {
        Self {
            signer,
            layout: BundleLayout::new(bundle_path),
            state_dir: state_dir.into(),
            identifier: APP_BUNDLE_IDENTIFIER.to_string(),
        }
    }

    pub fn layout(&self) -> &BundleLayout {
        &self.layout
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.state_dir.join(MANIFEST_FILE)
    }

    /// Lock serializing every installer write under the state directory.
    pub fn lock_path(&self) -> PathBuf {
        self.state_dir.join(INSTALL_LOCK_FILE)
    }

    /// Manifest recorded at the last install. An unreadable manifest is
    /// treated as absent, forcing a full rewrite and re-sign.
    pub async fn read_manifest(&self) -> Result<Option<BundleManifest>, FlowError> {
        let path = self.manifest_path();
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(FlowError::io(format!("Failed to read {}", path.display()), e)),
        };
        match serde_json::from_str(&text) {
            Ok(manifest) => Ok(Some(manifest)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unreadable bundle manifest");
                Ok(None)
            }
        }
    }

    /// Current code identity of the installed bundle.
    pub async fn identity(&self) -> Result<Option<CodeIdentity>, FlowError> {
        if !self.layout.executable().exists() {
            return Ok(None);
        }
        Ok(self.signer.identity(&self.layout.root).await?)
    }

    /// Materialize or update the bundle.
    ///
    /// With unchanged inputs this is a no-op returning the existing
    /// manifest. Otherwise only changed artifacts are rewritten, the bundle
    /// is signed once, and the manifest is written last.
    pub async fn install(&self, inputs: &BundleInputs) -> Result<InstallOutcome, FlowError> {
        let _lock = InstallLock::acquire(&self.lock_path())?;

        let prior = self
            .read_manifest()
            .await?
            .filter(|m| m.bundle_path == self.layout.root);

        // Signing rewrites the bundle executable, so when it is its own source
        // its bytes never match the recorded pre-signing digest.
        let executable = if same_file(&inputs.source_executable, &self.layout.executable()) {
            None
        } else {
            Some(read_source(&inputs.source_executable).await?)
        };
        let executable_digest = match (&executable, &prior) {
            (Some(bytes), _) => ContentDigest::of_bytes(bytes),
            (None, Some(manifest)) => {
                debug!("source is the installed bundle executable, keeping its digest");
                manifest.executable_digest.clone()
            }
            (None, None) => {
                return Err(FlowError::NotConfigured(format!(
                    "{} is the bundle executable and no install recorded its source. Run the install from the moonshine-flow CLI or set runtime.source_executable",
                    inputs.source_executable.display()
                )))
            }
        };

        let info = inputs.descriptor.to_plist_bytes();
        let bootstrap = inputs.bootstrap.to_json_bytes().map_err(|e| {
            FlowError::io("Failed to serialize bootstrap config", std::io::Error::other(e))
        })?;

        let digests = BundleDigests {
            executable: executable_digest,
            info_descriptor: ContentDigest::of_bytes(&info),
            bootstrap_config: ContentDigest::of_bytes(&bootstrap),
        };

        let changed = self.changed_artifacts(prior.as_ref(), &digests);

        if let (Some(manifest), true) = (prior.as_ref(), changed.is_empty()) {
            debug!(version = manifest.bundle_version, "bundle unchanged, skipping re-sign");
            return Ok(InstallOutcome {
                manifest: manifest.clone(),
                resigned: false,
                changed,
            });
        }

        for artifact in &changed {
            let (bytes, mode) = match artifact {
                BundleArtifact::Executable => match &executable {
                    Some(bytes) => (bytes, 0o755),
                    None => continue,
                },
                BundleArtifact::InfoDescriptor => (&info, 0o644),
                BundleArtifact::BootstrapConfig => (&bootstrap, 0o644),
            };
            let path = self.layout.artifact_path(*artifact);
            info!(artifact = %artifact, path = %path.display(), "writing bundle artifact");
            write_atomic(&path, bytes, mode).await?;
        }

        self.signer.sign(&self.layout.root, &self.identifier).await?;

        let version = prior.map(|m| m.bundle_version + 1).unwrap_or(1);
        let manifest = digests.into_manifest(self.layout.root.clone(), version);
        let json = serde_json::to_vec_pretty(&manifest).map_err(|e| {
            FlowError::io("Failed to serialize bundle manifest", std::io::Error::other(e))
        })?;
        write_atomic(&self.manifest_path(), &json, 0o644).await?;

        Ok(InstallOutcome {
            manifest,
            resigned: true,
            changed,
        })
    }

    /// Artifacts whose digest differs from `prior`, or that are missing on disk.
    fn changed_artifacts(
        &self,
        prior: Option<&BundleManifest>,
        digests: &BundleDigests,
    ) -> Vec<BundleArtifact> {
        let Some(prior) = prior else {
            return vec![
                BundleArtifact::Executable,
                BundleArtifact::InfoDescriptor,
                BundleArtifact::BootstrapConfig,
            ];
        };
        let differing = prior.changed_artifacts(digests);
        [
            BundleArtifact::Executable,
            BundleArtifact::InfoDescriptor,
            BundleArtifact::BootstrapConfig,
        ]
        .into_iter()
        .filter(|a| differing.contains(a) || !self.layout.artifact_path(*a).exists())
        .collect()
    }

    /// Delete the bundle and its manifest. Returns whether a bundle existed.
    pub async fn remove(&self) -> Result<bool, FlowError> {
        let _lock = InstallLock::acquire(&self.lock_path())?;
        let existed = self.layout.root.exists();
        if existed {
            tokio::fs::remove_dir_all(&self.layout.root).await.map_err(|e| {
                FlowError::io(format!("Failed to remove {}", self.layout.root.display()), e)
            })?;
        }
        match tokio::fs::remove_file(self.manifest_path()).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(FlowError::io("Failed to remove bundle manifest", e)),
        }
        Ok(existed)
    }
}

async fn read_source(path: &Path) -> Result<Vec<u8>, FlowError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == ErrorKind::NotFound => Err(FlowError::NotConfigured(format!(
            "Source executable not found: {}",
            path.display()
        ))),
        Err(e) => Err(FlowError::io(format!("Failed to read {}", path.display()), e)),
    }
}

/// Whether both paths name the same file, following symlinks when they resolve.
fn same_file(a: &Path, b: &Path) -> bool {
    match (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
