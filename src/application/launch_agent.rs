//! Launch agent controller use case

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::domain::bundle::BundleLayout;
use crate::domain::launch_agent::{LaunchAgentDescriptor, LaunchAgentRecord};

use super::error::FlowError;
use super::permissions::PermissionCheck;
use super::persist::{write_atomic, InstallLock};
use super::ports::{LaunchdError, ServiceManager};

/// Where the registration and daemon logs live.
#[derive(Debug, Clone)]
pub struct LaunchAgentPaths {
    pub launch_agents_dir: PathBuf,
    pub log_dir: PathBuf,
    pub label: String,
    /// Lock shared with the bundle installer
    pub install_lock: PathBuf,
}

impl LaunchAgentPaths {
    pub fn registration(&self) -> PathBuf {
        self.launch_agents_dir.join(format!("{}.plist", self.label))
    }

    pub fn stdout_log(&self) -> PathBuf {
        self.log_dir.join("daemon.out.log")
    }

    pub fn stderr_log(&self) -> PathBuf {
        self.log_dir.join("daemon.err.log")
    }
}

/// Output from `LaunchAgentController::install`
#[derive(Debug, Clone)]
pub struct AgentInstallReport {
    pub record: LaunchAgentRecord,
    /// Whether the registration file content changed
    pub registration_changed: bool,
}

/// Installs, reloads and removes the login-launched service registration.
pub struct LaunchAgentController<S: ServiceManager> {
    service: S,
    paths: LaunchAgentPaths,
}

impl<S: ServiceManager> LaunchAgentController<S> {
    pub fn new(service: S, paths: LaunchAgentPaths) -> Self {
        Self { service, paths }
    }

    pub fn paths(&self) -> &LaunchAgentPaths {
        &self.paths
    }

    /// Executable the registration should launch: the managed bundle's
    /// executable when there is one, else the running binary.
    pub fn resolve_target(bundle: Option<&BundleLayout>, current_exe: &Path) -> PathBuf {
        match bundle {
            Some(layout) => layout.executable(),
            None => current_exe.to_path_buf(),
        }
    }

    pub fn descriptor_for(&self, target: &Path) -> LaunchAgentDescriptor {
        LaunchAgentDescriptor::for_target(
            self.paths.label.clone(),
            target,
            self.paths.stdout_log(),
            self.paths.stderr_log(),
        )
    }

    /// Write the registration for `target` and load it.
    ///
    /// `permissions` is the login-context check for the same target; a
    /// missing grant aborts unless `allow_missing_permissions` is set.
    pub async fn install(
        &self,
        target: &Path,
        permissions: &PermissionCheck,
        allow_missing_permissions: bool,
    ) -> Result<AgentInstallReport, FlowError> {
        permissions.gate(allow_missing_permissions, target)?;
        let _lock = InstallLock::acquire(&self.paths.install_lock)?;

        let registration = self.paths.registration();
        let bytes = self.descriptor_for(target).to_plist_bytes();
        let current = match tokio::fs::read(&registration).await {
            Ok(existing) => Some(existing),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => {
                return Err(FlowError::io(
                    format!("Failed to read {}", registration.display()),
                    e,
                ))
            }
        };
        let registration_changed = current.as_deref() != Some(bytes.as_slice());

        for dir in [&self.paths.launch_agents_dir, &self.paths.log_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| FlowError::io(format!("Failed to create {}", dir.display()), e))?;
        }
        if registration_changed {
            write_atomic(&registration, &bytes, 0o644).await?;
        } else {
            debug!(path = %registration.display(), "registration unchanged");
        }

        if let Err(e) = self.service.bootout(&registration).await {
            debug!(error = %e, "bootout before bootstrap failed (not loaded)");
        }
        self.service.bootstrap(&registration).await?;

        Ok(AgentInstallReport {
            record: LaunchAgentRecord {
                registration_path: registration,
                target_executable_path: target.to_path_buf(),
                loaded: self.service.is_loaded(&self.paths.label).await,
            },
            registration_changed,
        })
    }

    /// Reload the registration so new grants take effect.
    pub async fn restart(&self) -> Result<LaunchAgentRecord, FlowError> {
        let registration = self.paths.registration();
        if !registration.exists() {
            return Err(FlowError::NotConfigured(
                "Launch agent is not installed. Run: moonshine-flow install-launch-agent".to_string(),
            ));
        }

        if let Err(kickstart) = self.service.kickstart(&self.paths.label).await {
            warn!(error = %kickstart, "kickstart failed, reloading registration");
            if let Err(e) = self.service.bootout(&registration).await {
                debug!(error = %e, "bootout before reload failed");
            }
            if let Err(reload) = self.service.bootstrap(&registration).await {
                return Err(LaunchdError::RestartFailed {
                    kickstart: Box::new(kickstart),
                    reload: Box::new(reload),
                }
                .into());
            }
        }

        self.record().await?.ok_or_else(|| {
            FlowError::NotConfigured(format!(
                "Unreadable registration: {}",
                registration.display()
            ))
        })
    }

    /// Unload and delete the registration. Returns whether one existed.
    /// The app bundle is left in place.
    pub async fn uninstall(&self) -> Result<bool, FlowError> {
        let registration = self.paths.registration();
        if !registration.exists() {
            return Ok(false);
        }
        let _lock = InstallLock::acquire(&self.paths.install_lock)?;
        if let Err(e) = self.service.bootout(&registration).await {
            debug!(error = %e, "bootout during uninstall failed");
        }
        tokio::fs::remove_file(&registration)
            .await
            .map_err(|e| FlowError::io(format!("Failed to remove {}", registration.display()), e))?;
        Ok(true)
    }

    /// Installed registration, if any.
    pub async fn descriptor(&self) -> Result<Option<LaunchAgentDescriptor>, FlowError> {
        let registration = self.paths.registration();
        match tokio::fs::read_to_string(&registration).await {
            Ok(text) => Ok(LaunchAgentDescriptor::from_plist(&text)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(FlowError::io(
                format!("Failed to read {}", registration.display()),
                e,
            )),
        }
    }

    /// Installed registration as seen on disk and by launchd.
    pub async fn record(&self) -> Result<Option<LaunchAgentRecord>, FlowError> {
        let Some(descriptor) = self.descriptor().await? else {
            return Ok(None);
        };
        let Some(target) = descriptor.target_executable() else {
            return Ok(None);
        };
        Ok(Some(LaunchAgentRecord {
            registration_path: self.paths.registration(),
            target_executable_path: target,
            loaded: self.service.is_loaded(&descriptor.label).await,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::ProbeError;
    use crate::domain::permissions::{GrantState, PermissionSet};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct MockLaunchd {
        calls: Mutex<Vec<String>>,
        loaded: AtomicBool,
        kickstart_fails: bool,
        bootstrap_fails: AtomicBool,
    }

    #[async_trait]
    impl ServiceManager for &MockLaunchd {
        async fn bootstrap(&self, _registration: &Path) -> Result<(), LaunchdError> {
            self.calls.lock().unwrap().push("bootstrap".to_string());
            if self.bootstrap_fails.load(Ordering::SeqCst) {
                return Err(LaunchdError::Failed {
                    operation: "bootstrap".to_string(),
                    stderr: "Bootstrap failed: 5: Input/output error".to_string(),
                });
            }
            self.loaded.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn bootout(&self, _registration: &Path) -> Result<(), LaunchdError> {
            self.calls.lock().unwrap().push("bootout".to_string());
            if self.loaded.swap(false, Ordering::SeqCst) {
                Ok(())
            } else {
                Err(LaunchdError::Failed {
                    operation: "bootout".to_string(),
                    stderr: "No such process".to_string(),
                })
            }
        }

        async fn kickstart(&self, _label: &str) -> Result<(), LaunchdError> {
            self.calls.lock().unwrap().push("kickstart".to_string());
            if self.kickstart_fails {
                Err(LaunchdError::Failed {
                    operation: "kickstart".to_string(),
                    stderr: "Could not find service".to_string(),
                })
            } else {
                Ok(())
            }
        }

        async fn is_loaded(&self, _label: &str) -> bool {
            self.loaded.load(Ordering::SeqCst)
        }
    }

    fn controller<'a>(dir: &TempDir, launchd: &'a MockLaunchd) -> LaunchAgentController<&'a MockLaunchd> {
        LaunchAgentController::new(
            launchd,
            LaunchAgentPaths {
                launch_agents_dir: dir.path().join("LaunchAgents"),
                log_dir: dir.path().join("Logs"),
                label: "com.moonshineflow.daemon".to_string(),
                install_lock: dir.path().join("state").join("bundle.lock"),
            },
        )
    }

    fn granted() -> PermissionCheck {
        PermissionCheck::Checked(PermissionSet::uniform(GrantState::Granted))
    }

    #[test]
    fn target_prefers_bundle_executable() {
        let layout = BundleLayout::new("/Users/me/Applications/MoonshineFlow.app");
        let exe = Path::new("/opt/homebrew/bin/moonshine-flow");
        assert_eq!(
            LaunchAgentController::<&MockLaunchd>::resolve_target(Some(&layout), exe),
            layout.executable()
        );
        assert_eq!(
            LaunchAgentController::<&MockLaunchd>::resolve_target(None, exe),
            exe.to_path_buf()
        );
    }

    #[tokio::test]
    async fn install_is_idempotent_and_records_target() {
        let dir = TempDir::new().unwrap();
        let launchd = MockLaunchd::default();
        let controller = controller(&dir, &launchd);
        let target = Path::new("/Apps/MoonshineFlow.app/Contents/MacOS/MoonshineFlow");

        let first = controller.install(target, &granted(), false).await.unwrap();
        assert!(first.registration_changed);
        assert!(first.record.loaded);
        let bytes = std::fs::read(controller.paths().registration()).unwrap();

        let second = controller.install(target, &granted(), false).await.unwrap();
        assert!(!second.registration_changed);
        assert_eq!(std::fs::read(controller.paths().registration()).unwrap(), bytes);

        let record = controller.record().await.unwrap().unwrap();
        assert_eq!(record.target_executable_path, target);
        assert_eq!(record, second.record);
    }

    #[tokio::test]
    async fn missing_permissions_abort_before_writing() {
        let dir = TempDir::new().unwrap();
        let launchd = MockLaunchd::default();
        let controller = controller(&dir, &launchd);
        let target = Path::new("/bin/target");
        let denied = PermissionCheck::Checked(PermissionSet::uniform(GrantState::Denied));

        let err = controller.install(target, &denied, false).await.unwrap_err();
        assert_eq!(err.exit_code(), 3);
        assert!(!controller.paths().registration().exists());
        assert!(launchd.calls.lock().unwrap().is_empty());

        controller.install(target, &denied, true).await.unwrap();
        assert!(controller.paths().registration().exists());
    }

    #[tokio::test]
    async fn unverifiable_permissions_abort_by_default() {
        let dir = TempDir::new().unwrap();
        let launchd = MockLaunchd::default();
        let controller = controller(&dir, &launchd);
        let check = PermissionCheck::Unavailable(ProbeError::Launch("boom".to_string()));
        assert!(controller
            .install(Path::new("/bin/target"), &check, false)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn restart_falls_back_to_reload() {
        let dir = TempDir::new().unwrap();
        let launchd = MockLaunchd {
            kickstart_fails: true,
            ..Default::default()
        };
        let controller = controller(&dir, &launchd);
        controller
            .install(Path::new("/bin/target"), &granted(), false)
            .await
            .unwrap();
        launchd.calls.lock().unwrap().clear();

        let record = controller.restart().await.unwrap();
        assert!(record.loaded);
        assert_eq!(
            *launchd.calls.lock().unwrap(),
            vec!["kickstart", "bootout", "bootstrap"]
        );
    }

    #[tokio::test]
    async fn restart_without_registration_fails() {
        let dir = TempDir::new().unwrap();
        let launchd = MockLaunchd::default();
        let err = controller(&dir, &launchd).restart().await.unwrap_err();
        assert!(matches!(err, FlowError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn uninstall_removes_registration_only() {
        let dir = TempDir::new().unwrap();
        let launchd = MockLaunchd::default();
        let controller = controller(&dir, &launchd);
        controller
            .install(Path::new("/bin/target"), &granted(), false)
            .await
            .unwrap();

        assert!(controller.uninstall().await.unwrap());
        assert!(!controller.paths().registration().exists());
        assert!(!launchd.loaded.load(Ordering::SeqCst));
        assert!(!controller.uninstall().await.unwrap());
    }

    #[tokio::test]
    async fn failed_reload_keeps_kickstart_error() {
        let dir = TempDir::new().unwrap();
        let launchd = MockLaunchd {
            kickstart_fails: true,
            ..Default::default()
        };
        let controller = controller(&dir, &launchd);
        controller
            .install(Path::new("/bin/target"), &granted(), false)
            .await
            .unwrap();
        launchd.bootstrap_fails.store(true, Ordering::SeqCst);

        let err = controller.restart().await.unwrap_err();
        assert_eq!(err.exit_code(), 6);
        let message = err.to_string();
        assert!(message.contains("Could not find service"), "{}", message);
        assert!(message.contains("Input/output error"), "{}", message);
    }

    #[tokio::test]
    async fn held_install_lock_blocks_registration_write() {
        let dir = TempDir::new().unwrap();
        let launchd = MockLaunchd::default();
        let controller = controller(&dir, &launchd);
        let _held = InstallLock::acquire(&controller.paths().install_lock).unwrap();

        let err = controller
            .install(Path::new("/bin/target"), &granted(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::Lock(_)));
        assert!(!controller.paths().registration().exists());
        assert!(launchd.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn rewritten_registration_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let launchd = MockLaunchd::default();
        let controller = controller(&dir, &launchd);
        controller.install(Path::new("/bin/old"), &granted(), false).await.unwrap();
        let report = controller.install(Path::new("/bin/new"), &granted(), false).await.unwrap();

        assert!(report.registration_changed);
        let entries: Vec<_> = std::fs::read_dir(&controller.paths().launch_agents_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(entries, vec!["com.moonshineflow.daemon.plist"]);
        let record = controller.record().await.unwrap().unwrap();
        assert_eq!(record.target_executable_path, Path::new("/bin/new"));
    }
}
