//! Permission probe use case

use std::path::Path;

use tracing::debug;

use crate::domain::permissions::{
    Capability, ExecutionContext, GrantState, InvocationKind, LoginEvidence, PermissionSet,
};

use super::error::FlowError;
use super::ports::{LoginContextProbe, PermissionOracle, ProbeError};

/// Result of checking the login-service context.
#[derive(Debug, Clone)]
pub enum PermissionCheck {
    Checked(PermissionSet),
    Unavailable(ProbeError),
}

impl PermissionCheck {
    pub fn evidence(&self) -> LoginEvidence<'_> {
        match self {
            PermissionCheck::Checked(set) => LoginEvidence::Checked(set),
            PermissionCheck::Unavailable(_) => LoginEvidence::Unavailable,
        }
    }

    pub fn permissions(&self) -> Option<&PermissionSet> {
        match self {
            PermissionCheck::Checked(set) => Some(set),
            PermissionCheck::Unavailable(_) => None,
        }
    }

    /// Abort decision before installing a registration for `target`.
    pub fn gate(&self, allow_missing: bool, target: &Path) -> Result<(), FlowError> {
        let missing = match self {
            PermissionCheck::Checked(set) => set.missing(),
            PermissionCheck::Unavailable(_) => Capability::REQUEST_ORDER.to_vec(),
        };
        if missing.is_empty() || allow_missing {
            return Ok(());
        }
        Err(FlowError::PermissionIncomplete {
            missing,
            target: target.to_path_buf(),
        })
    }
}

/// Queries and requests OS privacy grants for an execution context.
pub struct PermissionProbe<O, L>
where
    O: PermissionOracle,
    L: LoginContextProbe,
{
    oracle: O,
    login: L,
}

impl<O, L> PermissionProbe<O, L>
where
    O: PermissionOracle,
    L: LoginContextProbe,
{
    pub fn new(oracle: O, login: L) -> Self {
        Self { oracle, login }
    }

    /// Grant states without prompting.
    pub async fn query(&self, context: &ExecutionContext) -> Result<PermissionSet, ProbeError> {
        match context.invocation_kind {
            InvocationKind::Terminal => Ok(self.terminal_states().await),
            InvocationKind::LoginService => {
                self.login.check(&login_command(context, false)).await
            }
        }
    }

    /// Prompt for every capability that is not granted, then re-query.
    /// Granted capabilities are never prompted.
    pub async fn request(&self, context: &ExecutionContext) -> Result<PermissionSet, ProbeError> {
        match context.invocation_kind {
            InvocationKind::Terminal => {
                let before = self.terminal_states().await;
                for capability in before.missing() {
                    debug!(capability = %capability, "prompting for permission");
                    self.oracle.prompt(capability).await;
                }
                Ok(self.terminal_states().await)
            }
            InvocationKind::LoginService => self.login.check(&login_command(context, true)).await,
        }
    }

    /// Login-service check for `target`, keeping probe failures as data.
    pub async fn check_login(&self, context: &ExecutionContext, request: bool) -> PermissionCheck {
        let result = if request {
            self.request(context).await
        } else {
            self.query(context).await
        };
        match result {
            Ok(set) => PermissionCheck::Checked(set),
            Err(e) => PermissionCheck::Unavailable(e),
        }
    }

    async fn terminal_states(&self) -> PermissionSet {
        let mut states = Vec::with_capacity(Capability::ALL.len());
        for capability in Capability::ALL {
            states.push((capability, self.oracle.status(capability).await));
        }
        PermissionSet::from_states(states)
    }
}

/// Command run in the login context: `<target> check-permissions [--request]`.
pub fn login_command(context: &ExecutionContext, request: bool) -> Vec<String> {
    let mut command = vec![
        context.binary_path.to_string_lossy().to_string(),
        "check-permissions".to_string(),
    ];
    if request {
        command.push("--request".to_string());
    }
    command
}

/// User guidance for missing capabilities. Empty when all are granted.
pub fn guidance(set: &PermissionSet, current_executable: &Path, target: &Path) -> Vec<String> {
    let missing = set.missing();
    if missing.is_empty() {
        return Vec::new();
    }
    let mut lines = vec![format!(
        "Missing permissions: {}",
        missing
            .iter()
            .map(|c| c.label())
            .collect::<Vec<_>>()
            .join(", ")
    )];
    lines.push("Grant them in System Settings -> Privacy & Security:".to_string());
    lines.extend(missing.iter().map(|c| format!("  - {}", c.label())));
    lines.push(format!("Current executable: {}", current_executable.display()));
    lines.push(format!("Permission target (recommended): {}", target.display()));
    if set.iter().any(|(_, s)| s == GrantState::Unknown) {
        lines.push("Some states are UNKNOWN; re-run after granting to confirm.".to_string());
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::arch::Arch;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// Oracle whose prompts grant the capability.
    struct MockOracle {
        states: Mutex<BTreeMap<Capability, GrantState>>,
        prompts: Mutex<Vec<Capability>>,
    }

    impl MockOracle {
        fn with(state: GrantState) -> Self {
            Self {
                states: Mutex::new(Capability::ALL.iter().map(|c| (*c, state)).collect()),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl PermissionOracle for MockOracle {
        async fn status(&self, capability: Capability) -> GrantState {
            self.states.lock().unwrap()[&capability]
        }

        async fn prompt(&self, capability: Capability) {
            self.prompts.lock().unwrap().push(capability);
            self.states
                .lock()
                .unwrap()
                .insert(capability, GrantState::Granted);
        }
    }

    struct MockLogin {
        result: Result<PermissionSet, ProbeError>,
        commands: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl LoginContextProbe for MockLogin {
        async fn check(&self, command: &[String]) -> Result<PermissionSet, ProbeError> {
            self.commands.lock().unwrap().push(command.to_vec());
            self.result.clone()
        }
    }

    fn login(result: Result<PermissionSet, ProbeError>) -> MockLogin {
        MockLogin {
            result,
            commands: Mutex::new(Vec::new()),
        }
    }

    fn terminal() -> ExecutionContext {
        ExecutionContext {
            binary_path: PathBuf::from("/usr/local/bin/moonshine-flow"),
            invocation_kind: InvocationKind::Terminal,
            resolved_interpreter_arch: Arch::Arm64,
            os_arch: Arch::Arm64,
        }
    }

    #[tokio::test]
    async fn request_prompts_missing_in_order_once() {
        let probe = PermissionProbe::new(
            MockOracle::with(GrantState::Denied),
            login(Ok(PermissionSet::uniform(GrantState::Granted))),
        );
        assert_eq!(
            probe.query(&terminal()).await.unwrap(),
            PermissionSet::uniform(GrantState::Denied)
        );

        let after = probe.request(&terminal()).await.unwrap();
        assert!(after.all_granted());
        assert_eq!(
            *probe.oracle.prompts.lock().unwrap(),
            Capability::REQUEST_ORDER.to_vec()
        );

        probe.request(&terminal()).await.unwrap();
        assert_eq!(probe.oracle.prompts.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn login_context_runs_target_check() {
        let probe = PermissionProbe::new(
            MockOracle::with(GrantState::Granted),
            login(Ok(PermissionSet::uniform(GrantState::Denied))),
        );
        let ctx = ExecutionContext::login_service("/Apps/MoonshineFlow.app/Contents/MacOS/MoonshineFlow", Arch::Arm64);

        let check = probe.check_login(&ctx, true).await;
        assert_eq!(check.permissions().map(|s| s.all_granted()), Some(false));
        assert_eq!(
            probe.login.commands.lock().unwrap()[0],
            vec![
                "/Apps/MoonshineFlow.app/Contents/MacOS/MoonshineFlow",
                "check-permissions",
                "--request"
            ]
        );
        assert!(probe.oracle.prompts.lock().unwrap().is_empty());
    }

    #[test]
    fn gate_aborts_unless_allowed() {
        let target = Path::new("/bin/target");
        let denied = PermissionCheck::Checked(PermissionSet::from_states([(
            Capability::Microphone,
            GrantState::Denied,
        )]));
        assert!(matches!(
            denied.gate(false, target),
            Err(FlowError::PermissionIncomplete { .. })
        ));
        assert!(denied.gate(true, target).is_ok());

        let unavailable = PermissionCheck::Unavailable(ProbeError::Launch("launchctl missing".into()));
        assert!(unavailable.gate(false, target).is_err());
        assert_eq!(unavailable.evidence(), LoginEvidence::Unavailable);

        let granted = PermissionCheck::Checked(PermissionSet::uniform(GrantState::Granted));
        assert!(granted.gate(false, target).is_ok());
    }

    #[test]
    fn guidance_names_target() {
        let set = PermissionSet::from_states([
            (Capability::Microphone, GrantState::Granted),
            (Capability::Accessibility, GrantState::Denied),
            (Capability::InputMonitoring, GrantState::Granted),
        ]);
        let lines = guidance(&set, Path::new("/bin/cli"), Path::new("/bin/target"));
        assert_eq!(lines[0], "Missing permissions: Accessibility");
        assert!(lines.iter().any(|l| l.ends_with("/bin/target")));
        assert!(guidance(&PermissionSet::uniform(GrantState::Granted), Path::new("/a"), Path::new("/b")).is_empty());
    }
}
