//! Privacy capabilities, grant states and the cross-context health classification

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::arch::Arch;
use super::trust::TrustSignal;

/// OS-mediated privacy permission the daemon needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Capability {
    Microphone,
    Accessibility,
    InputMonitoring,
}

impl Capability {
    /// All capabilities, in report order.
    pub const ALL: [Capability; 3] = [
        Capability::Microphone,
        Capability::Accessibility,
        Capability::InputMonitoring,
    ];

    /// Order in which missing capabilities are prompted for.
    pub const REQUEST_ORDER: [Capability; 3] = [
        Capability::Accessibility,
        Capability::InputMonitoring,
        Capability::Microphone,
    ];

    /// Label used in reports and in `check-permissions` output.
    pub fn label(self) -> &'static str {
        match self {
            Capability::Microphone => "Microphone",
            Capability::Accessibility => "Accessibility",
            Capability::InputMonitoring => "Input Monitoring",
        }
    }

    fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "microphone" => Some(Capability::Microphone),
            "accessibility" => Some(Capability::Accessibility),
            "input monitoring" => Some(Capability::InputMonitoring),
            _ => None,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Grant state of one capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GrantState {
    Granted,
    Denied,
    Unknown,
}

impl GrantState {
    pub fn is_granted(self) -> bool {
        self == GrantState::Granted
    }
}

impl fmt::Display for GrantState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GrantState::Granted => write!(f, "OK"),
            GrantState::Denied => write!(f, "MISSING"),
            GrantState::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

impl FromStr for GrantState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "OK" | "GRANTED" => Ok(GrantState::Granted),
            "MISSING" | "DENIED" => Ok(GrantState::Denied),
            "UNKNOWN" => Ok(GrantState::Unknown),
            other => Err(format!("unrecognized grant state: {}", other)),
        }
    }
}

/// How the current process was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvocationKind {
    Terminal,
    LoginService,
}

impl fmt::Display for InvocationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvocationKind::Terminal => write!(f, "terminal"),
            InvocationKind::LoginService => write!(f, "login-service"),
        }
    }
}

/// Execution context a permission query is scoped to.
/// Built fresh per command invocation; never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionContext {
    pub binary_path: PathBuf,
    pub invocation_kind: InvocationKind,
    pub resolved_interpreter_arch: Arch,
    pub os_arch: Arch,
}

impl ExecutionContext {
    /// Context for the login-launched service running `binary_path`.
    pub fn login_service(binary_path: impl Into<PathBuf>, os_arch: Arch) -> Self {
        Self {
            binary_path: binary_path.into(),
            invocation_kind: InvocationKind::LoginService,
            resolved_interpreter_arch: Arch::Unknown,
            os_arch,
        }
    }
}

/// Grant state per capability, scoped to one execution context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSet {
    states: BTreeMap<Capability, GrantState>,
}

impl PermissionSet {
    /// Build a set from per-capability states. Capabilities not listed
    /// are `Unknown`.
    pub fn from_states(states: impl IntoIterator<Item = (Capability, GrantState)>) -> Self {
        let mut map: BTreeMap<_, _> = Capability::ALL
            .iter()
            .map(|c| (*c, GrantState::Unknown))
            .collect();
        map.extend(states);
        Self { states: map }
    }

    pub fn uniform(state: GrantState) -> Self {
        Self::from_states(Capability::ALL.iter().map(|c| (*c, state)))
    }

    pub fn get(&self, capability: Capability) -> GrantState {
        self.states
            .get(&capability)
            .copied()
            .unwrap_or(GrantState::Unknown)
    }

    pub fn set(&mut self, capability: Capability, state: GrantState) {
        self.states.insert(capability, state);
    }

    pub fn all_granted(&self) -> bool {
        Capability::ALL.iter().all(|c| self.get(*c).is_granted())
    }

    /// Capabilities not granted, in prompt order.
    pub fn missing(&self) -> Vec<Capability> {
        Capability::REQUEST_ORDER
            .iter()
            .copied()
            .filter(|c| !self.get(*c).is_granted())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Capability, GrantState)> + '_ {
        Capability::ALL.iter().map(move |c| (*c, self.get(*c)))
    }

    /// Render as the `Label: STATE` lines printed by `check-permissions`.
    pub fn to_report_lines(&self) -> Vec<String> {
        self.iter()
            .map(|(c, s)| format!("{}: {}", c.label(), s))
            .collect()
    }

    /// Parse `check-permissions` output. Every capability must be present.
    pub fn parse_report(text: &str) -> Option<Self> {
        let mut states = BTreeMap::new();
        for line in text.lines() {
            let Some((key, value)) = line.trim().split_once(':') else {
                continue;
            };
            let Some(capability) = Capability::from_label(key) else {
                continue;
            };
            if let Ok(state) = value.parse::<GrantState>() {
                states.insert(capability, state);
            }
        }
        if Capability::ALL.iter().all(|c| states.contains_key(c)) {
            Some(Self { states })
        } else {
            None
        }
    }
}

/// Outcome of looking at the LoginService context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginEvidence<'a> {
    /// The login-context probe was not run
    NotChecked,
    /// The probe ran but its output could not be interpreted
    Unavailable,
    Checked(&'a PermissionSet),
}

/// Overall permission health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    Ok,
    /// Permissions report granted but the daemon runtime is not trusted
    Warn,
    Incomplete,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Ok => write!(f, "OK"),
            HealthStatus::Warn => write!(f, "WARN"),
            HealthStatus::Incomplete => write!(f, "INCOMPLETE"),
        }
    }
}

/// Classify permission health from both contexts and the runtime trust signal.
///
/// Any capability missing in an evaluated context yields `Incomplete`,
/// regardless of the trust signal. `Warn` is only reachable when the
/// login context was checked and reported everything granted.
pub fn classify(
    terminal: &PermissionSet,
    login: LoginEvidence<'_>,
    trust: &TrustSignal,
) -> HealthStatus {
    if !terminal.all_granted() {
        return HealthStatus::Incomplete;
    }
    match login {
        LoginEvidence::Unavailable => HealthStatus::Incomplete,
        LoginEvidence::Checked(set) if !set.all_granted() => HealthStatus::Incomplete,
        LoginEvidence::Checked(_) if trust.is_untrusted() => HealthStatus::Warn,
        LoginEvidence::NotChecked if trust.is_untrusted() => HealthStatus::Incomplete,
        _ => HealthStatus::Ok,
    }
}
