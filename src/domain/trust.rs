//! Runtime trust signal scraped from the daemon's own stderr log

use serde::Serialize;

/// Marker line the launcher prints each time the daemon starts.
pub const DAEMON_START_MARKER: &str = "moonshine-flow daemon starting";

const LEGACY_START_MARKER: &str = "Moonshine Flow daemon starting";
const NOT_TRUSTED_MARKER: &str = "This process is not trusted!";
const MISSING_PERMISSIONS_MARKER: &str = "Missing macOS permissions detected:";

/// What the daemon reported about OS trust in its latest run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TrustSignal {
    Trusted,
    /// No log to judge from
    NoEvidence,
    Untrusted {
        failure: TrustFailure,
        timestamp: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrustFailure {
    /// The input listener was rejected by the OS
    ListenerNotTrusted,
    /// The daemon's own preflight found missing permissions
    MissingPermissions,
}

impl TrustFailure {
    pub fn describe(self) -> &'static str {
        match self {
            TrustFailure::ListenerNotTrusted => {
                "input listener is not trusted in daemon runtime context"
            }
            TrustFailure::MissingPermissions => "daemon runtime detected missing macOS permissions",
        }
    }
}

impl TrustSignal {
    pub fn is_untrusted(&self) -> bool {
        matches!(self, TrustSignal::Untrusted { .. })
    }

    /// Scan the daemon log, looking only at lines after the most recent start.
    pub fn scan(log: &str) -> Self {
        let lines: Vec<&str> = log.lines().collect();
        let start = lines
            .iter()
            .rposition(|l| l.contains(DAEMON_START_MARKER) || l.contains(LEGACY_START_MARKER))
            .unwrap_or(0);
        let recent = &lines[start..];

        let found = recent
            .iter()
            .find(|l| l.contains(NOT_TRUSTED_MARKER))
            .map(|l| (TrustFailure::ListenerNotTrusted, *l))
            .or_else(|| {
                recent
                    .iter()
                    .find(|l| l.contains(MISSING_PERMISSIONS_MARKER))
                    .map(|l| (TrustFailure::MissingPermissions, *l))
            });

        match found {
            Some((failure, line)) => TrustSignal::Untrusted {
                failure,
                timestamp: leading_timestamp(line),
            },
            None => TrustSignal::Trusted,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            TrustSignal::Trusted => "trusted".to_string(),
            TrustSignal::NoEvidence => "no daemon log".to_string(),
            TrustSignal::Untrusted { failure, timestamp } => match timestamp {
                Some(ts) => format!("{} at {}", failure.describe(), ts),
                None => failure.describe().to_string(),
            },
        }
    }
}

/// `2026-02-27 10:00:00,100 ...` -> `2026-02-27 10:00:00,100`
fn leading_timestamp(line: &str) -> Option<String> {
    let mut parts = line.split(' ');
    let date = parts.next()?;
    let time = parts.next()?;
    if date.len() == 10 && date.matches('-').count() == 2 && !time.is_empty() {
        Some(format!("{} {}", date, time))
    } else {
        None
    }
}
