//! launchd adapters

mod launchctl;
mod login_probe;

pub use launchctl::LaunchctlService;
pub use login_probe::LaunchctlLoginProbe;

const LAUNCHCTL: &str = "/bin/launchctl";

/// Numeric uid of the current user, for `gui/<uid>` domains.
pub fn current_uid() -> u32 {
    #[cfg(unix)]
    {
        nix::unistd::getuid().as_raw()
    }
    #[cfg(not(unix))]
    {
        0
    }
}
