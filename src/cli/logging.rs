//! Tracing setup

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset.
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "moonshine_flow=debug"
    } else {
        "warn"
    }
}

/// Install the global subscriber. Logs go to stderr so stdout stays
/// machine-readable (`check-permissions`, `doctor --json`).
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbose_raises_level() {
        assert_eq!(default_directive(false), "warn");
        assert!(default_directive(true).ends_with("debug"));
    }
}
