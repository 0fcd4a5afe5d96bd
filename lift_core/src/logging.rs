//! Tracing setup for the `lift` binary and the library's tests.
//!
//! Events go to stderr so whatever a command prints on stdout stays usable
//! by scripts. Commits, restores and catalog writes log at INFO; per-entity
//! detail at DEBUG; recoverable file problems (legacy or unreadable catalog,
//! leftover restore journal) at WARN.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Filter directives used when RUST_LOG is not set
pub fn default_directives(verbose: bool) -> &'static str {
    if verbose {
        "warn,lift_core=debug,lift=debug"
    } else {
        "warn"
    }
}

/// Install the global subscriber.
///
/// `verbose` turns on DEBUG for this workspace's crates only; RUST_LOG, when
/// set, replaces the defaults entirely. Calling it a second time is a no-op.
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(verbose)));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact().with_target(verbose).with_writer(std::io::stderr))
        .try_init();
}

/// Capture DEBUG output through the test harness
#[cfg(test)]
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(EnvFilter::new("lift_core=debug"))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives_parse() {
        for verbose in [false, true] {
            let directives = default_directives(verbose);
            assert!(EnvFilter::try_new(directives).is_ok(), "{}", directives);
        }
        assert!(default_directives(true).contains("lift_core=debug"));
        assert!(!default_directives(false).contains("debug"));
    }
}
