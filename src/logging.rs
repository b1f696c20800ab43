//! Tracing subscriber setup for the `agentmeshd` binary.
//!
//! Logs go to stderr so command output on stdout stays machine readable. A
//! background daemon's stderr is its `agentmeshd.log`.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable holding the log filter directives.
pub const LOG_ENV: &str = "AGENTMESH_LOG";

/// Filter used when `AGENTMESH_LOG` is unset or invalid.
pub const DEFAULT_FILTER: &str = "info";

/// Build the filter from `AGENTMESH_LOG`, falling back to [`DEFAULT_FILTER`].
pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global subscriber. Safe to call more than once; later calls
/// are no-ops.
pub fn init(json: bool) {
    let registry = tracing_subscriber::registry().with(env_filter());

    let result = if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    };

    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_env_filter_defaults_to_info() {
        // SAFETY: serialized with every other test touching the environment
        unsafe { std::env::remove_var(LOG_ENV) };
        assert_eq!(env_filter().to_string(), DEFAULT_FILTER);
    }

    #[test]
    #[serial]
    fn test_env_filter_reads_directives() {
        // SAFETY: serialized with every other test touching the environment
        unsafe { std::env::set_var(LOG_ENV, "agentmesh=debug") };
        let filter = env_filter();
        unsafe { std::env::remove_var(LOG_ENV) };
        assert_eq!(filter.to_string(), "agentmesh=debug");
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init(false);
        init(true);
    }
}
