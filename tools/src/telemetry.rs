//! Logging setup for the `jersey` binary.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "jersey=info,jersey_tools=info,jersey_runtime=info,jersey_postgres=info";

/// Install the global tracing subscriber.
///
/// Logs go to stderr so stdout stays clean for JSON command output. Calling
/// this twice is a no-op.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::EnvFilter;

    #[test]
    fn default_filter_covers_every_jersey_crate() {
        for target in ["jersey=", "jersey_tools=", "jersey_runtime=", "jersey_postgres="] {
            assert!(DEFAULT_FILTER.contains(target), "{target} missing");
        }
        assert!(DEFAULT_FILTER.parse::<EnvFilter>().is_ok());
    }
}
