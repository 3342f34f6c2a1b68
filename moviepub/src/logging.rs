//! Logging initialization

use moviepub_core::MoviePubError;
use tracing_subscriber::EnvFilter;

/// Install a `tracing` subscriber writing to stderr.
///
/// `RUST_LOG` wins over `filter` when set. Fails if the filter does not parse
/// or a global subscriber is already installed.
pub fn init_logging(filter: &str) -> Result<(), MoviePubError> {
    let filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(env) if !env.is_empty() => EnvFilter::try_new(env),
        _ => EnvFilter::try_new(filter),
    }
    .map_err(|e| MoviePubError::configuration("log_filter", e.to_string()))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| MoviePubError::Initialization {
            reason: format!("Failed to install log subscriber: {}", e),
        })
}
