//! Tracing subscriber setup.

use crate::config::{LogConfig, LogFormat};
use tracing_subscriber::EnvFilter;

/// Environment variable consulted before `RUST_LOG`
pub const LOG_ENV: &str = "VIGIA_LOG";

/// Build the filter: `VIGIA_LOG`, then `RUST_LOG`, then the configured default.
#[must_use]
pub fn env_filter(config: &LogConfig) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(&config.filter))
}

/// Install the global subscriber.
///
/// Returns `false` when a subscriber was already set, so repeated calls from
/// several tests are harmless.
pub fn init(config: &LogConfig) -> bool {
    let filter = env_filter(config);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    let result = match config.format {
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    result.is_ok()
}
