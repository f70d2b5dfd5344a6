//! Subscriber setup for the `tracing` output of the crate.

use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;

/// Builds the filter: `RUST_LOG` when set, else the configured directive.
#[must_use]
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs a global `fmt` subscriber in text or JSON form.
///
/// Returns `false` when a global subscriber was already installed, which
/// leaves the existing one in place.
pub fn init_tracing(config: &LoggingConfig) -> bool {
    let filter = env_filter(config);
    let installed = if config.json {
        fmt().with_env_filter(filter).json().try_init()
    } else {
        fmt().with_env_filter(filter).with_target(true).try_init()
    };
    installed.is_ok()
}
