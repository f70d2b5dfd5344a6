//! Configuration types for the stage view service.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::{Result, StageViewError};

/// Environment variable overriding [`LinkConfig::url_prefix`].
pub const ENV_URL_PREFIX: &str = "STAGEVIEW_URL_PREFIX";
/// Environment variable overriding [`CacheConfig::in_progress_ttl_ms`].
pub const ENV_IN_PROGRESS_TTL_MS: &str = "STAGEVIEW_IN_PROGRESS_TTL_MS";
/// Environment variable overriding [`LoggingConfig::filter`].
pub const ENV_LOG: &str = "STAGEVIEW_LOG";
/// Environment variable overriding [`LoggingConfig::json`].
pub const ENV_LOG_JSON: &str = "STAGEVIEW_LOG_JSON";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageViewConfig {
    /// Derived-view cache settings.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Hyperlink settings.
    #[serde(default)]
    pub links: LinkConfig,
    /// Log output settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl StageViewConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON document. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| StageViewError::InvalidConfig(e.to_string()))
    }

    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides read through `lookup`.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(prefix) = lookup(ENV_URL_PREFIX) {
            self.links.url_prefix = prefix;
        }
        if let Some(ttl) = lookup(ENV_IN_PROGRESS_TTL_MS) {
            self.cache.in_progress_ttl_ms = ttl.trim().parse().map_err(|_| {
                StageViewError::InvalidConfig(format!("{ENV_IN_PROGRESS_TTL_MS} is not a number: {ttl}"))
            })?;
        }
        if let Some(filter) = lookup(ENV_LOG) {
            self.logging.filter = filter;
        }
        if let Some(json) = lookup(ENV_LOG_JSON) {
            self.logging.json = matches!(json.trim(), "1" | "true" | "yes" | "on");
        }
        Ok(self)
    }

    /// Sets the cache configuration.
    #[must_use]
    pub const fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Sets the hyperlink prefix.
    #[must_use]
    pub fn with_url_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.links.url_prefix = prefix.into();
        self
    }

    /// Sets the logging configuration.
    #[must_use]
    pub fn with_logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = logging;
        self
    }
}

/// Derived-view cache settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// How long a view of a still-running execution may be reused.
    /// Zero means every query recomputes it.
    #[serde(default)]
    pub in_progress_ttl_ms: u64,
}

impl CacheConfig {
    /// Sets the in-progress TTL.
    #[must_use]
    pub fn with_in_progress_ttl(mut self, ttl: Duration) -> Self {
        self.in_progress_ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// In-progress TTL as a Duration.
    #[must_use]
    pub const fn in_progress_ttl(&self) -> Duration {
        Duration::from_millis(self.in_progress_ttl_ms)
    }
}

/// Hyperlink settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Prefix of every href.
    #[serde(default = "default_url_prefix")]
    pub url_prefix: String,
}

fn default_url_prefix() -> String {
    String::new()
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            url_prefix: default_url_prefix(),
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence.
    #[serde(default = "default_filter")]
    pub filter: String,
    /// Emit JSON lines instead of text.
    #[serde(default)]
    pub json: bool,
}

fn default_filter() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            json: false,
        }
    }
}

impl LoggingConfig {
    /// Sets the filter directive.
    #[must_use]
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    /// Switches JSON output on or off.
    #[must_use]
    pub const fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }
}
