//! Configuration for the presence core.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Name of the replicated directed-presence cache.
pub const DEFAULT_CACHE_NAME: &str = "Directed Presences";

/// Name the cache listener is registered under in logs.
pub const DEFAULT_LISTENER_NAME: &str = "directed-presence-listener";

/// Default period of the expiry sweep.
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 60_000;

/// Configuration for the presence core.
///
/// Every field has a default, so an empty JSON object is a valid document.
///
/// # Example
///
/// ```
/// use presently::PresenceConfig;
/// use std::time::Duration;
///
/// let config = PresenceConfig::new().sweep_interval(Duration::from_secs(5));
/// assert_eq!(config.cache_name, "Directed Presences");
/// assert_eq!(config.sweep_interval_ms, 5_000);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    /// Name of the replicated cache.
    pub cache_name: String,
    /// Period of the expiry sweep, in milliseconds.
    pub sweep_interval_ms: u64,
    /// Whether the reverse-index listener receives values with events.
    ///
    /// The listener cannot work without them; turning this off makes it
    /// fail and deregister on the first event.
    pub include_values: bool,
    /// Name the listener is reported under.
    pub listener_name: String,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            cache_name: DEFAULT_CACHE_NAME.to_string(),
            sweep_interval_ms: DEFAULT_SWEEP_INTERVAL_MS,
            include_values: true,
            listener_name: DEFAULT_LISTENER_NAME.to_string(),
        }
    }
}

impl PresenceConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a JSON document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the cache name.
    pub fn cache_name(mut self, name: impl Into<String>) -> Self {
        self.cache_name = name.into();
        self
    }

    /// Set the sweep period.
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set whether listener events carry values.
    pub fn include_values(mut self, include: bool) -> Self {
        self.include_values = include;
        self
    }

    /// Set the listener name.
    pub fn listener_name(mut self, name: impl Into<String>) -> Self {
        self.listener_name = name.into();
        self
    }

    /// The sweep period as a [`Duration`].
    pub fn sweep_period(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    /// Check field values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_name.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "cache_name",
                reason: "must not be empty".to_string(),
            });
        }
        if self.sweep_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "sweep_interval_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.listener_name.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "listener_name",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}
