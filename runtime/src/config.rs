//! Bridge configuration.
//!
//! ```ignore
//! let config = BridgeConfig::default()
//!     .with_result_source(ResultSource::Local)
//!     .with_shutdown_timeout(Duration::from_secs(5));
//!
//! // Or from TOML
//! let config = BridgeConfig::from_toml_str(r#"
//!     result_source = "local"
//!     shutdown_timeout_ms = 5000
//! "#)?;
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Configuration error
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The TOML document could not be parsed
    #[error("Failed to parse bridge configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range
    #[error("Invalid bridge configuration: {0}")]
    Invalid(String),
}

/// Where the authoritative result value lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultSource {
    /// The shared resource store, written by the provider's own side-effect path
    #[default]
    Shared,
    /// A snapshot private to the bridge, written from settled payloads
    Local,
}

/// Configuration for [`QueryBridge`](crate::QueryBridge) instances
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Where values are read from
    pub result_source: ResultSource,
    /// How long `shutdown` waits for in-flight calls
    #[serde(rename = "shutdown_timeout_ms", with = "duration_ms")]
    pub shutdown_timeout: Duration,
    /// Buffered settlements per observer before it lags
    pub broadcast_capacity: usize,
}

impl BridgeConfig {
    /// Set where values are read from
    #[must_use]
    pub const fn with_result_source(mut self, source: ResultSource) -> Self {
        self.result_source = source;
        self
    }

    /// Set the shutdown timeout
    #[must_use]
    pub const fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Set the settlement broadcast capacity
    #[must_use]
    pub const fn with_broadcast_capacity(mut self, capacity: usize) -> Self {
        self.broadcast_capacity = capacity;
        self
    }

    /// Parse and validate a TOML document; missing keys take their defaults
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] for malformed TOML, [`ConfigError::Invalid`] for
    /// out-of-range values.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] when the broadcast capacity is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broadcast_capacity == 0 {
            return Err(ConfigError::Invalid(
                "broadcast_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            result_source: ResultSource::Shared,
            shutdown_timeout: Duration::from_secs(30),
            broadcast_capacity: 64,
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
