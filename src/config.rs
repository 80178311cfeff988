use crate::std;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{LogLevel, Result};

/// Environment variable overriding the reader pool size.
pub const ENV_READERS: &str = "TOTEMBUS_READERS";

/// Runtime configuration of an engine and its network layer.
///
/// ```rust
/// use totembus::BusConfig;
///
/// let config = BusConfig::from_json(r#"{"readers": 4}"#).unwrap();
/// assert_eq!(config.readers, 4);
/// assert_eq!(config.ping_retries, 2);
/// ```
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BusConfig {
    /// Reassembly slots: the number of sources that may interleave fragments
    pub readers: usize,
    /// Reassembly buffer capacity per slot, bytes
    pub reader_buffer: usize,
    /// Outbound queue depth, frames
    pub queue_depth: usize,
    /// Response latch wait, milliseconds
    pub response_timeout_ms: u64,
    /// Single ping wait, milliseconds
    pub ping_timeout_ms: u64,
    /// Ping probes per reachability check
    pub ping_retries: u32,
    /// Verbosity of the engine's own logging
    pub log_level: LogLevel,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            readers: 2,
            reader_buffer: crate::READER_BUFFER,
            queue_depth: 100,
            response_timeout_ms: 1000,
            ping_timeout_ms: 50,
            ping_retries: 2,
            log_level: LogLevel::default(),
        }
    }
}

impl BusConfig {
    /// Loads a configuration from its JSON form.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    /// Gets the configured verbosity as a `log` filter.
    pub fn log_filter(&self) -> log::LevelFilter {
        self.log_level.into()
    }
}

/// Gets the configured reader pool size, honoring the [ENV_READERS] override.
#[cfg(feature = "std")]
pub fn bus_readers() -> usize {
    std::env::var(ENV_READERS)
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|&n| n >= 1)
        .unwrap_or(BusConfig::default().readers)
}
