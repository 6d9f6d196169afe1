//! Broker configuration loading.
//!
//! TOML is the sole config source; CLI flags override loaded values.
//! Every field has a default, so an empty file (or no file) is valid.
//!
//! ```toml
//! bind = "0.0.0.0:45784"
//! ack_timeout_ms = 15000
//! max_frame_bytes = 16777216
//! sweep_interval_ms = 7500
//! ```

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Top-level broker configuration.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Listen address, e.g. `0.0.0.0:45784`.  Port 0 binds an ephemeral port.
    pub bind: String,
    /// How long a dispatched delivery may stay unacked before it is presumed
    /// dead and its subscriber slot is released.
    pub ack_timeout_ms: u64,
    /// Per-frame payload ceiling; larger frames end the session.
    pub max_frame_bytes: usize,
    /// Queue maintenance tick: item expiry and stale-delivery reaping.
    pub sweep_interval_ms: u64,
}

impl BrokerConfig {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        BrokerConfig {
            bind: format!("0.0.0.0:{}", mq_protocol::DEFAULT_PORT),
            ack_timeout_ms: mq_protocol::ACK_TIMEOUT_MS,
            max_frame_bytes: mq_protocol::MAX_FRAME_BYTES,
            sweep_interval_ms: mq_protocol::ACK_TIMEOUT_MS / 2,
        }
    }
}

// ---------------------------------------------------------------------------
// Raw TOML deserialization types (with Option for optional fields)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawConfig {
    bind: Option<String>,
    ack_timeout_ms: Option<u64>,
    max_frame_bytes: Option<usize>,
    sweep_interval_ms: Option<u64>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Load broker config from a TOML file.
pub fn load_config_from_path(path: &Path) -> Result<BrokerConfig, ConfigError> {
    let toml_str = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading config file '{}': {}", path.display(), e)))?;
    load_config_from_str(&toml_str)
}

/// Load broker config from a TOML string, applying defaults for every
/// missing field.
pub fn load_config_from_str(toml_str: &str) -> Result<BrokerConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;
    let defaults = BrokerConfig::default();

    let ack_timeout_ms = raw.ack_timeout_ms.unwrap_or(defaults.ack_timeout_ms);
    if ack_timeout_ms == 0 {
        return Err(ConfigError::InvalidValue(
            "ack_timeout_ms must be greater than 0".to_owned(),
        ));
    }

    let max_frame_bytes = raw.max_frame_bytes.unwrap_or(defaults.max_frame_bytes);
    if max_frame_bytes == 0 {
        return Err(ConfigError::InvalidValue(
            "max_frame_bytes must be greater than 0".to_owned(),
        ));
    }

    // Sweep defaults to half the ack timeout so stale deliveries are
    // reclaimed within one timeout window of going stale.
    let sweep_interval_ms = raw.sweep_interval_ms.unwrap_or(ack_timeout_ms / 2);
    if sweep_interval_ms == 0 {
        return Err(ConfigError::InvalidValue(
            "sweep_interval_ms must be greater than 0".to_owned(),
        ));
    }

    Ok(BrokerConfig {
        bind: raw.bind.unwrap_or(defaults.bind),
        ack_timeout_ms,
        max_frame_bytes,
        sweep_interval_ms,
    })
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(s) => write!(f, "IO error: {}", s),
            ConfigError::Parse(s) => write!(f, "Parse error: {}", s),
            ConfigError::InvalidValue(s) => write!(f, "Invalid config value: {}", s),
        }
    }
}

impl std::error::Error for ConfigError {}
