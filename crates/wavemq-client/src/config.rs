//! Delivery and codec configuration.
//!
//! Supports configuration from:
//! - TOML file (default: `wavemq.toml`)
//! - Environment variables with `WAVEMQ__` prefix (double underscore for nesting)
//! - In-file variable substitution: `${VAR}` or `${VAR:-default}`
//!
//! Environment variable examples:
//! - `WAVEMQ__DELIVERY__RETRY_INTERVAL_MS=2000`
//! - `WAVEMQ__CODEC__MAX_PACKET_SIZE=1048576`
//!
//! In-file substitution example:
//! ```toml
//! [delivery]
//! retry_interval_ms = ${RETRY_MS:-5000}
//! ```

use std::path::Path;
use std::time::Duration;

use config::{Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;

/// Default time before an unacknowledged packet is re-sent.
pub const DEFAULT_RETRY_INTERVAL_MS: u64 = 5_000;

/// Largest packet MQTT 3.1.1 can frame: 1 type byte, 4 length bytes, body.
pub const MAX_FRAME_SIZE: usize = 1 + 4 + 268_435_455;

/// Substitute environment variables in a string.
/// Supports `${VAR}` and `${VAR:-default}` syntax.
fn substitute_env_vars(content: &str) -> Result<String, ConfigError> {
    let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}")
        .map_err(|e| ConfigError::Validation(format!("substitution pattern: {}", e)))?;
    Ok(re
        .replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            std::env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .to_string())
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging configuration.
    pub log: LogConfig,
    /// Retransmission and in-flight limits.
    pub delivery: DeliveryConfig,
    /// Decoder limits.
    pub codec: CodecConfig,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level: error, warn, info, debug, trace.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Delivery state machine configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Milliseconds to wait for an acknowledgement before re-sending.
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,

    /// Maximum outbound QoS 1/2 exchanges in flight (0 = unlimited).
    pub max_inflight: usize,
}

fn default_retry_interval_ms() -> u64 {
    DEFAULT_RETRY_INTERVAL_MS
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            retry_interval_ms: default_retry_interval_ms(),
            max_inflight: 0,
        }
    }
}

impl DeliveryConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.retry_interval_ms == 0 {
            return Err("delivery.retry_interval_ms must be greater than 0".into());
        }
        if self.max_inflight > u16::MAX as usize {
            return Err(format!(
                "delivery.max_inflight must be at most {}, got {}",
                u16::MAX,
                self.max_inflight
            ));
        }
        Ok(())
    }
}

/// Codec configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    /// Maximum packet size in bytes accepted by the decoder (0 = unlimited).
    pub max_packet_size: usize,
}

impl CodecConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_packet_size > MAX_FRAME_SIZE {
            return Err(format!(
                "codec.max_packet_size must be at most {}, got {}",
                MAX_FRAME_SIZE, self.max_packet_size
            ));
        }
        Ok(())
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file.
    Io(std::io::Error),
    /// Config parsing/loading error.
    Config(config::ConfigError),
    /// Invalid configuration value.
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Config(e) => write!(f, "Config error: {}", e),
            ConfigError::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(e: config::ConfigError) -> Self {
        ConfigError::Config(e)
    }
}

impl Config {
    /// Load configuration from a TOML file with environment variable overrides.
    ///
    /// A missing file is not an error; defaults and environment apply.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .set_default("log.level", "info")?
            .set_default("delivery.retry_interval_ms", DEFAULT_RETRY_INTERVAL_MS as i64)?
            .set_default("delivery.max_inflight", 0)?
            .set_default("codec.max_packet_size", 0)?;

        let path = path.as_ref();
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let substituted = substitute_env_vars(&content)?;
            builder = builder.add_source(File::from_str(&substituted, FileFormat::Toml));
        }

        // Override with environment variables (WAVEMQ__DELIVERY__MAX_INFLIGHT, etc.)
        let cfg = builder
            .add_source(
                Environment::with_prefix("WAVEMQ")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = cfg.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let substituted = substitute_env_vars(content)?;
        let config: Config = toml::from_str(&substituted)
            .map_err(|e| ConfigError::Validation(format!("TOML parse error: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.delivery.validate().map_err(ConfigError::Validation)?;
        self.codec.validate().map_err(ConfigError::Validation)?;
        Ok(())
    }
}
