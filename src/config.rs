//! Configuration management
//!
//! TOML configuration with environment variable overrides and defaults.
//!
//! ```toml
//! [server]
//! listen_addr = "0.0.0.0:8086"
//! log_level = "info"
//!
//! [streaming]
//! heartbeat_interval_ms = 10000
//! fetch_timeout_ms = 30000
//! chunk_multiplier = 60
//! ```

use crate::error::{Error, Result, ValidationError};
use crate::query::stream::StreamOptions;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ApplicationConfig {
    /// HTTP server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Streaming execution settings
    #[serde(default)]
    pub streaming: StreamingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Listen address (host:port)
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Log level filter (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// CORS allowed origins (empty = allow any origin)
    #[serde(default)]
    pub cors_allowed_origins: Vec<String>,
}

/// Streaming configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamingConfig {
    /// Minimum spacing between heartbeat events in milliseconds
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Deadline for each backend fetch in milliseconds
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,

    /// Number of steps per evaluation window
    #[serde(default = "default_chunk_multiplier")]
    pub chunk_multiplier: u32,

    /// Message carried by heartbeat events
    #[serde(default = "default_heartbeat_message")]
    pub heartbeat_message: String,
}

// Default value functions
fn default_listen_addr() -> String {
    "0.0.0.0:8086".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_heartbeat_interval_ms() -> u64 {
    10_000
}
fn default_fetch_timeout_ms() -> u64 {
    30_000
}
fn default_chunk_multiplier() -> u32 {
    60
}
fn default_heartbeat_message() -> String {
    "heartbeat".to_string()
}

/// Upper bound for the chunk multiplier
const MAX_CHUNK_MULTIPLIER: u32 = 100_000;

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            log_level: default_log_level(),
            cors_allowed_origins: Vec::new(),
        }
    }
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            chunk_multiplier: default_chunk_multiplier(),
            heartbeat_message: default_heartbeat_message(),
        }
    }
}

impl StreamingConfig {
    /// Options handed to each streaming execution
    pub fn stream_options(&self) -> StreamOptions {
        StreamOptions {
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
            fetch_timeout: Duration::from_millis(self.fetch_timeout_ms),
            chunk_multiplier: self.chunk_multiplier,
            heartbeat_message: self.heartbeat_message.clone(),
        }
    }
}

impl ApplicationConfig {
    /// Load configuration from a TOML file and apply environment overrides
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml(&contents)
            .map_err(|e| Error::Configuration(format!("{}: {}", path.display(), e)))?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| Error::Configuration(e.to_string()))
    }

    /// Defaults with environment variable overrides
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides
    ///
    /// Recognised variables: `STREAM_LISTEN_ADDR`, `STREAM_HEARTBEAT_MS`,
    /// `STREAM_FETCH_TIMEOUT_MS`, `STREAM_CHUNK_MULTIPLIER`, `RUST_LOG`.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("STREAM_LISTEN_ADDR") {
            self.server.listen_addr = addr;
        }
        if let Ok(level) = std::env::var("RUST_LOG") {
            self.server.log_level = level;
        }
        if let Some(ms) = parse_env("STREAM_HEARTBEAT_MS")? {
            self.streaming.heartbeat_interval_ms = ms;
        }
        if let Some(ms) = parse_env("STREAM_FETCH_TIMEOUT_MS")? {
            self.streaming.fetch_timeout_ms = ms;
        }
        if let Some(multiplier) = parse_env("STREAM_CHUNK_MULTIPLIER")? {
            self.streaming.chunk_multiplier = multiplier;
        }
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.listen_addr.trim().is_empty() {
            return Err(Error::Configuration(
                "listen_addr cannot be empty".to_string(),
            ));
        }
        if self.streaming.heartbeat_interval_ms == 0 {
            return Err(out_of_range("heartbeat_interval_ms", 0, 1, u64::MAX).into());
        }
        if self.streaming.fetch_timeout_ms == 0 {
            return Err(out_of_range("fetch_timeout_ms", 0, 1, u64::MAX).into());
        }
        let multiplier = self.streaming.chunk_multiplier;
        if multiplier == 0 || multiplier > MAX_CHUNK_MULTIPLIER {
            let err = out_of_range("chunk_multiplier", multiplier, 1, MAX_CHUNK_MULTIPLIER);
            return Err(err.into());
        }
        Ok(())
    }

    /// Serialize to TOML text
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().map(Some).map_err(|_| {
            ValidationError::InvalidFormat {
                field: name.to_string(),
                message: format!("cannot parse '{}'", raw),
            }
            .into()
        }),
        Err(_) => Ok(None),
    }
}

fn out_of_range(
    field: &str,
    value: impl ToString,
    min: impl ToString,
    max: impl ToString,
) -> ValidationError {
    ValidationError::OutOfRange {
        field: field.to_string(),
        value: value.to_string(),
        min: min.to_string(),
        max: max.to_string(),
    }
}
