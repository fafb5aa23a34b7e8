use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::types::Config;

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{path}': {source}")]
    ParseError {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Config validation failed: {message}")]
    ValidationError { message: String },
}

impl Config {
    /// Returns the path to the configuration file.
    ///
    /// Uses `~/.config/uisync/config.toml` on Unix/macOS,
    /// or equivalent on other platforms via `dirs::config_dir()`.
    /// Falls back to current directory if config_dir is unavailable.
    pub fn config_path() -> PathBuf {
        let config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        config_dir.join("uisync").join("config.toml")
    }

    /// Loads configuration from the default config file.
    ///
    /// If the file doesn't exist, returns `Config::default()`.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_path();

        if !path.exists() {
            return Ok(Config::default());
        }
        Self::load_from(&path)
    }

    /// Reads, parses and validates the TOML file at `path`.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// Checks:
    /// - The renderer address is set
    /// - Timeouts and the frame limit are non-zero
    /// - The backoff base does not exceed its cap
    pub fn validate(&self) -> Result<(), ConfigError> {
        let transport = &self.transport;
        if transport.address.trim().is_empty() {
            return Err(invalid("transport.address must not be empty"));
        }
        if transport.local_connect_timeout_ms == 0 || transport.remote_connect_timeout_ms == 0 {
            return Err(invalid("connect timeouts must be greater than zero"));
        }
        if transport.backoff_base_ms > transport.backoff_max_ms {
            return Err(ConfigError::ValidationError {
                message: format!(
                    "backoff_base_ms ({}) exceeds backoff_max_ms ({})",
                    transport.backoff_base_ms, transport.backoff_max_ms
                ),
            });
        }
        if transport.max_frame_bytes == 0 {
            return Err(invalid("max_frame_bytes must be greater than zero"));
        }
        if self.session.method_timeout_ms == 0 {
            return Err(invalid("session.method_timeout_ms must be greater than zero"));
        }
        Ok(())
    }
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::ValidationError {
        message: message.to_string(),
    }
}
