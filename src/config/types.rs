use serde::{Deserialize, Serialize};

/// Root configuration container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Connection to the renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Renderer address (host:port).
    #[serde(default = "default_address")]
    pub address: String,
    /// Connect timeout for loopback peers in milliseconds (default: 200).
    #[serde(default = "default_local_connect_timeout_ms")]
    pub local_connect_timeout_ms: u64,
    /// Connect timeout for remote peers in milliseconds (default: 5000).
    #[serde(default = "default_remote_connect_timeout_ms")]
    pub remote_connect_timeout_ms: u64,
    /// First reconnect delay in milliseconds, doubled per retry (default: 1000).
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Upper bound for the reconnect delay in milliseconds (default: 60000).
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// Random extra delay added to each retry, in milliseconds (default: 1000).
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
    /// Largest frame accepted in either direction (default: 16 MiB).
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

/// Session behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// How long a method call waits for its result (default: 10000).
    #[serde(default = "default_method_timeout_ms")]
    pub method_timeout_ms: u64,
    /// Send a full patch after every reconnection (default: true).
    #[serde(default = "default_resync_on_reconnect")]
    pub resync_on_reconnect: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directives used when `RUST_LOG` is unset.
    #[serde(default = "default_filter")]
    pub filter: String,
}

fn default_address() -> String {
    "127.0.0.1:8550".to_string()
}

fn default_local_connect_timeout_ms() -> u64 {
    200
}

fn default_remote_connect_timeout_ms() -> u64 {
    5000
}

fn default_backoff_base_ms() -> u64 {
    1000
}

fn default_backoff_max_ms() -> u64 {
    60_000
}

fn default_jitter_ms() -> u64 {
    1000
}

fn default_max_frame_bytes() -> usize {
    16 * 1024 * 1024
}

fn default_method_timeout_ms() -> u64 {
    10_000
}

fn default_resync_on_reconnect() -> bool {
    true
}

fn default_filter() -> String {
    "info".to_string()
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            local_connect_timeout_ms: default_local_connect_timeout_ms(),
            remote_connect_timeout_ms: default_remote_connect_timeout_ms(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            jitter_ms: default_jitter_ms(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            method_timeout_ms: default_method_timeout_ms(),
            resync_on_reconnect: default_resync_on_reconnect(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
        }
    }
}
