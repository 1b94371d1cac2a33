//! Connection configuration.

use std::time::Duration;

use oxygen_protocol::wire::{DEFAULT_PORT, HEARTBEAT_INTERVAL};
use serde::{Deserialize, Serialize};

/// Settings for one [`Connection`](crate::Connection).
///
/// Every field has a default, so a config file only needs to name the
/// fields it changes (`#[serde(default)]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Host name or IP address of the Oxygen server.
    pub host: String,

    /// TCP port of the Oxygen server.
    pub port: u16,

    /// How often the heartbeat worker sends a keep-alive frame.
    pub heartbeat_interval: Duration,

    /// Largest inbound frame body the reader accepts. A larger size field
    /// is treated as a corrupt stream and closes the connection.
    pub max_frame_size: usize,

    /// Disable Nagle's algorithm. Requests are small and latency matters
    /// more than packet count.
    pub nodelay: bool,
}

impl ConnectionConfig {
    /// Config for `host` with every other field at its default.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    /// `host:port`, for logs and error messages.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            max_frame_size: 16 * 1024 * 1024,
            nodelay: true,
        }
    }
}
