//! Client configuration.

use std::path::{Path, PathBuf};

use oxygen_streams::TransferConfig;
use oxygen_transport::ConnectionConfig;
use serde::{Deserialize, Serialize};

use crate::OxygenError;

/// Everything needed to start a [`Client`](crate::Client).
///
/// Loadable from JSON; missing fields take their defaults:
///
/// ```json
/// { "connection": { "host": "oxygen.example.com" }, "asset_dir": "data/assets" }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub connection: ConnectionConfig,
    pub transfer: TransferConfig,
    /// Where assets are downloaded to and uploaded from.
    pub asset_dir: PathBuf,
    /// Where build artefacts are downloaded to.
    pub build_dir: PathBuf,
}

impl ClientConfig {
    /// Defaults, pointed at `host`.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            connection: ConnectionConfig::new(host),
            ..Self::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, OxygenError> {
        serde_json::from_str(json).map_err(|e| OxygenError::Config(e.to_string()))
    }

    /// Reads and parses a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, OxygenError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        tracing::debug!(path = %path.display(), "config loaded");
        Self::from_json_str(&json)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            transfer: TransferConfig::default(),
            asset_dir: PathBuf::from("assets"),
            build_dir: PathBuf::from("builds"),
        }
    }
}
