use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::BurrowError;

/// Client runtime configuration.
///
/// Defaults match the deployed service; embedders normally only override
/// the two endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Chat socket endpoint, e.g. `ws://host/ws`
    pub socket_url: String,

    /// Base URL for the request/response endpoints
    pub api_base_url: String,

    /// Messages per history page
    pub page_size: u32,

    /// Delay before each reconnection attempt, in milliseconds
    pub reconnect_delay_ms: u64,

    /// Remote typing indicator lifetime, in milliseconds
    pub typing_expiry_ms: u64,

    /// Minimum interval between outbound typing frames, in milliseconds
    pub typing_send_interval_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            socket_url: "ws://localhost:8080/ws".to_string(),
            api_base_url: "http://localhost:8080".to_string(),
            page_size: 10,
            reconnect_delay_ms: 3000,
            typing_expiry_ms: 3000,
            typing_send_interval_ms: 1000,
        }
    }
}

impl ClientConfig {
    pub fn from_toml(raw: &str) -> crate::Result<Self> {
        toml::from_str(raw).map_err(|e| BurrowError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> crate::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| BurrowError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml(&raw)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn typing_expiry(&self) -> Duration {
        Duration::from_millis(self.typing_expiry_ms)
    }

    pub fn typing_send_interval(&self) -> Duration {
        Duration::from_millis(self.typing_send_interval_ms)
    }
}
