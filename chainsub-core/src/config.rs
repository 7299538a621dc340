//! Manager configuration
//!
//! Configuration can be built in code with the fluent `with_*` methods,
//! loaded from JSON, or left to defaults read from the environment:
//!
//! - `CHAINSUB_STORE_PATH`: sled database directory (default `./data/chainsub.db`)
//! - `CHAINSUB_RECONNECT_DELAY_MS`: base backoff delay (default 1000)
//! - `CHAINSUB_MAX_RECONNECT_ATTEMPTS`: attempts per reconnect cycle (default 5)
//!
//! # Examples
//!
//! ```rust
//! use chainsub_core::{ManagerConfig, NetworkConfig, ReconnectConfig};
//! use std::time::Duration;
//!
//! let config = ManagerConfig::new("wallet-watcher")
//!     .with_network(
//!         NetworkConfig::new("mainnet", "wss://api.mainnet-beta.solana.com")
//!             .with_http_url("https://api.mainnet-beta.solana.com"),
//!     )
//!     .with_reconnect(ReconnectConfig::new(3, Duration::from_millis(500)));
//!
//! assert!(config.validate().is_ok());
//! ```

use crate::error::{Error, Result};
use crate::types::Network;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
const DEFAULT_RECONNECT_DELAY_MS: u64 = 1000;
const DEFAULT_STORE_PATH: &str = "./data/chainsub.db";

/// One logical network and its endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Network name
    pub network: Network,
    /// WebSocket endpoint (`ws://` or `wss://`)
    pub ws_url: String,
    /// JSON-RPC HTTP endpoint used for status reconciliation
    #[serde(default)]
    pub http_url: Option<String>,
    /// Inactive networks are configured but get no connection
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl NetworkConfig {
    /// Create an active network with only a WebSocket endpoint
    pub fn new(network: impl Into<Network>, ws_url: impl Into<String>) -> Self {
        Self {
            network: network.into(),
            ws_url: ws_url.into(),
            http_url: None,
            active: true,
        }
    }

    /// Set the HTTP endpoint
    pub fn with_http_url(mut self, http_url: impl Into<String>) -> Self {
        self.http_url = Some(http_url.into());
        self
    }

    /// Mark the network active or inactive
    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }
}

/// Backoff parameters for opening connections
///
/// Attempt `k` (0-based) waits `reconnect_delay * 2^k`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Number of attempts per reconnect cycle
    pub max_reconnect_attempts: u32,
    /// Base delay in milliseconds
    pub reconnect_delay_ms: u64,
}

impl ReconnectConfig {
    /// Create a reconnect configuration
    pub fn new(max_reconnect_attempts: u32, reconnect_delay: Duration) -> Self {
        Self {
            max_reconnect_attempts,
            reconnect_delay_ms: u64::try_from(reconnect_delay.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Base delay as a `Duration`
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: env_or("CHAINSUB_MAX_RECONNECT_ATTEMPTS", DEFAULT_MAX_RECONNECT_ATTEMPTS),
            reconnect_delay_ms: env_or("CHAINSUB_RECONNECT_DELAY_MS", DEFAULT_RECONNECT_DELAY_MS),
        }
    }
}

/// Top-level configuration for the subscription manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Service name used for telemetry
    pub service_name: String,
    /// Directory of the durable record store
    pub store_path: PathBuf,
    /// Backoff parameters
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    /// Configured networks
    #[serde(default)]
    pub networks: Vec<NetworkConfig>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            service_name: "chainsub".to_string(),
            store_path: std::env::var("CHAINSUB_STORE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_STORE_PATH)),
            reconnect: ReconnectConfig::default(),
            networks: Vec::new(),
        }
    }
}

impl ManagerConfig {
    /// Create a configuration with a custom service name
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    /// Parse a configuration from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Add a network
    pub fn with_network(mut self, network: NetworkConfig) -> Self {
        self.networks.push(network);
        self
    }

    /// Set the backoff parameters
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Set the store directory
    pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = path.into();
        self
    }

    /// Look up a network's configuration
    pub fn network(&self, network: &Network) -> Option<&NetworkConfig> {
        self.networks.iter().find(|n| &n.network == network)
    }

    /// Names of all networks marked active
    pub fn active_networks(&self) -> impl Iterator<Item = &Network> {
        self.networks.iter().filter(|n| n.active).map(|n| &n.network)
    }

    /// Check network names and endpoints
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for network in &self.networks {
            if network.network.as_str().is_empty() {
                return Err(Error::Config("network name must not be empty".to_string()));
            }
            if !seen.insert(&network.network) {
                return Err(Error::Config(format!(
                    "network '{}' is configured twice",
                    network.network
                )));
            }
            if !(network.ws_url.starts_with("ws://") || network.ws_url.starts_with("wss://")) {
                return Err(Error::Config(format!(
                    "network '{}' has a non-WebSocket url: {}",
                    network.network, network.ws_url
                )));
            }
        }
        Ok(())
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
