//! Node configuration with TOML file support.

use serde::{Deserialize, Serialize};

use strata_network::ServerConfig;
use strata_types::NetworkId;

use crate::NodeError;

/// Configuration for a strata membership node.
///
/// Can be loaded from a TOML file via [`NodeConfig::from_toml_file`] or
/// built programmatically (e.g. for tests).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Which network to connect to.
    #[serde(default = "default_network")]
    pub network: NetworkId,

    /// Interface to bind the P2P listener on.
    #[serde(default = "default_listen_ip")]
    pub listen_ip: String,

    /// Address other nodes should dial us at. Forms the local peer id
    /// together with the bound port.
    #[serde(default = "default_advertise_ip")]
    pub advertise_ip: String,

    /// Port to listen on for P2P connections. 0 picks an ephemeral port.
    #[serde(default = "default_p2p_port")]
    pub port: u16,

    /// Bootstrap peer addresses ("host:port") to connect to on startup.
    #[serde(default)]
    pub bootstrap_peers: Vec<String>,

    /// The `limit` used in outgoing peer requests. 0 = unbounded.
    #[serde(default)]
    pub gossip_limit: u32,

    /// Seconds between liveness checks on each connection.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// Seconds one liveness attempt waits for a reply.
    #[serde(default = "default_liveness_timeout_secs")]
    pub liveness_timeout_secs: u64,

    /// Consecutive liveness timeouts before a peer is evicted.
    #[serde(default = "default_liveness_retry_limit")]
    pub liveness_retry_limit: u32,

    /// Log format: "human" or "json".
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Log level filter: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// ── Serde default helpers ──────────────────────────────────────────────

fn default_network() -> NetworkId {
    NetworkId::Dev
}

fn default_listen_ip() -> String {
    "0.0.0.0".to_string()
}

fn default_advertise_ip() -> String {
    "127.0.0.1".to_string()
}

fn default_p2p_port() -> u16 {
    NetworkId::Dev.default_port()
}

fn default_heartbeat_interval_secs() -> u64 {
    60
}

fn default_liveness_timeout_secs() -> u64 {
    10
}

fn default_liveness_retry_limit() -> u32 {
    3
}

fn default_log_format() -> String {
    "human".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

// ── Impl ───────────────────────────────────────────────────────────────

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: &str) -> Result<Self, NodeError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| NodeError::Config(e.to_string()))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, NodeError> {
        toml::from_str(s).map_err(|e| NodeError::Config(e.to_string()))
    }

    /// Serialize the configuration to a TOML string.
    pub fn to_toml_string(&self) -> String {
        toml::to_string_pretty(self).expect("NodeConfig is always serializable to TOML")
    }

    /// The membership protocol tunables this configuration resolves to.
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            heartbeat_interval: std::time::Duration::from_secs(self.heartbeat_interval_secs),
            liveness_timeout: std::time::Duration::from_secs(self.liveness_timeout_secs),
            liveness_retry_limit: self.liveness_retry_limit,
            gossip_limit: self.gossip_limit,
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            network: default_network(),
            listen_ip: default_listen_ip(),
            advertise_ip: default_advertise_ip(),
            port: default_p2p_port(),
            bootstrap_peers: Vec::new(),
            gossip_limit: 0,
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            liveness_timeout_secs: default_liveness_timeout_secs(),
            liveness_retry_limit: default_liveness_retry_limit(),
            log_format: default_log_format(),
            log_level: default_log_level(),
        }
    }
}
