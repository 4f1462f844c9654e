//! Node configuration

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::NodeError;
use crate::overlay::PeerHandle;
use crate::package::PublicKey;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub overlay: OverlayConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Display name, reported by the status endpoint
    #[serde(default = "default_node_name")]
    pub name: String,

    /// Data directory (database, packages, node key)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: default_node_name(),
            data_dir: default_data_dir(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Directory holding the chain files; shared by the nodes on one host.
    /// Defaults to `<data_dir>/ledger`.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Seed directory packages are published to and fetched from.
    /// Defaults to `<data_dir>/seeds`.
    #[serde(default)]
    pub seed_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OverlayConfig {
    /// Hex public keys of the peers to crawl
    #[serde(default)]
    pub peers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_reconcile_initial_delay")]
    pub reconcile_initial_delay_secs: u64,

    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: u64,

    #[serde(default = "default_crawl_initial_delay")]
    pub crawl_initial_delay_secs: u64,

    #[serde(default = "default_crawl_interval")]
    pub crawl_interval_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            reconcile_initial_delay_secs: default_reconcile_initial_delay(),
            reconcile_interval_secs: default_reconcile_interval(),
            crawl_initial_delay_secs: default_crawl_initial_delay(),
            crawl_interval_secs: default_crawl_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Serve the HTTP API when running the node
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// HTTP API port
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            http_port: default_http_port(),
        }
    }
}

// Defaults
fn default_node_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "catalog-node".to_string())
}
fn default_data_dir() -> PathBuf { PathBuf::from("./catalog-data") }
fn default_reconcile_initial_delay() -> u64 { 5 }
fn default_reconcile_interval() -> u64 { 3600 }
fn default_crawl_initial_delay() -> u64 { 20 }
fn default_crawl_interval() -> u64 { 3600 }
fn default_true() -> bool { true }
fn default_http_port() -> u16 { 8085 }

impl Config {
    /// Read a TOML config file, falling back to defaults if it doesn't exist.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            info!("Config file {:?} not found, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("parsing config file {:?}", path))
    }

    /// A default configuration rooted at `data_dir`.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let mut config = Self::default();
        config.node.data_dir = data_dir.into();
        config
    }

    pub fn data_dir(&self) -> &Path {
        &self.node.data_dir
    }

    /// Package sources this node publishes with `create`.
    pub fn package_dir(&self) -> PathBuf {
        self.node.data_dir.join("package")
    }

    /// Downloaded packages, laid out by identity.
    pub fn install_dir(&self) -> PathBuf {
        self.node.data_dir.join("installed")
    }

    pub fn key_path(&self) -> PathBuf {
        self.node.data_dir.join(crate::identity::KEY_FILE)
    }

    pub fn ledger_dir(&self) -> PathBuf {
        self.ledger
            .dir
            .clone()
            .unwrap_or_else(|| self.node.data_dir.join("ledger"))
    }

    pub fn seed_dir(&self) -> PathBuf {
        self.transport
            .seed_dir
            .clone()
            .unwrap_or_else(|| self.node.data_dir.join("seeds"))
    }

    /// Configured peers; every entry must be a hex public key.
    pub fn peers(&self) -> Result<Vec<PeerHandle>, NodeError> {
        self.overlay
            .peers
            .iter()
            .map(|hex| {
                hex.parse::<PublicKey>()
                    .map(PeerHandle::new)
                    .map_err(|e| NodeError::Config(format!("invalid peer key {:?}: {}", hex, e)))
            })
            .collect()
    }
}
