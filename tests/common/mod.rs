//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::mpsc;

use catalog_node::config::Config;
use catalog_node::error::LedgerError;
use catalog_node::execution::{CapabilityRegistry, ExecutionDispatcher, ServiceContainer};
use catalog_node::ledger::{Block, Ledger, LocalLedger, Transaction};
use catalog_node::node::LifecycleEngine;
use catalog_node::overlay::{PeerHandle, StaticOverlay};
use catalog_node::package::{install_dir, Identifier, Package, PublicKey};
use catalog_node::storage::CatalogStore;
use catalog_node::sync::VoteReconciler;
use catalog_node::transport::{LocalTransport, Transport};

pub fn new_key() -> SigningKey {
    SigningKey::generate(&mut OsRng)
}

pub fn open_ledger(dir: &Path) -> (Arc<LocalLedger>, mpsc::UnboundedReceiver<Block>) {
    let (ledger, rx) = LocalLedger::open(dir, new_key()).unwrap();
    (Arc::new(ledger), rx)
}

/// A package identifier under a fixed foreign creator key.
pub fn subject(content_hash: &str) -> Identifier {
    Identifier::new(PublicKey::new(vec![0xab; 32]), content_hash)
}

pub fn peer_of(ledger: &LocalLedger) -> PeerHandle {
    PeerHandle::new(ledger.public_key())
}

/// Write `<root>/<name>/package.json` plus one payload file.
pub fn write_package(root: &Path, name: &str, manifest: Value) -> PathBuf {
    let dir = root.join(name);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("package.json"),
        serde_json::to_vec_pretty(&manifest).unwrap(),
    )
    .unwrap();
    std::fs::write(dir.join("payload.txt"), name).unwrap();
    dir
}

/// Ledger whose signing always fails.
pub struct FailingLedger {
    pub key: PublicKey,
}

#[async_trait]
impl Ledger for FailingLedger {
    fn public_key(&self) -> PublicKey {
        self.key.clone()
    }

    async fn self_sign_and_broadcast(
        &self,
        _block_type: &str,
        _transaction: Transaction,
    ) -> Result<Block, LedgerError> {
        Err(LedgerError::ChannelClosed)
    }

    async fn get_blocks_with_type(&self, _block_type: &str) -> Result<Vec<Block>, LedgerError> {
        Ok(Vec::new())
    }

    async fn crawl_chain(&self, _peer: &PeerHandle) -> Result<usize, LedgerError> {
        Err(LedgerError::ChannelClosed)
    }
}

/// One node's worth of components wired together over temp directories.
///
/// The ledger and seed directories sit beside the node's data directory so
/// a second harness can share them through `join`.
pub struct Harness {
    pub root: Arc<TempDir>,
    pub config: Config,
    pub store: Arc<CatalogStore>,
    pub ledger: Arc<LocalLedger>,
    pub blocks: mpsc::UnboundedReceiver<Block>,
    pub overlay: Arc<StaticOverlay>,
    pub services: Arc<ServiceContainer>,
    pub dispatcher: Arc<ExecutionDispatcher>,
    pub reconciler: Arc<VoteReconciler>,
    pub engine: LifecycleEngine,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_registry(CapabilityRegistry::default())
    }

    pub fn with_registry(registry: CapabilityRegistry) -> Self {
        Self::build(Arc::new(TempDir::new().unwrap()), "node-a", registry)
    }

    /// Another node sharing this harness' ledger and seed directories.
    pub fn join(&self, name: &str) -> Self {
        self.join_with_registry(name, CapabilityRegistry::default())
    }

    pub fn join_with_registry(&self, name: &str, registry: CapabilityRegistry) -> Self {
        Self::build(self.root.clone(), name, registry)
    }

    fn build(root: Arc<TempDir>, name: &str, registry: CapabilityRegistry) -> Self {
        let mut config = Config::with_data_dir(root.path().join(name));
        config.node.name = name.to_string();
        config.ledger.dir = Some(root.path().join("ledger"));
        config.transport.seed_dir = Some(root.path().join("seeds"));
        std::fs::create_dir_all(config.package_dir()).unwrap();
        std::fs::create_dir_all(config.install_dir()).unwrap();

        let store = Arc::new(CatalogStore::open(config.data_dir()).unwrap());
        let (ledger, blocks) = open_ledger(&config.ledger_dir());
        let transport: Arc<dyn Transport> = Arc::new(LocalTransport::new(config.seed_dir()));
        let overlay = Arc::new(StaticOverlay::new(Vec::new()));
        let services = Arc::new(ServiceContainer::new());

        let dispatcher = Arc::new(ExecutionDispatcher::new(
            config.install_dir(),
            Arc::new(registry),
            overlay.clone(),
            services.clone(),
        ));
        let reconciler = Arc::new(VoteReconciler::new(store.clone(), ledger.clone()));
        let engine = LifecycleEngine::new(
            store.clone(),
            transport,
            reconciler.clone(),
            dispatcher.clone(),
            ledger.public_key(),
            config.package_dir(),
            config.install_dir(),
        );

        Self {
            root,
            config,
            store,
            ledger,
            blocks,
            overlay,
            services,
            dispatcher,
            reconciler,
            engine,
        }
    }

    pub fn public_key(&self) -> PublicKey {
        self.ledger.public_key()
    }

    pub fn package_dir(&self) -> PathBuf {
        self.config.package_dir()
    }

    pub fn install_dir(&self) -> PathBuf {
        self.config.install_dir()
    }

    /// Lay `package` out the way download would have installed it.
    pub fn install(&self, package: &Package, manifest: Value) -> PathBuf {
        let dir = install_dir(&self.install_dir(), &package.id);
        write_package(&dir, &package.name, manifest)
    }
}
