//! Node coordinator
//!
//! One task owns every mutation: lifecycle commands from the CLI and HTTP
//! API, blocks arriving from the ledger, and the reconcile and crawl timers
//! are all serviced by the same `select!` loop.

pub mod lifecycle;

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

pub use lifecycle::{
    CreateOutcome, DownloadOutcome, LifecycleEngine, RegisterOutcome, RunResult,
    TEST_CONTENT_HASH, TEST_PACKAGE_NAME,
};

use crate::config::Config;
use crate::error::NodeError;
use crate::execution::{CapabilityRegistry, ExecutionDispatcher, ServiceContainer};
use crate::ledger::{Block, Ledger, LocalLedger};
use crate::overlay::{PeerOverlay, StaticOverlay};
use crate::package::{Identifier, Package, PublicKey};
use crate::storage::{CatalogStore, StoreStats};
use crate::sync::{
    BlockObserver, BlockOutcome, CrawlReport, Crawler, ReconcileReport, Schedule, VoteOutcome,
    VoteReconciler,
};
use crate::transport::{LocalTransport, Transport};

/// Pending commands before senders wait.
const COMMAND_QUEUE_SIZE: usize = 64;

type Reply<T> = oneshot::Sender<Result<T, NodeError>>;

/// Requests serviced by the node loop.
pub enum NodeCommand {
    Create { name: String, reply: Reply<CreateOutcome> },
    CreateTest { reply: Reply<CreateOutcome> },
    Register { id: Identifier, name: Option<String>, reply: Reply<RegisterOutcome> },
    Download { id: Identifier, reply: Reply<DownloadOutcome> },
    Run { id: Identifier, reply: Reply<RunResult> },
    Vote { id: Identifier, reply: Reply<VoteOutcome> },
    Reconcile { reply: Reply<ReconcileReport> },
    Crawl { reply: Reply<CrawlReport> },
}

/// The ledger, transport and overlay a node runs against.
pub struct Collaborators {
    pub ledger: Arc<dyn Ledger>,
    pub blocks: mpsc::UnboundedReceiver<Block>,
    pub transport: Arc<dyn Transport>,
    pub overlay: Arc<dyn PeerOverlay>,
}

impl Collaborators {
    /// The single-host reference collaborators described by `config`.
    pub fn local(config: &Config) -> Result<Self, NodeError> {
        let key = crate::identity::load_or_generate(&config.key_path())?;
        let (ledger, blocks) = LocalLedger::open(&config.ledger_dir(), key)?;

        Ok(Self {
            ledger: Arc::new(ledger),
            blocks,
            transport: Arc::new(LocalTransport::new(config.seed_dir())),
            overlay: Arc::new(StaticOverlay::new(config.peers()?)),
        })
    }
}

/// Read-only view shared between the loop and its handles.
struct Shared {
    name: String,
    public_key: PublicKey,
    store: Arc<CatalogStore>,
    dispatcher: Arc<ExecutionDispatcher>,
    services: Arc<ServiceContainer>,
    overlay: Arc<dyn PeerOverlay>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeStatus {
    pub name: String,
    pub public_key: PublicKey,
    pub schema_version: i32,
    pub store: StoreStats,
    pub partial_installs: usize,
    pub active_packages: usize,
    pub services: Vec<String>,
    pub peers: usize,
}

pub struct Node {
    shared: Arc<Shared>,
    lifecycle: LifecycleEngine,
    reconciler: Arc<VoteReconciler>,
    crawler: Crawler,
    schedule: Schedule,
    blocks: mpsc::UnboundedReceiver<Block>,
    commands_tx: mpsc::Sender<NodeCommand>,
    commands_rx: mpsc::Receiver<NodeCommand>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Node {
    /// Open a node with the local reference collaborators.
    pub fn open(config: Config, registry: CapabilityRegistry) -> Result<Self, NodeError> {
        for dir in [config.package_dir(), config.install_dir()] {
            std::fs::create_dir_all(dir).map_err(crate::error::StoreError::from)?;
        }
        let store = Arc::new(CatalogStore::open(config.data_dir())?);
        let collaborators = Collaborators::local(&config)?;
        Ok(Self::with_collaborators(config, store, collaborators, registry))
    }

    pub fn with_collaborators(
        config: Config,
        store: Arc<CatalogStore>,
        collaborators: Collaborators,
        registry: CapabilityRegistry,
    ) -> Self {
        let Collaborators {
            ledger,
            blocks,
            transport,
            overlay,
        } = collaborators;

        let services = Arc::new(ServiceContainer::new());
        let dispatcher = Arc::new(ExecutionDispatcher::new(
            config.install_dir(),
            Arc::new(registry),
            overlay.clone(),
            services.clone(),
        ));
        let reconciler = Arc::new(VoteReconciler::new(store.clone(), ledger.clone()));
        let public_key = ledger.public_key();

        let lifecycle = LifecycleEngine::new(
            store.clone(),
            transport,
            reconciler.clone(),
            dispatcher.clone(),
            public_key.clone(),
            config.package_dir(),
            config.install_dir(),
        );

        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE_SIZE);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(
            name = %config.node.name,
            public_key = %public_key.short(),
            data_dir = ?config.data_dir(),
            "Node opened"
        );

        Self {
            shared: Arc::new(Shared {
                name: config.node.name.clone(),
                public_key,
                store,
                dispatcher,
                services,
                overlay: overlay.clone(),
            }),
            lifecycle,
            reconciler,
            crawler: Crawler::new(ledger, overlay),
            schedule: Schedule::from(&config.sync),
            blocks,
            commands_tx,
            commands_rx,
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
        }
    }

    pub fn handle(&self) -> NodeHandle {
        NodeHandle {
            commands: self.commands_tx.clone(),
            shutdown: self.shutdown_tx.clone(),
            shared: self.shared.clone(),
        }
    }

    /// Run until a handle requests shutdown.
    pub async fn run(mut self) -> Result<(), NodeError> {
        match self.shared.overlay.start() {
            Ok(n) => debug!(callbacks = n, "Overlay started"),
            Err(e) => warn!(error = %e, "Overlay start failed"),
        }

        let mut reconcile_timer = self.schedule.reconcile_timer();
        let mut crawl_timer = self.schedule.crawl_timer();
        let mut shutdown = self.shutdown_rx.clone();

        info!("Node loop started");

        loop {
            tokio::select! {
                biased;

                _ = shutdown.changed() => {
                    info!("Shutdown requested");
                    break;
                }

                Some(command) = self.commands_rx.recv() => {
                    self.handle_command(command).await;
                }

                Some(block) = self.blocks.recv() => {
                    self.handle_block(&block);
                }

                _ = reconcile_timer.tick() => {
                    if let Err(e) = self.reconciler.reconcile().await {
                        error!(error = %e, "Reconciliation failed");
                    }
                }

                _ = crawl_timer.tick() => {
                    self.crawler.crawl().await;
                }
            }
        }

        self.shared.services.stop_all();
        info!("Node stopped");
        Ok(())
    }

    fn handle_block(&self, block: &Block) {
        if !self.reconciler.should_sign(block) {
            debug!(block_type = %block.block_type, "Ignoring block");
            return;
        }

        match self.reconciler.on_block(block) {
            Ok(BlockOutcome::Counted) | Ok(BlockOutcome::Duplicate) | Ok(BlockOutcome::Ignored) => {}
            Ok(BlockOutcome::Discarded) => {
                debug!(signer = %block.signer.short(), "Discarded block");
            }
            Err(e) => error!(error = %e, "Failed to apply vote block"),
        }
    }

    async fn handle_command(&self, command: NodeCommand) {
        match command {
            NodeCommand::Create { name, reply } => {
                let _ = reply.send(self.lifecycle.create(&name).await);
            }
            NodeCommand::CreateTest { reply } => {
                let _ = reply.send(self.lifecycle.create_test().await);
            }
            NodeCommand::Register { id, name, reply } => {
                let _ = reply.send(self.lifecycle.register(&id, name.as_deref()));
            }
            NodeCommand::Download { id, reply } => {
                let _ = reply.send(self.lifecycle.download(&id).await);
            }
            NodeCommand::Run { id, reply } => {
                let _ = reply.send(self.lifecycle.run(&id));
            }
            NodeCommand::Vote { id, reply } => {
                let _ = reply.send(self.lifecycle.vote(&id).await);
            }
            NodeCommand::Reconcile { reply } => {
                let _ = reply.send(self.reconciler.reconcile().await);
            }
            NodeCommand::Crawl { reply } => {
                let _ = reply.send(Ok(self.crawler.crawl().await));
            }
        }
    }
}

/// Cloneable access to a running node.
///
/// Mutations are queued to the node loop; reads go straight to the store.
#[derive(Clone)]
pub struct NodeHandle {
    commands: mpsc::Sender<NodeCommand>,
    shutdown: Arc<watch::Sender<bool>>,
    shared: Arc<Shared>,
}

impl NodeHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> NodeCommand,
    ) -> Result<T, NodeError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| NodeError::Stopped)?;
        rx.await.map_err(|_| NodeError::Stopped)?
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.shared.public_key
    }

    pub async fn create(&self, name: &str) -> Result<CreateOutcome, NodeError> {
        let name = name.to_string();
        self.request(|reply| NodeCommand::Create { name, reply }).await
    }

    pub async fn create_test(&self) -> Result<CreateOutcome, NodeError> {
        self.request(|reply| NodeCommand::CreateTest { reply }).await
    }

    pub async fn register(
        &self,
        id: Identifier,
        name: Option<String>,
    ) -> Result<RegisterOutcome, NodeError> {
        self.request(|reply| NodeCommand::Register { id, name, reply })
            .await
    }

    pub async fn download(&self, id: Identifier) -> Result<DownloadOutcome, NodeError> {
        self.request(|reply| NodeCommand::Download { id, reply }).await
    }

    pub async fn run_package(&self, id: Identifier) -> Result<RunResult, NodeError> {
        self.request(|reply| NodeCommand::Run { id, reply }).await
    }

    pub async fn vote(&self, id: Identifier) -> Result<VoteOutcome, NodeError> {
        self.request(|reply| NodeCommand::Vote { id, reply }).await
    }

    pub async fn reconcile(&self) -> Result<ReconcileReport, NodeError> {
        self.request(|reply| NodeCommand::Reconcile { reply }).await
    }

    pub async fn crawl(&self) -> Result<CrawlReport, NodeError> {
        self.request(|reply| NodeCommand::Crawl { reply }).await
    }

    pub fn get(&self, id: &Identifier) -> Result<Option<Package>, NodeError> {
        Ok(self.shared.store.get_catalog(id)?)
    }

    pub fn list(&self) -> Result<Vec<Package>, NodeError> {
        Ok(self.shared.store.list_catalog()?)
    }

    pub fn get_cache(&self, id: &Identifier) -> Result<Option<Identifier>, NodeError> {
        Ok(self.shared.store.get_cache(id)?)
    }

    pub fn list_cache(&self) -> Result<Vec<Identifier>, NodeError> {
        Ok(self.shared.store.list_cache()?)
    }

    pub fn get_library(&self, id: &Identifier) -> Result<Option<Identifier>, NodeError> {
        Ok(self.shared.store.get_library(id)?)
    }

    pub fn list_library(&self) -> Result<Vec<Identifier>, NodeError> {
        Ok(self.shared.store.list_library()?)
    }

    pub fn partial_installs(&self) -> Result<Vec<Identifier>, NodeError> {
        Ok(self.shared.store.partial_installs()?)
    }

    pub fn status(&self) -> Result<NodeStatus, NodeError> {
        let store = &self.shared.store;
        Ok(NodeStatus {
            name: self.shared.name.clone(),
            public_key: self.shared.public_key.clone(),
            schema_version: store.schema_version()?,
            store: store.stats()?,
            partial_installs: store.partial_installs()?.len(),
            active_packages: self.shared.dispatcher.active_count(),
            services: self.shared.services.names(),
            peers: self.shared.overlay.list_peers().len(),
        })
    }

    /// Ask the node loop to stop. An in-flight command or background task
    /// finishes first.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}
