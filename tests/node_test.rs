//! Node loop tests
//!
//! Two nodes on one host share the ledger and seed directories and list each
//! other as peers, the same way a local deployment runs them.

mod common;

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::task::JoinHandle;

use catalog_node::config::SyncConfig;
use catalog_node::error::NodeError;
use catalog_node::execution::{CapabilityRegistry, PackageType, RunOutcome, Service};
use catalog_node::identity;
use catalog_node::node::{CreateOutcome, DownloadOutcome, RunResult, TEST_CONTENT_HASH};
use catalog_node::sync::VoteOutcome;
use catalog_node::{Config, Identifier, Node, NodeHandle, PublicKey};

use common::write_package;

fn node_config(root: &Path, name: &str) -> Config {
    let mut config = Config::with_data_dir(root.join(name));
    config.node.name = name.to_string();
    config.ledger.dir = Some(root.join("ledger"));
    config.transport.seed_dir = Some(root.join("seeds"));
    config.api.enabled = false;
    // Timers stay out of the way unless a test shortens them
    config.sync = SyncConfig {
        reconcile_initial_delay_secs: 3600,
        reconcile_interval_secs: 3600,
        crawl_initial_delay_secs: 3600,
        crawl_interval_secs: 3600,
    };
    config
}

/// Create the node key up front so peers can be configured before opening.
fn preload_key(config: &Config) -> PublicKey {
    identity::public_key(&identity::load_or_generate(&config.key_path()).unwrap())
}

fn start(config: Config, registry: CapabilityRegistry) -> (NodeHandle, JoinHandle<Result<(), NodeError>>) {
    let node = Node::open(config, registry).unwrap();
    let handle = node.handle();
    (handle, tokio::spawn(node.run()))
}

async fn wait_for(what: &str, check: impl Fn() -> bool) {
    for _ in 0..100 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("timed out waiting for {}", what);
}

fn votes(node: &NodeHandle, id: &Identifier) -> u64 {
    node.get(id).unwrap().map(|p| p.votes).unwrap_or(0)
}

// =============================================================================
// Two-node catalog sync
// =============================================================================

#[tokio::test]
async fn test_two_nodes_share_catalog_and_votes() {
    let root = TempDir::new().unwrap();
    let mut config_a = node_config(root.path(), "a");
    let mut config_b = node_config(root.path(), "b");
    let key_a = preload_key(&config_a);
    let key_b = preload_key(&config_b);
    config_a.overlay.peers = vec![key_b.to_hex()];
    config_b.overlay.peers = vec![key_a.to_hex()];

    write_package(
        &config_a.package_dir(),
        "hello",
        json!({"type": "executable", "executable_file": "main"}),
    );

    let (a, a_task) = start(config_a, CapabilityRegistry::default());
    let (b, b_task) = start(config_b, CapabilityRegistry::default());
    assert_eq!(a.public_key(), &key_a);

    let package = match a.create("hello").await.unwrap() {
        CreateOutcome::Created(package) => package,
        other => panic!("expected Created, got {:?}", other),
    };
    let id = package.id.clone();

    // B learns about the package from A's vote block
    let report = b.crawl().await.unwrap();
    assert_eq!(report.peers, 1);
    assert_eq!(report.new_blocks, 1);
    assert_eq!(report.failures, 0);
    wait_for("B to catalog A's package", || votes(&b, &id) == 1).await;
    assert_eq!(b.get(&id).unwrap().unwrap().name, "hello");

    assert_eq!(b.download(id.clone()).await.unwrap(), DownloadOutcome::Installed);
    assert_eq!(b.list_library().unwrap(), vec![id.clone()]);

    // B's vote flows back to A
    assert_eq!(b.vote(id.clone()).await.unwrap(), VoteOutcome::Recorded);
    assert_eq!(votes(&b, &id), 2);
    assert_eq!(a.crawl().await.unwrap().new_blocks, 1);
    wait_for("A to count B's vote", || votes(&a, &id) == 2).await;

    // Crawling again finds nothing new and changes nothing
    assert_eq!(a.crawl().await.unwrap().new_blocks, 0);
    assert!(a.reconcile().await.unwrap().is_clean());
    assert!(b.reconcile().await.unwrap().is_clean());
    assert_eq!(votes(&a, &id), 2);

    let status = b.status().unwrap();
    assert_eq!(status.name, "b");
    assert_eq!(status.peers, 1);
    assert_eq!(status.store.catalog, 1);
    assert_eq!(status.store.library, 1);
    assert_eq!(status.store.votes, 2);
    assert_eq!(status.partial_installs, 0);

    a.shutdown();
    b.shutdown();
    a_task.await.unwrap().unwrap();
    b_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_crawl_timer_pulls_peer_votes() {
    let root = TempDir::new().unwrap();
    let mut config_a = node_config(root.path(), "a");
    let mut config_b = node_config(root.path(), "b");
    let key_a = preload_key(&config_a);
    let key_b = preload_key(&config_b);
    config_a.overlay.peers = vec![key_b.to_hex()];
    config_b.overlay.peers = vec![key_a.to_hex()];
    config_b.sync.crawl_initial_delay_secs = 0;

    let (a, a_task) = start(config_a, CapabilityRegistry::default());
    assert!(matches!(a.create_test().await.unwrap(), CreateOutcome::Created(_)));

    let (b, b_task) = start(config_b, CapabilityRegistry::default());
    let id = Identifier::new(key_a, TEST_CONTENT_HASH);
    wait_for("B's first crawl", || votes(&b, &id) == 1).await;

    a.shutdown();
    b.shutdown();
    a_task.await.unwrap().unwrap();
    b_task.await.unwrap().unwrap();
}

// =============================================================================
// Shutdown
// =============================================================================

struct Ticker {
    stopped: Arc<AtomicUsize>,
}

impl Service for Ticker {
    fn name(&self) -> &str {
        "ticker"
    }

    fn start(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn stop(&self) {
        self.stopped.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_shutdown_stops_services_and_commands() {
    let root = TempDir::new().unwrap();
    let config = node_config(root.path(), "a");
    write_package(
        &config.package_dir(),
        "ticker",
        json!({"type": "service", "service_file": "ticker", "service_class": "Ticker"}),
    );

    let stopped = Arc::new(AtomicUsize::new(0));
    let mut registry = CapabilityRegistry::default();
    let counter = stopped.clone();
    registry.register_service(
        "ticker",
        "Ticker",
        move |_: &Value| -> anyhow::Result<Box<dyn Service>> {
            Ok(Box::new(Ticker {
                stopped: counter.clone(),
            }))
        },
    );

    let (node, task) = start(config, registry);
    let id = match node.create("ticker").await.unwrap() {
        CreateOutcome::Created(package) => package.id,
        other => panic!("expected Created, got {:?}", other),
    };
    assert_eq!(node.download(id.clone()).await.unwrap(), DownloadOutcome::Installed);
    assert_eq!(
        node.run_package(id.clone()).await.unwrap(),
        RunResult::Started(RunOutcome::Activated(PackageType::Service))
    );
    assert_eq!(node.status().unwrap().services, vec!["ticker".to_string()]);
    assert_eq!(node.status().unwrap().active_packages, 1);

    node.shutdown();
    task.await.unwrap().unwrap();

    assert_eq!(stopped.load(Ordering::SeqCst), 1);
    assert!(matches!(node.create_test().await, Err(NodeError::Stopped)));

    // Reads still work against the store
    assert_eq!(node.list().unwrap().len(), 1);
}

#[tokio::test]
async fn test_node_restart_keeps_identity_and_catalog() {
    let root = TempDir::new().unwrap();
    let config = node_config(root.path(), "a");

    let (node, task) = start(config.clone(), CapabilityRegistry::default());
    let key = node.public_key().clone();
    node.create_test().await.unwrap();
    node.shutdown();
    task.await.unwrap().unwrap();

    let (node, task) = start(config, CapabilityRegistry::default());
    assert_eq!(node.public_key(), &key);
    let id = Identifier::new(key, TEST_CONTENT_HASH);
    assert_eq!(votes(&node, &id), 1);
    assert!(matches!(
        node.create_test().await.unwrap(),
        CreateOutcome::AlreadyExists(_)
    ));
    assert!(node.reconcile().await.unwrap().is_clean());

    node.shutdown();
    task.await.unwrap().unwrap();
}
