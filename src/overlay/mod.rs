//! Peer overlay collaborator
//!
//! The overlay knows which peers exist, hosts the overlays that packages
//! bring with them, and drives their discovery strategies.

pub mod local;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use local::StaticOverlay;

use crate::error::OverlayError;
use crate::package::PublicKey;

/// A reachable peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerHandle {
    pub public_key: PublicKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl PeerHandle {
    pub fn new(public_key: PublicKey) -> Self {
        Self {
            public_key,
            address: None,
        }
    }
}

/// How many peers a discovery strategy should try to maintain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetPeers {
    Unbounded,
    AtMost(usize),
}

impl TargetPeers {
    /// Negative counts (conventionally `-1`) mean no bound.
    pub fn from_count(count: i64) -> Self {
        if count < 0 {
            TargetPeers::Unbounded
        } else {
            TargetPeers::AtMost(count as usize)
        }
    }
}

/// A peer discovery strategy that can be bound to an overlay.
pub trait DiscoveryStrategy: Send + Sync {
    fn name(&self) -> &str;
}

/// An overlay instance created from a package.
pub trait Overlay: Send + Sync {
    fn name(&self) -> &str;

    /// Strategies this overlay ships in addition to the built-in ones.
    fn strategies(&self) -> Vec<Arc<dyn DiscoveryStrategy>> {
        Vec::new()
    }

    /// Invoke a named start-up method.
    fn call(&self, method: &str, args: &[Value]) -> Result<(), OverlayError>;
}

pub trait PeerOverlay: Send + Sync {
    fn list_peers(&self) -> Vec<PeerHandle>;

    /// Called once when the node loop starts. Returns the number of start
    /// callbacks that ran successfully.
    fn start(&self) -> Result<usize, OverlayError> {
        Ok(0)
    }

    fn register_overlay(&self, instance: Arc<dyn Overlay>) -> Result<(), OverlayError>;

    fn bind_discovery_strategy(
        &self,
        instance: Arc<dyn Overlay>,
        strategy: Arc<dyn DiscoveryStrategy>,
        target_peers: TargetPeers,
        init: Value,
    ) -> Result<(), OverlayError>;

    /// Run `method` on `instance` once the overlay has started.
    fn schedule_on_start(
        &self,
        instance: Arc<dyn Overlay>,
        method: &str,
        args: Vec<Value>,
    ) -> Result<(), OverlayError>;
}
