//! Overlay with a fixed peer list taken from configuration

use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{DiscoveryStrategy, Overlay, PeerHandle, PeerOverlay, TargetPeers};
use crate::error::OverlayError;

/// A strategy bound to a registered overlay.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrategyBinding {
    pub overlay: String,
    pub strategy: String,
    pub target_peers: TargetPeers,
    pub init: Value,
}

struct StartCallback {
    instance: Arc<dyn Overlay>,
    method: String,
    args: Vec<Value>,
}

#[derive(Default)]
struct OverlayState {
    started: bool,
    overlays: Vec<Arc<dyn Overlay>>,
    bindings: Vec<StrategyBinding>,
    pending: Vec<StartCallback>,
}

pub struct StaticOverlay {
    peers: Vec<PeerHandle>,
    state: Mutex<OverlayState>,
}

impl StaticOverlay {
    pub fn new(peers: Vec<PeerHandle>) -> Self {
        Self {
            peers,
            state: Mutex::new(OverlayState::default()),
        }
    }

    /// Names of registered overlays, in registration order.
    pub fn registered_overlays(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|s| s.overlays.iter().map(|o| o.name().to_string()).collect())
            .unwrap_or_default()
    }

    pub fn bindings(&self) -> Vec<StrategyBinding> {
        self.state
            .lock()
            .map(|s| s.bindings.clone())
            .unwrap_or_default()
    }

    pub fn pending_callbacks(&self) -> usize {
        self.state.lock().map(|s| s.pending.len()).unwrap_or(0)
    }
}

impl PeerOverlay for StaticOverlay {
    fn list_peers(&self) -> Vec<PeerHandle> {
        self.peers.clone()
    }

    /// Mark the overlay started and run every queued start callback.
    ///
    /// A failing callback is logged and does not stop the others. Returns the
    /// number of callbacks that succeeded.
    fn start(&self) -> Result<usize, OverlayError> {
        let pending = {
            let mut state = self.state.lock().map_err(|_| OverlayError::LockPoisoned)?;
            state.started = true;
            std::mem::take(&mut state.pending)
        };

        let mut ok = 0;
        for callback in pending {
            match callback.instance.call(&callback.method, &callback.args) {
                Ok(()) => ok += 1,
                Err(e) => warn!(
                    overlay = callback.instance.name(),
                    method = %callback.method,
                    error = %e,
                    "Start callback failed"
                ),
            }
        }

        if ok > 0 {
            info!(callbacks = ok, "Overlay started");
        }
        Ok(ok)
    }

    fn register_overlay(&self, instance: Arc<dyn Overlay>) -> Result<(), OverlayError> {
        let mut state = self.state.lock().map_err(|_| OverlayError::LockPoisoned)?;
        info!(overlay = instance.name(), "Registered overlay");
        state.overlays.push(instance);
        Ok(())
    }

    fn bind_discovery_strategy(
        &self,
        instance: Arc<dyn Overlay>,
        strategy: Arc<dyn DiscoveryStrategy>,
        target_peers: TargetPeers,
        init: Value,
    ) -> Result<(), OverlayError> {
        let mut state = self.state.lock().map_err(|_| OverlayError::LockPoisoned)?;
        debug!(
            overlay = instance.name(),
            strategy = strategy.name(),
            ?target_peers,
            "Bound discovery strategy"
        );
        state.bindings.push(StrategyBinding {
            overlay: instance.name().to_string(),
            strategy: strategy.name().to_string(),
            target_peers,
            init,
        });
        Ok(())
    }

    fn schedule_on_start(
        &self,
        instance: Arc<dyn Overlay>,
        method: &str,
        args: Vec<Value>,
    ) -> Result<(), OverlayError> {
        {
            let mut state = self.state.lock().map_err(|_| OverlayError::LockPoisoned)?;
            if !state.started {
                state.pending.push(StartCallback {
                    instance,
                    method: method.to_string(),
                    args,
                });
                return Ok(());
            }
        }

        instance.call(method, &args)
    }
}
