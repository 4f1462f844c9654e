//! Long-running services started from packages

use std::sync::Mutex;

use tracing::{info, warn};

pub trait Service: Send + Sync {
    fn name(&self) -> &str;

    fn start(&self) -> anyhow::Result<()>;

    fn stop(&self) {}
}

/// The master service container every service package is added to.
#[derive(Default)]
pub struct ServiceContainer {
    services: Mutex<Vec<Box<dyn Service>>>,
}

impl ServiceContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start `service` and keep it. A service that fails to start is dropped.
    pub fn add_service(&self, service: Box<dyn Service>) -> anyhow::Result<()> {
        service.start()?;
        info!(service = service.name(), "Started service");

        self.services
            .lock()
            .map_err(|_| anyhow::anyhow!("service container lock poisoned"))?
            .push(service);
        Ok(())
    }

    pub fn names(&self) -> Vec<String> {
        self.services
            .lock()
            .map(|s| s.iter().map(|svc| svc.name().to_string()).collect())
            .unwrap_or_default()
    }

    /// Stop every service, most recently started first.
    pub fn stop_all(&self) {
        let services = match self.services.lock() {
            Ok(mut s) => std::mem::take(&mut *s),
            Err(_) => {
                warn!("Service container lock poisoned; skipping shutdown");
                return;
            }
        };

        for service in services.iter().rev() {
            service.stop();
            info!(service = service.name(), "Stopped service");
        }
    }
}
