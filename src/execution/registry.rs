//! Capability registry
//!
//! Packages name their entry points (executables, overlay classes, discovery
//! strategies, service makers) by string. The registry maps those names to
//! code compiled into the node.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use super::services::Service;
use crate::overlay::{DiscoveryStrategy, Overlay};
use crate::package::Package;

pub const RANDOM_WALK: &str = "RandomWalk";
pub const EDGE_WALK: &str = "EdgeWalk";
pub const RANDOM_CHURN: &str = "RandomChurn";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("{kind} {name:?} is not registered")]
    NotRegistered { kind: &'static str, name: String },
}

/// What an executable package entry point gets to see.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub package: Package,
    pub package_dir: PathBuf,
    pub entry: String,
}

pub trait Executable: Send + Sync {
    fn execute(&self, ctx: &ExecutionContext) -> anyhow::Result<()>;
}

impl<F> Executable for F
where
    F: Fn(&ExecutionContext) -> anyhow::Result<()> + Send + Sync,
{
    fn execute(&self, ctx: &ExecutionContext) -> anyhow::Result<()> {
        self(ctx)
    }
}

/// Creates overlay instances from their `initialize` arguments.
pub trait OverlayFactory: Send + Sync {
    fn instantiate(&self, initialize: &Value) -> anyhow::Result<Arc<dyn Overlay>>;
}

impl<F> OverlayFactory for F
where
    F: Fn(&Value) -> anyhow::Result<Arc<dyn Overlay>> + Send + Sync,
{
    fn instantiate(&self, initialize: &Value) -> anyhow::Result<Arc<dyn Overlay>> {
        self(initialize)
    }
}

/// Builds a service from the manifest's `service_options`.
pub trait ServiceMaker: Send + Sync {
    fn make_service(&self, options: &Value) -> anyhow::Result<Box<dyn Service>>;
}

impl<F> ServiceMaker for F
where
    F: Fn(&Value) -> anyhow::Result<Box<dyn Service>> + Send + Sync,
{
    fn make_service(&self, options: &Value) -> anyhow::Result<Box<dyn Service>> {
        self(options)
    }
}

/// A discovery strategy known by name only; the overlay drives it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuiltinStrategy(&'static str);

impl BuiltinStrategy {
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }
}

impl DiscoveryStrategy for BuiltinStrategy {
    fn name(&self) -> &str {
        self.0
    }
}

pub struct CapabilityRegistry {
    executables: HashMap<String, Arc<dyn Executable>>,
    overlays: HashMap<String, Arc<dyn OverlayFactory>>,
    strategies: HashMap<String, Arc<dyn DiscoveryStrategy>>,
    services: HashMap<String, Arc<dyn ServiceMaker>>,
}

impl CapabilityRegistry {
    /// An empty registry with no strategies at all.
    pub fn empty() -> Self {
        Self {
            executables: HashMap::new(),
            overlays: HashMap::new(),
            strategies: HashMap::new(),
            services: HashMap::new(),
        }
    }

    pub fn register_executable(
        &mut self,
        name: impl Into<String>,
        executable: impl Executable + 'static,
    ) -> &mut Self {
        self.executables.insert(name.into(), Arc::new(executable));
        self
    }

    pub fn register_overlay(
        &mut self,
        class: impl Into<String>,
        factory: impl OverlayFactory + 'static,
    ) -> &mut Self {
        self.overlays.insert(class.into(), Arc::new(factory));
        self
    }

    pub fn register_strategy(&mut self, strategy: Arc<dyn DiscoveryStrategy>) -> &mut Self {
        self.strategies.insert(strategy.name().to_string(), strategy);
        self
    }

    /// Register a service maker under `<service_file>.<service_class>`, or
    /// under the bare class when `service_file` is empty.
    pub fn register_service(
        &mut self,
        service_file: &str,
        service_class: &str,
        maker: impl ServiceMaker + 'static,
    ) -> &mut Self {
        self.services
            .insert(service_key(service_file, service_class), Arc::new(maker));
        self
    }

    pub fn resolve_executable(&self, name: &str) -> Result<Arc<dyn Executable>, RegistryError> {
        self.executables
            .get(name)
            .cloned()
            .ok_or_else(|| not_registered("executable", name))
    }

    pub fn resolve_overlay(&self, class: &str) -> Result<Arc<dyn OverlayFactory>, RegistryError> {
        self.overlays
            .get(class)
            .cloned()
            .ok_or_else(|| not_registered("overlay", class))
    }

    /// Strategies advertised by `instance` win over registry entries of the
    /// same name.
    pub fn resolve_strategy(
        &self,
        name: &str,
        instance: &dyn Overlay,
    ) -> Result<Arc<dyn DiscoveryStrategy>, RegistryError> {
        instance
            .strategies()
            .into_iter()
            .find(|s| s.name() == name)
            .or_else(|| self.strategies.get(name).cloned())
            .ok_or_else(|| not_registered("strategy", name))
    }

    pub fn resolve_service(
        &self,
        service_file: &str,
        service_class: &str,
    ) -> Result<Arc<dyn ServiceMaker>, RegistryError> {
        self.services
            .get(&service_key(service_file, service_class))
            .or_else(|| self.services.get(service_class))
            .cloned()
            .ok_or_else(|| not_registered("service", &service_key(service_file, service_class)))
    }
}

impl Default for CapabilityRegistry {
    /// Registry with the built-in discovery strategies.
    fn default() -> Self {
        let mut registry = Self::empty();
        for name in [RANDOM_WALK, EDGE_WALK, RANDOM_CHURN] {
            registry.register_strategy(Arc::new(BuiltinStrategy(name)));
        }
        registry
    }
}

fn service_key(service_file: &str, service_class: &str) -> String {
    if service_file.is_empty() {
        service_class.to_string()
    } else {
        format!("{}.{}", service_file, service_class)
    }
}

fn not_registered(kind: &'static str, name: &str) -> RegistryError {
    RegistryError::NotRegistered {
        kind,
        name: name.to_string(),
    }
}
