//! Package activation
//!
//! The dispatcher reads an installed package's manifest and activates it as
//! an executable, a set of overlays, or a service. Each identifier is
//! activated at most once per dispatcher.

pub mod manifest;
pub mod registry;
pub mod services;

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

pub use manifest::{Manifest, ManifestRead, PackageType, MANIFEST_FILE};
pub use registry::{CapabilityRegistry, ExecutionContext, RegistryError};
pub use services::{Service, ServiceContainer};

use crate::overlay::{DiscoveryStrategy, Overlay, PeerOverlay, TargetPeers};
use crate::package::{is_safe_component, Identifier, Package};

/// Step of an activation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivationStage {
    ReadManifest,
    ParseManifest,
    LoadOverlayConfig,
    ResolveExecutable,
    Execute,
    ResolveOverlay,
    InstantiateOverlay,
    ResolveStrategy,
    BindStrategy,
    ScheduleStart,
    ResolveService,
    MakeService,
    StartService,
}

impl fmt::Display for ActivationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("Activation of {id} failed at {stage}: {reason}")]
pub struct ActivationError {
    pub id: Identifier,
    pub stage: ActivationStage,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum RunOutcome {
    Activated(PackageType),
    AlreadyActive,
    ManifestMissing,
    UnsupportedType(String),
}

/// An overlay instance with its strategies and start calls resolved, not yet
/// handed to the peer overlay.
struct PreparedOverlay {
    instance: Arc<dyn Overlay>,
    walkers: Vec<(Arc<dyn DiscoveryStrategy>, TargetPeers, Value)>,
    calls: Vec<manifest::StartCall>,
}

pub struct ExecutionDispatcher {
    package_root: PathBuf,
    registry: Arc<CapabilityRegistry>,
    overlay: Arc<dyn PeerOverlay>,
    services: Arc<ServiceContainer>,
    activated: Mutex<HashSet<Identifier>>,
}

impl ExecutionDispatcher {
    /// `package_root` is the install tree laid out by [`crate::package::install_dir`].
    pub fn new(
        package_root: impl Into<PathBuf>,
        registry: Arc<CapabilityRegistry>,
        overlay: Arc<dyn PeerOverlay>,
        services: Arc<ServiceContainer>,
    ) -> Self {
        Self {
            package_root: package_root.into(),
            registry,
            overlay,
            services,
            activated: Mutex::new(HashSet::new()),
        }
    }

    pub fn is_active(&self, id: &Identifier) -> bool {
        self.activated
            .lock()
            .map(|set| set.contains(id))
            .unwrap_or(false)
    }

    pub fn active_count(&self) -> usize {
        self.activated.lock().map(|set| set.len()).unwrap_or(0)
    }

    pub fn run(&self, package: &Package) -> Result<RunOutcome, ActivationError> {
        let id = &package.id;
        let fail = |(stage, reason): (ActivationStage, String)| ActivationError {
            id: id.clone(),
            stage,
            reason,
        };

        if !is_safe_component(&package.name) || !is_safe_component(&id.content_hash) {
            return Err(fail((
                ActivationStage::ReadManifest,
                format!("package name {:?} is not a single path component", package.name),
            )));
        }
        let package_dir = package.install_path(&self.package_root);

        let manifest = match manifest::read_manifest(&package_dir).map_err(fail)? {
            ManifestRead::Missing => {
                info!(%id, dir = ?package_dir, "No manifest found; nothing to run");
                return Ok(RunOutcome::ManifestMissing);
            }
            ManifestRead::UnsupportedType(kind) => {
                warn!(%id, kind = %kind, "Unsupported package type");
                return Ok(RunOutcome::UnsupportedType(kind));
            }
            ManifestRead::Ready(manifest) => manifest,
        };

        // Claim the identifier before activating so it runs at most once
        {
            let mut activated = self.activated.lock().map_err(|_| {
                fail((ActivationStage::ReadManifest, "activation set lock poisoned".into()))
            })?;
            if !activated.insert(id.clone()) {
                debug!(%id, "Package already active");
                return Ok(RunOutcome::AlreadyActive);
            }
        }

        let result = match &manifest {
            Manifest::Executable { executable_file } => {
                self.run_executable(package, &package_dir, executable_file)
            }
            Manifest::Overlay { overlay_file } => {
                self.run_overlays(&package_dir.join(overlay_file))
            }
            Manifest::Service {
                service_file,
                service_class,
                service_options,
            } => self.run_service(service_file, service_class, service_options),
        };

        match result {
            Ok(()) => {
                info!(%id, package_type = ?manifest.package_type(), "Activated package");
                Ok(RunOutcome::Activated(manifest.package_type()))
            }
            Err(failure) => {
                if let Ok(mut activated) = self.activated.lock() {
                    activated.remove(id);
                }
                Err(fail(failure))
            }
        }
    }

    fn run_executable(
        &self,
        package: &Package,
        package_dir: &Path,
        entry: &str,
    ) -> Result<(), manifest::StageFailure> {
        let executable = self
            .registry
            .resolve_executable(entry)
            .map_err(|e| (ActivationStage::ResolveExecutable, e.to_string()))?;

        let ctx = ExecutionContext {
            package: package.clone(),
            package_dir: package_dir.to_path_buf(),
            entry: entry.to_string(),
        };

        executable
            .execute(&ctx)
            .map_err(|e| (ActivationStage::Execute, format!("{:#}", e)))
    }

    fn run_overlays(&self, config_path: &Path) -> Result<(), manifest::StageFailure> {
        let config = manifest::read_overlay_config(config_path)?;

        // Resolve everything up front so a bad entry leaves the overlay untouched
        let prepared = config
            .overlays
            .iter()
            .map(|spec| self.prepare_overlay(spec))
            .collect::<Result<Vec<_>, _>>()?;

        for overlay in prepared {
            let PreparedOverlay {
                instance,
                walkers,
                calls,
            } = overlay;

            self.overlay
                .register_overlay(instance.clone())
                .map_err(|e| (ActivationStage::InstantiateOverlay, e.to_string()))?;

            let walker_count = walkers.len();
            for (strategy, target_peers, init) in walkers {
                self.overlay
                    .bind_discovery_strategy(instance.clone(), strategy, target_peers, init)
                    .map_err(|e| (ActivationStage::BindStrategy, e.to_string()))?;
            }

            for call in calls {
                self.overlay
                    .schedule_on_start(instance.clone(), &call.method, call.args)
                    .map_err(|e| (ActivationStage::ScheduleStart, e.to_string()))?;
            }

            debug!(overlay = instance.name(), walkers = walker_count, "Overlay set up");
        }

        Ok(())
    }

    fn prepare_overlay(
        &self,
        spec: &manifest::OverlaySpec,
    ) -> Result<PreparedOverlay, manifest::StageFailure> {
        let factory = self
            .registry
            .resolve_overlay(&spec.class)
            .map_err(|e| (ActivationStage::ResolveOverlay, e.to_string()))?;
        let instance = factory
            .instantiate(&spec.initialize)
            .map_err(|e| (ActivationStage::InstantiateOverlay, format!("{:#}", e)))?;

        let walkers = spec
            .walkers
            .iter()
            .map(|walker| -> Result<_, manifest::StageFailure> {
                let strategy = self
                    .registry
                    .resolve_strategy(&walker.strategy, instance.as_ref())
                    .map_err(|e| (ActivationStage::ResolveStrategy, e.to_string()))?;
                Ok((strategy, TargetPeers::from_count(walker.peers), walker.init.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let calls = spec
            .start_calls()
            .map_err(|e| (ActivationStage::LoadOverlayConfig, e))?;

        Ok(PreparedOverlay {
            instance,
            walkers,
            calls,
        })
    }

    fn run_service(
        &self,
        service_file: &str,
        service_class: &str,
        options: &Value,
    ) -> Result<(), manifest::StageFailure> {
        let maker = self
            .registry
            .resolve_service(service_file, service_class)
            .map_err(|e| (ActivationStage::ResolveService, e.to_string()))?;
        let service = maker
            .make_service(options)
            .map_err(|e| (ActivationStage::MakeService, format!("{:#}", e)))?;

        self.services
            .add_service(service)
            .map_err(|e| (ActivationStage::StartService, format!("{:#}", e)))
    }
}
