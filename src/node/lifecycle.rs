//! Package lifecycle engine
//!
//! Moves a package through `Unknown -> Cataloged -> Cached+Installed ->
//! Running`. Every transition checks its precondition first; an unmet
//! precondition is logged and reported as a typed outcome rather than an
//! error.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::error::{NodeError, StoreError};
use crate::execution::{ActivationError, ExecutionDispatcher, RunOutcome};
use crate::package::{
    install_dir, is_safe_component, Identifier, Package, PublicKey, UNKNOWN_PACKAGE_NAME,
};
use crate::storage::CatalogStore;
use crate::sync::{VoteOutcome, VoteReconciler};
use crate::transport::Transport;

/// Content hash of the built-in test package.
pub const TEST_CONTENT_HASH: &str = "0000000000000000000000000000000000000000";
pub const TEST_PACKAGE_NAME: &str = "test";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum CreateOutcome {
    Created(Package),
    AlreadyExists(Identifier),
    /// No directory under `package/` with that name
    PackageMissing(String),
    /// Name is not a single path component
    InvalidName(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum RegisterOutcome {
    Registered(Package),
    AlreadyKnown(Package),
    /// Name or content hash is not usable as a path component
    Rejected(Identifier),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadOutcome {
    Installed,
    /// Cached earlier but never installed; installed without fetching
    Repaired,
    AlreadyInstalled,
    NotInCatalog,
    /// Cataloged name or content hash cannot be installed safely
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum RunResult {
    Started(RunOutcome),
    NotInLibrary,
    /// Library entry without its cache entry
    NotCached,
    ActivationFailed(ActivationError),
}

pub struct LifecycleEngine {
    store: Arc<CatalogStore>,
    transport: Arc<dyn Transport>,
    reconciler: Arc<VoteReconciler>,
    dispatcher: Arc<ExecutionDispatcher>,
    public_key: PublicKey,
    package_dir: PathBuf,
    install_root: PathBuf,
}

impl LifecycleEngine {
    pub fn new(
        store: Arc<CatalogStore>,
        transport: Arc<dyn Transport>,
        reconciler: Arc<VoteReconciler>,
        dispatcher: Arc<ExecutionDispatcher>,
        public_key: PublicKey,
        package_dir: impl Into<PathBuf>,
        install_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            transport,
            reconciler,
            dispatcher,
            public_key,
            package_dir: package_dir.into(),
            install_root: install_root.into(),
        }
    }

    /// Publish `package/<name>` and catalog it with this node's vote.
    pub async fn create(&self, name: &str) -> Result<CreateOutcome, NodeError> {
        if !is_safe_component(name) {
            warn!(%name, "Refusing to create package with unsafe name");
            return Ok(CreateOutcome::InvalidName(name.to_string()));
        }

        let source = self.package_dir.join(name);
        if !source.is_dir() {
            info!(%name, dir = ?source, "Package directory does not exist");
            return Ok(CreateOutcome::PackageMissing(name.to_string()));
        }

        let published = self.transport.publish(&source, name).await?;
        let id = Identifier::new(self.public_key.clone(), published.content_hash);

        self.catalog_own(id, &published.name).await
    }

    /// Catalog the fixed test package with this node's vote.
    pub async fn create_test(&self) -> Result<CreateOutcome, NodeError> {
        let id = Identifier::new(self.public_key.clone(), TEST_CONTENT_HASH);
        self.catalog_own(id, TEST_PACKAGE_NAME).await
    }

    async fn catalog_own(&self, id: Identifier, name: &str) -> Result<CreateOutcome, NodeError> {
        if self.store.has_catalog(&id)? {
            info!(%id, "Package already in catalog");
            return Ok(CreateOutcome::AlreadyExists(id));
        }

        match self.store.put_catalog(&Package::new(id.clone(), name)) {
            Ok(()) => {}
            Err(StoreError::DuplicateKey(_)) => return Ok(CreateOutcome::AlreadyExists(id)),
            Err(e) => return Err(e.into()),
        }

        self.reconciler.vote(&id).await?;

        let package = self
            .store
            .get_catalog(&id)?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        info!(%id, %name, "Created package");
        Ok(CreateOutcome::Created(package))
    }

    /// Catalog a package learned about out of band, so it can be downloaded.
    pub fn register(
        &self,
        id: &Identifier,
        name: Option<&str>,
    ) -> Result<RegisterOutcome, NodeError> {
        let name = name.unwrap_or(UNKNOWN_PACKAGE_NAME);
        if !is_safe_component(name) || !is_safe_component(&id.content_hash) {
            warn!(%id, %name, "Refusing to register package with unsafe name");
            return Ok(RegisterOutcome::Rejected(id.clone()));
        }

        if let Some(existing) = self.store.get_catalog(id)? {
            return Ok(RegisterOutcome::AlreadyKnown(existing));
        }

        let package = Package::new(id.clone(), name);
        match self.store.put_catalog(&package) {
            Ok(()) => {
                info!(%id, name = %package.name, "Registered package");
                Ok(RegisterOutcome::Registered(package))
            }
            Err(StoreError::DuplicateKey(_)) => {
                let existing = self
                    .store
                    .get_catalog(id)?
                    .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
                Ok(RegisterOutcome::AlreadyKnown(existing))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Fetch a cataloged package into its install directory and install it.
    ///
    /// A failed fetch leaves cache and library untouched.
    pub async fn download(&self, id: &Identifier) -> Result<DownloadOutcome, NodeError> {
        let cached = self.store.has_cache(id)?;
        let installed = self.store.has_library(id)?;

        if cached && installed {
            info!(%id, "Package already installed");
            return Ok(DownloadOutcome::AlreadyInstalled);
        }

        let Some(package) = self.store.get_catalog(id)? else {
            info!(%id, "Package not in catalog, not downloading");
            return Ok(DownloadOutcome::NotInCatalog);
        };

        if cached {
            warn!(%id, "Package cached but not installed, completing install");
            self.store.add_library(id)?;
            return Ok(DownloadOutcome::Repaired);
        }

        if !is_safe_component(&package.name) || !is_safe_component(&id.content_hash) {
            warn!(%id, name = %package.name, "Refusing to install package with unsafe name");
            return Ok(DownloadOutcome::Rejected);
        }

        info!(%id, name = %package.name, "Downloading package");
        let destination = install_dir(&self.install_root, id);
        self.transport
            .fetch(&id.content_hash, &package.name, &destination)
            .await?;
        self.store.install(id)?;

        info!(%id, name = %package.name, "Installed package");
        Ok(DownloadOutcome::Installed)
    }

    /// Activate an installed package.
    pub fn run(&self, id: &Identifier) -> Result<RunResult, NodeError> {
        if !self.store.has_library(id)? {
            info!(%id, "Package not in library, not running");
            return Ok(RunResult::NotInLibrary);
        }
        if !self.store.has_cache(id)? {
            warn!(%id, "Library entry without cache entry, not running");
            return Ok(RunResult::NotCached);
        }

        let Some(package) = self.store.get_catalog(id)? else {
            warn!(%id, "Library entry without catalog entry, not running");
            return Ok(RunResult::NotInLibrary);
        };

        match self.dispatcher.run(&package) {
            Ok(outcome) => Ok(RunResult::Started(outcome)),
            Err(e) => {
                error!(id = %e.id, stage = %e.stage, reason = %e.reason, "Package activation failed");
                Ok(RunResult::ActivationFailed(e))
            }
        }
    }

    pub async fn vote(&self, id: &Identifier) -> Result<VoteOutcome, NodeError> {
        Ok(self.reconciler.vote(id).await?)
    }

    pub fn get(&self, id: &Identifier) -> Result<Option<Package>, NodeError> {
        Ok(self.store.get_catalog(id)?)
    }

    pub fn list(&self) -> Result<Vec<Package>, NodeError> {
        Ok(self.store.list_catalog()?)
    }

    pub fn list_cache(&self) -> Result<Vec<Identifier>, NodeError> {
        Ok(self.store.list_cache()?)
    }

    pub fn list_library(&self) -> Result<Vec<Identifier>, NodeError> {
        Ok(self.store.list_library()?)
    }

    /// Cached packages that are not runnable until download is retried.
    pub fn partial_installs(&self) -> Result<Vec<Identifier>, NodeError> {
        Ok(self.store.partial_installs()?)
    }
}
