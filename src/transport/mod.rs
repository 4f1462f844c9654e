//! Package content distribution
//!
//! Packages are published under their content hash and fetched back by
//! (content hash, name).

pub mod local;

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use local::LocalTransport;

use crate::error::TransportError;

/// Result of publishing a package directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Published {
    pub content_hash: String,
    pub name: String,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Make the directory at `local_path` available to peers as `name`.
    async fn publish(&self, local_path: &Path, name: &str) -> Result<Published, TransportError>;

    /// Retrieve the package into `<destination>/<name>`.
    async fn fetch(
        &self,
        content_hash: &str,
        name: &str,
        destination: &Path,
    ) -> Result<(), TransportError>;
}
