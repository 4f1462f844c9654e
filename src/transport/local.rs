//! Transport over a seed directory shared by the nodes on one host
//!
//! Published packages live at `<seed_dir>/<content_hash>/<name>`. The content
//! hash is SHA-256 over every file's relative path and bytes, in path order.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::{Published, Transport};
use crate::error::TransportError;
use crate::package::is_safe_component;

pub struct LocalTransport {
    seed_dir: PathBuf,
}

impl LocalTransport {
    pub fn new(seed_dir: impl Into<PathBuf>) -> Self {
        Self {
            seed_dir: seed_dir.into(),
        }
    }

    pub fn seed_dir(&self) -> &Path {
        &self.seed_dir
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn publish(&self, local_path: &Path, name: &str) -> Result<Published, TransportError> {
        check_component("name", name)?;
        let source = local_path.to_path_buf();
        let seed_dir = self.seed_dir.clone();
        let name = name.to_string();

        blocking(move || {
            if !source.is_dir() {
                return Err(TransportError::InvalidPackage(format!(
                    "{:?} is not a directory",
                    source
                )));
            }

            let content_hash = hash_dir(&source)?;
            let seeded = seed_dir.join(&content_hash).join(&name);

            if seeded.exists() {
                debug!(%content_hash, %name, "Package already seeded");
            } else {
                copy_dir(&source, &seeded)?;
                info!(%content_hash, %name, "Seeded package");
            }

            Ok(Published { content_hash, name })
        })
        .await
    }

    async fn fetch(
        &self,
        content_hash: &str,
        name: &str,
        destination: &Path,
    ) -> Result<(), TransportError> {
        check_component("content hash", content_hash)?;
        check_component("name", name)?;
        let seeded = self.seed_dir.join(content_hash).join(name);
        let target = destination.join(name);
        let content_hash = content_hash.to_string();
        let name = name.to_string();

        blocking(move || {
            if !seeded.is_dir() {
                return Err(TransportError::NotFound { content_hash, name });
            }

            if target.is_dir() && hash_dir(&target)? == content_hash {
                debug!(%content_hash, %name, "Package already present");
                return Ok(());
            }

            let staging = target.with_file_name(format!(".{}.partial", name));
            if staging.exists() {
                fs::remove_dir_all(&staging)?;
            }
            copy_dir(&seeded, &staging)?;

            let actual = hash_dir(&staging)?;
            if actual != content_hash {
                warn!(expected = %content_hash, %actual, "Fetched package failed verification");
                fs::remove_dir_all(&staging)?;
                return Err(TransportError::HashMismatch {
                    expected: content_hash,
                    actual,
                });
            }

            if target.exists() {
                fs::remove_dir_all(&target)?;
            }
            fs::rename(&staging, &target)?;

            info!(%content_hash, %name, "Fetched package");
            Ok(())
        })
        .await
    }
}

fn check_component(kind: &str, value: &str) -> Result<(), TransportError> {
    if is_safe_component(value) {
        Ok(())
    } else {
        Err(TransportError::InvalidPackage(format!(
            "{} {:?} is not a single path component",
            kind, value
        )))
    }
}

async fn blocking<F, T>(f: F) -> Result<T, TransportError>
where
    F: FnOnce() -> Result<T, TransportError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| TransportError::Io(io::Error::new(io::ErrorKind::Other, e)))?
}

/// Content hash of a package directory (lowercase hex SHA-256).
pub fn hash_dir(root: &Path) -> Result<String, TransportError> {
    let mut files = Vec::new();
    collect_files(root, root, &mut files)?;
    files.sort();

    let mut hasher = Sha256::new();
    for relative in &files {
        hasher.update(relative.as_bytes());
        hasher.update([0u8]);
        hasher.update(fs::read(root.join(relative))?);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<String>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(root, &path, out)?;
        } else if let Ok(relative) = path.strip_prefix(root) {
            // Forward slashes so hashes agree across platforms
            let parts: Vec<_> = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            out.push(parts.join("/"));
        }
    }
    Ok(())
}

fn copy_dir(from: &Path, to: &Path) -> io::Result<()> {
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let path = entry.path();
        let dest = to.join(entry.file_name());
        if path.is_dir() {
            copy_dir(&path, &dest)?;
        } else {
            fs::copy(&path, &dest)?;
        }
    }
    Ok(())
}
