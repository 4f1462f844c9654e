//! Packages known to the catalog

mod identifier;

use std::ffi::OsStr;
use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

pub use identifier::{Identifier, PublicKey};

/// Name given to packages registered manually before any vote names them.
pub const UNKNOWN_PACKAGE_NAME: &str = "Unknown";

/// A catalog entry.
///
/// `votes` is the locally cached tally. The ledger holds the authoritative
/// vote history; reconciliation repairs this number when they drift apart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub id: Identifier,
    pub name: String,
    pub votes: u64,
}

impl Package {
    pub fn new(id: Identifier, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            votes: 0,
        }
    }
}

impl Package {
    /// Where this package is installed under `root`.
    pub fn install_path(&self, root: &Path) -> PathBuf {
        install_dir(root, &self.id).join(&self.name)
    }
}

/// Directory holding the installed copy of `id`: `<root>/<creator>/<content_hash>`.
///
/// Keyed on the full identity so that packages sharing a name never share
/// a directory.
pub fn install_dir(root: &Path, id: &Identifier) -> PathBuf {
    root.join(id.creator.to_hex()).join(&id.content_hash)
}

/// True if `s` names exactly one directory entry.
///
/// Package names and content hashes come from remote peers and end up in
/// filesystem paths, so separators, `.`, `..` and roots are refused.
pub fn is_safe_component(s: &str) -> bool {
    if s.is_empty() || s.contains(['/', '\\', '\0']) {
        return false;
    }
    let mut components = Path::new(s).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(part)), None) => part == OsStr::new(s),
        _ => false,
    }
}

impl fmt::Display for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {} votes)", self.name, self.id, self.votes)
    }
}

/// One recorded vote: `voter` supports `subject`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VoteRecord {
    pub voter: PublicKey,
    pub subject: Identifier,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_component() {
        for ok in ["app", "hello-world", "v1.2", "..app", "0000"] {
            assert!(is_safe_component(ok), "{}", ok);
        }
        for bad in ["", ".", "..", "../evil", "/tmp/x", "a/b", "a\\b", "nul\0", "/"] {
            assert!(!is_safe_component(bad), "{:?}", bad);
        }
    }

    #[test]
    fn test_install_path_is_keyed_on_identity() {
        let root = Path::new("/data/installed");
        let a = Package::new(Identifier::new(PublicKey::new(vec![0xaa]), "11"), "app");
        let b = Package::new(Identifier::new(PublicKey::new(vec![0xbb]), "22"), "app");

        assert_eq!(a.install_path(root), PathBuf::from("/data/installed/aa/11/app"));
        assert_ne!(a.install_path(root), b.install_path(root));
    }
}
