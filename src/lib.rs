//! catalog-node: peer-to-peer package catalog
//!
//! Peers advertise, vote on, distribute and run small packages identified by
//! (creator public key, content hash). Votes live in a signed per-peer ledger
//! that is crawled between peers; the local catalog is a materialized view of
//! that ledger and is reconciled against it periodically.
//!
//! Layout:
//! - `package` - identifiers and catalog entries
//! - `storage` - SQLite catalog/cache/library/votes store
//! - `ledger` - signed ledger collaborator (trait + local chain files)
//! - `transport` - package bytes collaborator (trait + seed directory)
//! - `overlay` - peer overlay collaborator (trait + static peer list)
//! - `sync` - vote reconciliation and background crawl/reconcile scheduling
//! - `execution` - manifest-driven package activation
//! - `node` - lifecycle engine and the coordinating worker loop
//! - `api` - HTTP routes over the node handle

pub mod api;
pub mod config;
pub mod error;
pub mod execution;
pub mod identity;
pub mod ledger;
pub mod node;
pub mod overlay;
pub mod package;
pub mod storage;
pub mod sync;
pub mod transport;

pub use config::Config;
pub use error::{NodeError, StoreError};
pub use node::{Node, NodeHandle};
pub use package::{Identifier, Package, PublicKey};
