//! Error types for catalog-node

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Cache needs a catalog entry, library needs a cache entry, a vote
    /// needs a catalog entry.
    #[error("Missing parent record for {0}")]
    MissingParent(String),

    #[error("Unsupported schema version {found} (this build supports up to {supported})")]
    UnsupportedSchema { found: i32, supported: i32 },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Lock poisoned")]
    LockPoisoned,
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid signature on block {sequence} from {signer}")]
    InvalidSignature { signer: String, sequence: u64 },

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Block channel closed")]
    ChannelClosed,
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Package {name} ({content_hash}) not available from any seed")]
    NotFound { content_hash: String, name: String },

    #[error("Hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("Invalid package: {0}")]
    InvalidPackage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum OverlayError {
    #[error("Start callback {method} failed: {reason}")]
    Callback { method: String, reason: String },

    #[error("Lock poisoned")]
    LockPoisoned,
}

#[derive(Error, Debug)]
pub enum NodeError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Node is not running")]
    Stopped,
}

impl NodeError {
    /// Short machine-readable kind, attached to failure responses.
    pub fn kind(&self) -> &'static str {
        match self {
            NodeError::Store(_) => "store",
            NodeError::Ledger(_) => "ledger",
            NodeError::Transport(_) => "transport",
            NodeError::Config(_) => "config",
            NodeError::Stopped => "stopped",
        }
    }
}
