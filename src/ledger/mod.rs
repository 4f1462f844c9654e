//! Signed append-only ledger
//!
//! Each peer owns one chain of signed blocks. Votes are appended to the
//! local chain and other peers' chains are pulled in by crawling; blocks
//! learned from a crawl are delivered on the channel handed out when the
//! ledger is opened.

mod block;
pub mod local;

use async_trait::async_trait;

pub use block::{vote_transaction, Block, Transaction, TxValue};
pub use local::LocalLedger;

use crate::error::LedgerError;
use crate::overlay::PeerHandle;
use crate::package::PublicKey;

/// Block type of catalog votes.
pub const VOTE_BLOCK_TYPE: &str = "dapp_vote";

pub const KEY_CREATOR: &str = "creator";
pub const KEY_CONTENT_HASH: &str = "content_hash";
pub const KEY_NAME: &str = "name";

/// The ledger primitive the catalog is built on.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Key this node signs with.
    fn public_key(&self) -> PublicKey;

    /// Append a block to the local chain and make it available to peers.
    async fn self_sign_and_broadcast(
        &self,
        block_type: &str,
        transaction: Transaction,
    ) -> Result<Block, LedgerError>;

    /// Every known block (local and crawled) of the given type.
    async fn get_blocks_with_type(&self, block_type: &str) -> Result<Vec<Block>, LedgerError>;

    /// Pull `peer`'s chain. Returns the number of blocks not seen before; those
    /// blocks are also sent on the block channel.
    async fn crawl_chain(&self, peer: &PeerHandle) -> Result<usize, LedgerError>;
}
