//! Ledger backed by chain files in a shared directory
//!
//! Every node on a host writes its own chain to
//! `<dir>/<signer-hex>.chain.json`; crawling a peer reads that peer's file.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use ed25519_dalek::SigningKey;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use super::{Block, Ledger, Transaction};
use crate::error::LedgerError;
use crate::overlay::PeerHandle;
use crate::package::PublicKey;

const CHAIN_SUFFIX: &str = ".chain.json";

#[derive(Default)]
struct ChainState {
    /// Blocks signed by this node, in sequence order
    own: Vec<Block>,
    /// Own and crawled blocks
    known: Vec<Block>,
    seen: HashSet<(PublicKey, u64)>,
}

impl ChainState {
    fn remember(&mut self, block: Block) -> bool {
        if !self.seen.insert((block.signer.clone(), block.sequence_number)) {
            return false;
        }
        self.known.push(block);
        true
    }
}

pub struct LocalLedger {
    dir: PathBuf,
    signing_key: SigningKey,
    public_key: PublicKey,
    state: Mutex<ChainState>,
    blocks_tx: mpsc::UnboundedSender<Block>,
}

impl LocalLedger {
    /// Open the ledger in `dir`, loading this node's existing chain.
    ///
    /// The receiver yields blocks learned from crawling.
    pub fn open(
        dir: &Path,
        signing_key: SigningKey,
    ) -> Result<(Self, mpsc::UnboundedReceiver<Block>), LedgerError> {
        std::fs::create_dir_all(dir)?;

        let public_key = crate::identity::public_key(&signing_key);
        let path = chain_path(dir, &public_key);

        let mut state = ChainState::default();
        if path.exists() {
            let chain: Vec<Block> = serde_json::from_slice(&std::fs::read(&path)?)?;
            for block in chain {
                block.verify()?;
                state.own.push(block.clone());
                state.remember(block);
            }
            info!(
                public_key = %public_key.short(),
                blocks = state.own.len(),
                "Loaded local chain"
            );
        }

        let (blocks_tx, blocks_rx) = mpsc::unbounded_channel();

        Ok((
            Self {
                dir: dir.to_path_buf(),
                signing_key,
                public_key,
                state: Mutex::new(state),
                blocks_tx,
            },
            blocks_rx,
        ))
    }

    async fn write_chain(&self, chain: &[Block]) -> Result<(), LedgerError> {
        let path = chain_path(&self.dir, &self.public_key);
        let tmp = path.with_extension("tmp");

        tokio::fs::write(&tmp, serde_json::to_vec_pretty(chain)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

#[async_trait]
impl Ledger for LocalLedger {
    fn public_key(&self) -> PublicKey {
        self.public_key.clone()
    }

    async fn self_sign_and_broadcast(
        &self,
        block_type: &str,
        transaction: Transaction,
    ) -> Result<Block, LedgerError> {
        let mut state = self.state.lock().await;

        let sequence_number = state.own.len() as u64 + 1;
        let block = Block::new_signed(&self.signing_key, block_type, transaction, sequence_number)?;

        state.own.push(block.clone());
        if let Err(e) = self.write_chain(&state.own).await {
            state.own.pop();
            return Err(e);
        }
        state.remember(block.clone());

        debug!(block_type, sequence_number, "Signed block");
        Ok(block)
    }

    async fn get_blocks_with_type(&self, block_type: &str) -> Result<Vec<Block>, LedgerError> {
        let state = self.state.lock().await;
        Ok(state
            .known
            .iter()
            .filter(|b| b.block_type == block_type)
            .cloned()
            .collect())
    }

    async fn crawl_chain(&self, peer: &PeerHandle) -> Result<usize, LedgerError> {
        if peer.public_key == self.public_key {
            return Ok(0);
        }

        let path = chain_path(&self.dir, &peer.public_key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(peer = %peer.public_key.short(), "Peer has no chain yet");
                return Ok(0);
            }
            Err(e) => return Err(e.into()),
        };
        let chain: Vec<Block> = serde_json::from_slice(&bytes)?;

        let mut state = self.state.lock().await;
        let mut fresh = 0;

        for block in chain {
            if block.signer != peer.public_key {
                warn!(
                    peer = %peer.public_key.short(),
                    signer = %block.signer.short(),
                    "Skipping foreign block in peer chain"
                );
                continue;
            }
            if let Err(e) = block.verify() {
                warn!(peer = %peer.public_key.short(), error = %e, "Skipping unverifiable block");
                continue;
            }
            if !state.remember(block.clone()) {
                continue;
            }

            fresh += 1;
            self.blocks_tx
                .send(block)
                .map_err(|_| LedgerError::ChannelClosed)?;
        }

        if fresh > 0 {
            info!(peer = %peer.public_key.short(), blocks = fresh, "Crawled new blocks");
        }
        Ok(fresh)
    }
}

fn chain_path(dir: &Path, key: &PublicKey) -> PathBuf {
    dir.join(format!("{}{}", key.to_hex(), CHAIN_SUFFIX))
}
