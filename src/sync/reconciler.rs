//! Vote ledger reconciler
//!
//! Turns vote blocks into catalog and vote-record mutations. Counting is keyed
//! on the (voter, package) vote record, so replaying a block never counts it
//! twice.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{NodeError, StoreError};
use crate::ledger::{vote_transaction, Block, Ledger, VOTE_BLOCK_TYPE};
use crate::package::{Identifier, Package, PublicKey};
use crate::storage::CatalogStore;

/// Consumer of blocks arriving from the ledger.
pub trait BlockObserver: Send + Sync {
    /// Whether this observer takes part in blocks of this kind.
    fn should_sign(&self, block: &Block) -> bool;

    fn on_block(&self, block: &Block) -> Result<BlockOutcome, StoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteOutcome {
    Recorded,
    NotInCatalog,
    AlreadyVoted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockOutcome {
    /// Not a vote block
    Ignored,
    /// Vote block with a malformed transaction
    Discarded,
    /// Signer's vote for this package was already counted
    Duplicate,
    Counted,
}

/// What a full reconciliation pass found and changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub blocks_scanned: usize,
    pub invalid_blocks: usize,
    pub double_votes: usize,
    pub packages_cataloged: usize,
    pub records_added: usize,
    pub tallies_repaired: usize,
    pub packages_without_votes: usize,
}

impl ReconcileReport {
    /// True when the pass changed nothing in the store.
    pub fn is_clean(&self) -> bool {
        self.packages_cataloged == 0 && self.records_added == 0 && self.tallies_repaired == 0
    }
}

pub struct VoteReconciler {
    store: Arc<CatalogStore>,
    ledger: Arc<dyn Ledger>,
}

impl VoteReconciler {
    pub fn new(store: Arc<CatalogStore>, ledger: Arc<dyn Ledger>) -> Self {
        Self { store, ledger }
    }

    /// Cast this node's vote for a cataloged package.
    ///
    /// The local record is kept even when signing the ledger block fails.
    pub async fn vote(&self, id: &Identifier) -> Result<VoteOutcome, StoreError> {
        let Some(package) = self.store.get_catalog(id)? else {
            info!(%id, "Package not in catalog, not voting");
            return Ok(VoteOutcome::NotInCatalog);
        };

        let voter = self.ledger.public_key();
        if !self.store.count_vote(&voter, id)? {
            info!(%id, "Already voted for package");
            return Ok(VoteOutcome::AlreadyVoted);
        }

        match self
            .ledger
            .self_sign_and_broadcast(VOTE_BLOCK_TYPE, vote_transaction(id, &package.name))
            .await
        {
            Ok(block) => {
                info!(%id, sequence = block.sequence_number, "Voted for package");
            }
            Err(e) => {
                warn!(%id, error = %e, "Vote recorded locally but ledger signing failed");
            }
        }

        Ok(VoteOutcome::Recorded)
    }

    /// Catalog `id` with zero votes unless it is already known. Returns true
    /// when an entry was created.
    fn ensure_cataloged(&self, id: &Identifier, name: &str) -> Result<bool, StoreError> {
        if self.store.has_catalog(id)? {
            return Ok(false);
        }

        match self.store.put_catalog(&Package::new(id.clone(), name)) {
            Ok(()) => Ok(true),
            Err(StoreError::DuplicateKey(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Recompute every tally from the full set of known vote blocks.
    pub async fn reconcile(&self) -> Result<ReconcileReport, NodeError> {
        info!("Checking votes in catalog");

        let blocks = self.ledger.get_blocks_with_type(VOTE_BLOCK_TYPE).await?;
        let mut report = ReconcileReport {
            blocks_scanned: blocks.len(),
            ..Default::default()
        };

        let mut seen: BTreeMap<Identifier, (String, BTreeSet<PublicKey>)> = BTreeMap::new();
        for block in &blocks {
            let Some((id, name)) = block.vote_subject() else {
                debug!(signer = %block.signer.short(), sequence = block.sequence_number, "Skipping invalid vote block");
                report.invalid_blocks += 1;
                continue;
            };

            let (_, voters) = seen.entry(id.clone()).or_insert_with(|| (name, BTreeSet::new()));
            if !voters.insert(block.signer.clone()) {
                warn!(%id, voter = %block.signer, "Double vote for package");
                report.double_votes += 1;
            }
        }

        for (id, (name, voters)) in &seen {
            if self.ensure_cataloged(id, name)? {
                report.packages_cataloged += 1;
            }
            for voter in voters {
                if self.store.record_vote(voter, id)? {
                    report.records_added += 1;
                }
            }
        }

        // Every ledger voter now has a record, so the record count is the
        // number of distinct voters known for each package.
        for package in self.store.list_catalog()? {
            let expected = self.store.count_votes(&package.id)?;

            if expected == 0 {
                warn!(id = %package.id, "Inconsistent vote db: package has no observed votes");
                report.packages_without_votes += 1;
                continue;
            }

            if expected != package.votes {
                info!(
                    id = %package.id,
                    stored = package.votes,
                    expected,
                    "Vote inconsistency for package, repairing"
                );
                self.store.set_votes(&package.id, expected)?;
                report.tallies_repaired += 1;
            }
        }

        info!(
            blocks = report.blocks_scanned,
            repaired = report.tallies_repaired,
            double_votes = report.double_votes,
            "Checking votes in catalog is done"
        );
        Ok(report)
    }
}

impl BlockObserver for VoteReconciler {
    fn should_sign(&self, block: &Block) -> bool {
        block.block_type == VOTE_BLOCK_TYPE
    }

    fn on_block(&self, block: &Block) -> Result<BlockOutcome, StoreError> {
        if block.block_type != VOTE_BLOCK_TYPE {
            return Ok(BlockOutcome::Ignored);
        }

        let Some((id, name)) = block.vote_subject() else {
            warn!(signer = %block.signer.short(), sequence = block.sequence_number, "Discarding invalid vote block");
            return Ok(BlockOutcome::Discarded);
        };

        if self.ensure_cataloged(&id, &name)? {
            info!(%id, %name, "Cataloged package from vote block");
        }

        if self.store.count_vote(&block.signer, &id)? {
            debug!(%id, voter = %block.signer.short(), "Counted vote");
            Ok(BlockOutcome::Counted)
        } else {
            Ok(BlockOutcome::Duplicate)
        }
    }
}
