//! Vote ledger reconciliation tests
//!
//! Blocks from other signers come from real chains in the shared ledger
//! directory, pulled in by crawling.

mod common;

use std::sync::Arc;

use catalog_node::ledger::{vote_transaction, Block, Ledger, TxValue, KEY_NAME, VOTE_BLOCK_TYPE};
use catalog_node::package::{Package, PublicKey};
use catalog_node::storage::CatalogStore;
use catalog_node::sync::{BlockObserver, BlockOutcome, VoteOutcome, VoteReconciler};

use common::{new_key, open_ledger, peer_of, subject, FailingLedger, Harness};

// =============================================================================
// Incoming blocks
// =============================================================================

#[test]
fn test_two_signers_count_twice() {
    let h = Harness::new();
    let id = subject("aaa");

    let alice = Block::new_signed(&new_key(), VOTE_BLOCK_TYPE, vote_transaction(&id, "app"), 1)
        .unwrap();
    let bob = Block::new_signed(&new_key(), VOTE_BLOCK_TYPE, vote_transaction(&id, "app"), 1)
        .unwrap();

    assert_eq!(h.reconciler.on_block(&alice).unwrap(), BlockOutcome::Counted);
    assert_eq!(h.reconciler.on_block(&bob).unwrap(), BlockOutcome::Counted);

    let package = h.store.get_catalog(&id).unwrap().unwrap();
    assert_eq!(package.votes, 2);
    assert_eq!(package.name, "app");
    assert_eq!(h.store.votes_for(&id).unwrap().len(), 2);
}

#[test]
fn test_replayed_block_counts_once() {
    let h = Harness::new();
    let id = subject("aaa");
    let block = Block::new_signed(&new_key(), VOTE_BLOCK_TYPE, vote_transaction(&id, "app"), 1)
        .unwrap();

    assert_eq!(h.reconciler.on_block(&block).unwrap(), BlockOutcome::Counted);
    assert_eq!(h.reconciler.on_block(&block).unwrap(), BlockOutcome::Duplicate);
    assert_eq!(h.reconciler.on_block(&block).unwrap(), BlockOutcome::Duplicate);

    assert_eq!(h.store.get_catalog(&id).unwrap().unwrap().votes, 1);
    assert_eq!(h.store.list_votes().unwrap().len(), 1);
}

#[test]
fn test_invalid_vote_block_changes_nothing() {
    let h = Harness::new();
    let id = subject("aaa");

    let mut tx = vote_transaction(&id, "app");
    tx.insert("extra".into(), TxValue::Integer(1));
    let extra = Block::new_signed(&new_key(), VOTE_BLOCK_TYPE, tx, 1).unwrap();

    let mut tx = vote_transaction(&id, "app");
    tx.insert(KEY_NAME.into(), TxValue::Integer(5));
    let wrong_type = Block::new_signed(&new_key(), VOTE_BLOCK_TYPE, tx, 1).unwrap();

    assert_eq!(h.reconciler.on_block(&extra).unwrap(), BlockOutcome::Discarded);
    assert_eq!(h.reconciler.on_block(&wrong_type).unwrap(), BlockOutcome::Discarded);

    assert!(h.store.list_catalog().unwrap().is_empty());
    assert!(h.store.list_votes().unwrap().is_empty());
}

#[test]
fn test_vote_block_with_path_name_is_discarded() {
    let h = Harness::new();

    for name in ["../evil", "/tmp/x", "nested/app", ".."] {
        let block =
            Block::new_signed(&new_key(), VOTE_BLOCK_TYPE, vote_transaction(&subject("aaa"), name), 1)
                .unwrap();
        assert_eq!(h.reconciler.on_block(&block).unwrap(), BlockOutcome::Discarded, "{}", name);
    }

    let escaping_hash = subject("../../etc");
    let block =
        Block::new_signed(&new_key(), VOTE_BLOCK_TYPE, vote_transaction(&escaping_hash, "app"), 1)
            .unwrap();
    assert_eq!(h.reconciler.on_block(&block).unwrap(), BlockOutcome::Discarded);

    assert!(h.store.list_catalog().unwrap().is_empty());
    assert!(h.store.list_votes().unwrap().is_empty());
}

#[test]
fn test_other_block_types_are_ignored() {
    let h = Harness::new();
    let block = Block::new_signed(&new_key(), "profile", vote_transaction(&subject("a"), "x"), 1)
        .unwrap();

    assert!(!h.reconciler.should_sign(&block));
    assert_eq!(h.reconciler.on_block(&block).unwrap(), BlockOutcome::Ignored);
    assert!(h.store.list_catalog().unwrap().is_empty());

    let vote = Block::new_signed(&new_key(), VOTE_BLOCK_TYPE, vote_transaction(&subject("a"), "x"), 1)
        .unwrap();
    assert!(h.reconciler.should_sign(&vote));
}

#[test]
fn test_block_for_known_package_keeps_its_name() {
    let h = Harness::new();
    let id = subject("aaa");
    h.store.put_catalog(&Package::new(id.clone(), "original")).unwrap();

    let block = Block::new_signed(&new_key(), VOTE_BLOCK_TYPE, vote_transaction(&id, "renamed"), 1)
        .unwrap();
    h.reconciler.on_block(&block).unwrap();

    let package = h.store.get_catalog(&id).unwrap().unwrap();
    assert_eq!(package.name, "original");
    assert_eq!(package.votes, 1);
}

// =============================================================================
// Local votes
// =============================================================================

#[tokio::test]
async fn test_vote_requires_catalog_and_counts_once() {
    let h = Harness::new();
    let id = subject("aaa");

    assert_eq!(h.reconciler.vote(&id).await.unwrap(), VoteOutcome::NotInCatalog);
    assert!(h.store.list_votes().unwrap().is_empty());

    h.store.put_catalog(&Package::new(id.clone(), "app")).unwrap();
    assert_eq!(h.reconciler.vote(&id).await.unwrap(), VoteOutcome::Recorded);
    assert_eq!(h.reconciler.vote(&id).await.unwrap(), VoteOutcome::AlreadyVoted);

    assert_eq!(h.store.get_catalog(&id).unwrap().unwrap().votes, 1);
    assert!(h.store.did_vote(&h.public_key(), &id).unwrap());

    let blocks = h.ledger.get_blocks_with_type(VOTE_BLOCK_TYPE).await.unwrap();
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].vote_subject(), Some((id, "app".to_string())));
}

#[tokio::test]
async fn test_vote_survives_ledger_failure() {
    let store = Arc::new(CatalogStore::open_in_memory().unwrap());
    let key = PublicKey::new(vec![5; 32]);
    let reconciler = VoteReconciler::new(store.clone(), Arc::new(FailingLedger { key: key.clone() }));

    let id = subject("aaa");
    store.put_catalog(&Package::new(id.clone(), "app")).unwrap();

    assert_eq!(reconciler.vote(&id).await.unwrap(), VoteOutcome::Recorded);
    assert!(store.did_vote(&key, &id).unwrap());
    assert_eq!(store.get_catalog(&id).unwrap().unwrap().votes, 1);
}

// =============================================================================
// Full reconciliation
// =============================================================================

#[tokio::test]
async fn test_reconcile_catalogs_packages_seen_on_ledger() {
    let h = Harness::new();
    let (alice, _rx) = open_ledger(&h.config.ledger_dir());
    let id = subject("aaa");

    alice
        .self_sign_and_broadcast(VOTE_BLOCK_TYPE, vote_transaction(&id, "app"))
        .await
        .unwrap();
    assert_eq!(h.ledger.crawl_chain(&peer_of(&alice)).await.unwrap(), 1);

    let report = h.reconciler.reconcile().await.unwrap();
    assert_eq!(report.blocks_scanned, 1);
    assert_eq!(report.packages_cataloged, 1);
    assert_eq!(report.records_added, 1);
    assert_eq!(report.tallies_repaired, 1);

    let package = h.store.get_catalog(&id).unwrap().unwrap();
    assert_eq!(package.votes, 1);
    assert!(h.store.did_vote(&alice.public_key(), &id).unwrap());
}

#[tokio::test]
async fn test_reconcile_reaches_fixed_point() {
    let h = Harness::new();
    let (alice, _a) = open_ledger(&h.config.ledger_dir());
    let (bob, _b) = open_ledger(&h.config.ledger_dir());
    let id = subject("aaa");
    let other = subject("bbb");

    for ledger in [&alice, &bob] {
        ledger
            .self_sign_and_broadcast(VOTE_BLOCK_TYPE, vote_transaction(&id, "app"))
            .await
            .unwrap();
    }
    bob.self_sign_and_broadcast(VOTE_BLOCK_TYPE, vote_transaction(&other, "other"))
        .await
        .unwrap();

    h.ledger.crawl_chain(&peer_of(&alice)).await.unwrap();
    h.ledger.crawl_chain(&peer_of(&bob)).await.unwrap();

    let first = h.reconciler.reconcile().await.unwrap();
    assert!(!first.is_clean());

    let before = h.store.list_catalog().unwrap();
    let second = h.reconciler.reconcile().await.unwrap();
    assert!(second.is_clean(), "second pass mutated: {:?}", second);
    assert_eq!(h.store.list_catalog().unwrap(), before);

    assert_eq!(h.store.get_catalog(&id).unwrap().unwrap().votes, 2);
    assert_eq!(h.store.get_catalog(&other).unwrap().unwrap().votes, 1);
}

#[tokio::test]
async fn test_double_vote_counts_once() {
    let h = Harness::new();
    let (alice, _rx) = open_ledger(&h.config.ledger_dir());
    let id = subject("aaa");

    for _ in 0..2 {
        alice
            .self_sign_and_broadcast(VOTE_BLOCK_TYPE, vote_transaction(&id, "app"))
            .await
            .unwrap();
    }
    assert_eq!(h.ledger.crawl_chain(&peer_of(&alice)).await.unwrap(), 2);

    let report = h.reconciler.reconcile().await.unwrap();
    assert_eq!(report.double_votes, 1);
    assert_eq!(h.store.get_catalog(&id).unwrap().unwrap().votes, 1);
}

#[tokio::test]
async fn test_reconcile_repairs_drifted_tally() {
    let h = Harness::new();
    let id = subject("aaa");
    h.store.put_catalog(&Package::new(id.clone(), "app")).unwrap();
    assert_eq!(h.reconciler.vote(&id).await.unwrap(), VoteOutcome::Recorded);

    h.store.set_votes(&id, 9).unwrap();

    let report = h.reconciler.reconcile().await.unwrap();
    assert_eq!(report.tallies_repaired, 1);
    assert_eq!(h.store.get_catalog(&id).unwrap().unwrap().votes, 1);
}

#[tokio::test]
async fn test_reconcile_skips_invalid_blocks() {
    let h = Harness::new();
    let (alice, _rx) = open_ledger(&h.config.ledger_dir());

    let mut tx = vote_transaction(&subject("aaa"), "app");
    tx.remove(KEY_NAME);
    alice
        .self_sign_and_broadcast(VOTE_BLOCK_TYPE, tx)
        .await
        .unwrap();
    h.ledger.crawl_chain(&peer_of(&alice)).await.unwrap();

    let report = h.reconciler.reconcile().await.unwrap();
    assert_eq!(report.invalid_blocks, 1);
    assert!(report.is_clean());
    assert!(h.store.list_catalog().unwrap().is_empty());
}

#[tokio::test]
async fn test_reconcile_skips_path_names() {
    let h = Harness::new();
    let (alice, _rx) = open_ledger(&h.config.ledger_dir());

    alice
        .self_sign_and_broadcast(VOTE_BLOCK_TYPE, vote_transaction(&subject("aaa"), "../evil"))
        .await
        .unwrap();
    h.ledger.crawl_chain(&peer_of(&alice)).await.unwrap();

    let report = h.reconciler.reconcile().await.unwrap();
    assert_eq!(report.invalid_blocks, 1);
    assert_eq!(report.packages_cataloged, 0);
    assert!(h.store.list_catalog().unwrap().is_empty());
}

#[tokio::test]
async fn test_package_without_votes_is_flagged_not_changed() {
    let h = Harness::new();
    let id = subject("aaa");
    h.store.put_catalog(&Package::new(id.clone(), "app")).unwrap();

    let report = h.reconciler.reconcile().await.unwrap();
    assert_eq!(report.packages_without_votes, 1);
    assert!(report.is_clean());
    assert_eq!(h.store.get_catalog(&id).unwrap().unwrap().votes, 0);
}
