//! Vote records: the materialized view of ledger vote blocks

use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

use super::classify;
use crate::error::StoreError;
use crate::package::{Identifier, PublicKey, VoteRecord};

fn vote_from_row(row: &Row) -> Result<VoteRecord, rusqlite::Error> {
    let voter: Vec<u8> = row.get("voter")?;
    let creator: Vec<u8> = row.get("creator")?;
    Ok(VoteRecord {
        voter: PublicKey::new(voter),
        subject: Identifier::new(PublicKey::new(creator), row.get::<_, String>("content_hash")?),
    })
}

/// Insert a vote record; an existing (voter, subject) pair is left untouched.
///
/// Returns true when a row was added. Never touches the catalog tally.
pub fn record(conn: &Connection, voter: &PublicKey, id: &Identifier) -> Result<bool, StoreError> {
    debug!(voter = %voter.short(), %id, "Recording vote");

    let changed = conn
        .execute(
            "INSERT OR IGNORE INTO votes (voter, creator, content_hash) VALUES (?1, ?2, ?3)",
            params![voter.as_bytes(), id.creator.as_bytes(), id.content_hash],
        )
        .map_err(|e| classify(e, id))?;

    Ok(changed > 0)
}

pub fn did_vote(conn: &Connection, voter: &PublicKey, id: &Identifier) -> Result<bool, StoreError> {
    let found = conn
        .query_row(
            "SELECT 1 FROM votes WHERE voter = ?1 AND creator = ?2 AND content_hash = ?3",
            params![voter.as_bytes(), id.creator.as_bytes(), id.content_hash],
            |_| Ok(()),
        )
        .optional()?;

    Ok(found.is_some())
}

pub fn for_subject(conn: &Connection, id: &Identifier) -> Result<Vec<VoteRecord>, StoreError> {
    let mut stmt = conn.prepare_cached(
        "SELECT voter, creator, content_hash FROM votes
         WHERE creator = ?1 AND content_hash = ?2 ORDER BY voter",
    )?;

    let votes = stmt
        .query_map(params![id.creator.as_bytes(), id.content_hash], vote_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(votes)
}

pub fn by_voter(conn: &Connection, voter: &PublicKey) -> Result<Vec<VoteRecord>, StoreError> {
    let mut stmt = conn.prepare_cached(
        "SELECT voter, creator, content_hash FROM votes
         WHERE voter = ?1 ORDER BY creator, content_hash",
    )?;

    let votes = stmt
        .query_map(params![voter.as_bytes()], vote_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(votes)
}

pub fn count_for_subject(conn: &Connection, id: &Identifier) -> Result<u64, StoreError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM votes WHERE creator = ?1 AND content_hash = ?2",
        params![id.creator.as_bytes(), id.content_hash],
        |row| row.get(0),
    )?;

    Ok(count.max(0) as u64)
}

pub fn list(conn: &Connection) -> Result<Vec<VoteRecord>, StoreError> {
    let mut stmt = conn.prepare_cached(
        "SELECT voter, creator, content_hash FROM votes ORDER BY creator, content_hash, voter",
    )?;

    let votes = stmt
        .query_map([], vote_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(votes)
}
