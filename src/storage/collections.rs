//! Cache and library membership sets
//!
//! Both tables have the same shape (an identifier per row); they differ only
//! in which table they hang off.

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use super::classify;
use crate::error::StoreError;
use crate::package::{Identifier, PublicKey};

/// Identifier sets layered on top of the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    /// Payload bytes are present locally.
    Cache,
    /// Installed and eligible to run.
    Library,
}

impl Collection {
    fn table(self) -> &'static str {
        match self {
            Collection::Cache => "cache",
            Collection::Library => "library",
        }
    }
}

/// Insert `id`; inserting an existing member is a no-op.
///
/// Returns true when a row was added.
pub fn add(conn: &Connection, collection: Collection, id: &Identifier) -> Result<bool, StoreError> {
    let sql = format!(
        "INSERT OR IGNORE INTO {} (creator, content_hash) VALUES (?1, ?2)",
        collection.table()
    );

    let changed = conn
        .execute(&sql, params![id.creator.as_bytes(), id.content_hash])
        .map_err(|e| classify(e, id))?;

    if changed > 0 {
        info!(%id, table = collection.table(), "Added package");
    }
    Ok(changed > 0)
}

pub fn has(conn: &Connection, collection: Collection, id: &Identifier) -> Result<bool, StoreError> {
    debug!(%id, table = collection.table(), "Checking membership");

    let sql = format!(
        "SELECT 1 FROM {} WHERE creator = ?1 AND content_hash = ?2",
        collection.table()
    );

    let found = conn
        .query_row(&sql, params![id.creator.as_bytes(), id.content_hash], |_| Ok(()))
        .optional()?;

    Ok(found.is_some())
}

pub fn get(
    conn: &Connection,
    collection: Collection,
    id: &Identifier,
) -> Result<Option<Identifier>, StoreError> {
    Ok(has(conn, collection, id)?.then(|| id.clone()))
}

pub fn list(conn: &Connection, collection: Collection) -> Result<Vec<Identifier>, StoreError> {
    let sql = format!(
        "SELECT creator, content_hash FROM {} ORDER BY added_at, content_hash",
        collection.table()
    );

    let mut stmt = conn.prepare_cached(&sql)?;
    let ids = stmt
        .query_map([], |row| {
            let creator: Vec<u8> = row.get(0)?;
            let content_hash: String = row.get(1)?;
            Ok(Identifier::new(PublicKey::new(creator), content_hash))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ids)
}

/// Cache entries that never made it into the library.
pub fn partial_installs(conn: &Connection) -> Result<Vec<Identifier>, StoreError> {
    let mut stmt = conn.prepare_cached(
        "SELECT c.creator, c.content_hash FROM cache c
         LEFT JOIN library l ON l.creator = c.creator AND l.content_hash = c.content_hash
         WHERE l.creator IS NULL
         ORDER BY c.added_at, c.content_hash",
    )?;

    let ids = stmt
        .query_map([], |row| {
            let creator: Vec<u8> = row.get(0)?;
            let content_hash: String = row.get(1)?;
            Ok(Identifier::new(PublicKey::new(creator), content_hash))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ids)
}
