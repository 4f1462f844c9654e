//! Catalog CRUD operations

use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info};

use super::classify;
use crate::error::StoreError;
use crate::package::{Identifier, Package, PublicKey};

fn package_from_row(row: &Row) -> Result<Package, rusqlite::Error> {
    let creator: Vec<u8> = row.get("creator")?;
    let votes: i64 = row.get("votes")?;
    Ok(Package {
        id: Identifier::new(PublicKey::new(creator), row.get::<_, String>("content_hash")?),
        name: row.get("name")?,
        votes: votes.max(0) as u64,
    })
}

pub fn put(conn: &Connection, package: &Package) -> Result<(), StoreError> {
    info!(id = %package.id, name = %package.name, "Adding package to catalog");

    conn.execute(
        "INSERT INTO catalog (creator, content_hash, name, votes) VALUES (?1, ?2, ?3, ?4)",
        params![
            package.id.creator.as_bytes(),
            package.id.content_hash,
            package.name,
            package.votes as i64
        ],
    )
    .map_err(|e| classify(e, &package.id))?;

    Ok(())
}

pub fn get(conn: &Connection, id: &Identifier) -> Result<Option<Package>, StoreError> {
    debug!(%id, "Getting package from catalog");

    let package = conn
        .query_row(
            "SELECT creator, content_hash, name, votes FROM catalog
             WHERE creator = ?1 AND content_hash = ?2",
            params![id.creator.as_bytes(), id.content_hash],
            package_from_row,
        )
        .optional()?;

    Ok(package)
}

pub fn has(conn: &Connection, id: &Identifier) -> Result<bool, StoreError> {
    let found = conn
        .query_row(
            "SELECT 1 FROM catalog WHERE creator = ?1 AND content_hash = ?2",
            params![id.creator.as_bytes(), id.content_hash],
            |_| Ok(()),
        )
        .optional()?;

    Ok(found.is_some())
}

pub fn list(conn: &Connection) -> Result<Vec<Package>, StoreError> {
    let mut stmt = conn.prepare_cached(
        "SELECT creator, content_hash, name, votes FROM catalog ORDER BY name, content_hash",
    )?;

    let packages = stmt
        .query_map([], package_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(packages)
}

pub fn increment_votes(conn: &Connection, id: &Identifier) -> Result<(), StoreError> {
    debug!(%id, "Adding vote to package in catalog");

    let changed = conn.execute(
        "UPDATE catalog SET votes = votes + 1 WHERE creator = ?1 AND content_hash = ?2",
        params![id.creator.as_bytes(), id.content_hash],
    )?;

    if changed == 0 {
        return Err(StoreError::NotFound(id.to_string()));
    }
    Ok(())
}

pub fn set_votes(conn: &Connection, id: &Identifier, votes: u64) -> Result<(), StoreError> {
    debug!(%id, votes, "Overwriting vote count in catalog");

    let changed = conn.execute(
        "UPDATE catalog SET votes = ?1 WHERE creator = ?2 AND content_hash = ?3",
        params![votes as i64, id.creator.as_bytes(), id.content_hash],
    )?;

    if changed == 0 {
        return Err(StoreError::NotFound(id.to_string()));
    }
    Ok(())
}
