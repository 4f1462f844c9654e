//! Database schema definitions

use rusqlite::{Connection, OptionalExtension};
use tracing::info;

use crate::error::StoreError;

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Migration scripts; entry `n` upgrades a database from version `n` to `n + 1`.
const MIGRATIONS: [&str; SCHEMA_VERSION as usize] = [CATALOG_SCHEMA_V1];

/// Bring the database up to `SCHEMA_VERSION`.
pub fn init_schema(conn: &mut Connection) -> Result<(), StoreError> {
    let current_version = get_schema_version(conn)?;

    if current_version > SCHEMA_VERSION {
        return Err(StoreError::UnsupportedSchema {
            found: current_version,
            supported: SCHEMA_VERSION,
        });
    }

    if current_version == SCHEMA_VERSION {
        info!("Catalog schema is up to date (v{})", current_version);
        return Ok(());
    }

    if current_version == 0 {
        info!("Creating catalog schema v{}", SCHEMA_VERSION);
    } else {
        info!("Migrating catalog schema from v{} to v{}", current_version, SCHEMA_VERSION);
    }

    let tx = conn.transaction()?;
    for script in &MIGRATIONS[current_version as usize..] {
        tx.execute_batch(script)?;
    }
    set_schema_version(&tx, SCHEMA_VERSION)?;
    tx.commit()?;

    Ok(())
}

/// Get current schema version (0 if not initialized)
pub fn get_schema_version(conn: &Connection) -> Result<i32, StoreError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    )?;

    let version = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .optional()?;

    Ok(version.unwrap_or(0))
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<(), StoreError> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

/// v1: catalog, cache, library, votes.
///
/// Foreign keys encode library ⊆ cache ⊆ catalog, and votes ⊆ catalog.
const CATALOG_SCHEMA_V1: &str = r#"
CREATE TABLE IF NOT EXISTS catalog (
    creator      BLOB NOT NULL,
    content_hash TEXT NOT NULL,
    name         TEXT NOT NULL,
    votes        INTEGER NOT NULL DEFAULT 0 CHECK (votes >= 0),

    PRIMARY KEY (creator, content_hash)
);

CREATE TABLE IF NOT EXISTS cache (
    creator      BLOB NOT NULL,
    content_hash TEXT NOT NULL,
    added_at     INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),

    PRIMARY KEY (creator, content_hash),
    FOREIGN KEY (creator, content_hash) REFERENCES catalog (creator, content_hash)
);

CREATE TABLE IF NOT EXISTS library (
    creator      BLOB NOT NULL,
    content_hash TEXT NOT NULL,
    added_at     INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),

    PRIMARY KEY (creator, content_hash),
    FOREIGN KEY (creator, content_hash) REFERENCES cache (creator, content_hash)
);

CREATE TABLE IF NOT EXISTS votes (
    voter        BLOB NOT NULL,
    creator      BLOB NOT NULL,
    content_hash TEXT NOT NULL,

    PRIMARY KEY (voter, creator, content_hash),
    FOREIGN KEY (creator, content_hash) REFERENCES catalog (creator, content_hash)
);

CREATE INDEX IF NOT EXISTS idx_votes_subject ON votes (creator, content_hash);
"#;
