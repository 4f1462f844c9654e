//! SQLite catalog store
//!
//! The local materialized view of what this peer knows about packages.
//!
//! ## Tables
//!
//! - `catalog` - every known package with its cached vote tally
//! - `cache` - packages whose bytes are present under `installed/`
//! - `library` - installed packages, eligible to run
//! - `votes` - one row per (voter, package) seen on the ledger
//! - `schema_version` - migration marker
//!
//! Foreign keys keep library ⊆ cache ⊆ catalog. Every call commits before it
//! returns.

pub mod catalog;
pub mod collections;
pub mod schema;
pub mod votes;

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{ffi, Connection};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::package::{Identifier, Package, PublicKey, VoteRecord};

pub use collections::Collection;

/// Database file name under `<data_dir>/sqlite/`.
pub const DATABASE_FILE: &str = "catalog.db";

/// Map a constraint failure onto the store's error vocabulary.
pub(crate) fn classify(err: rusqlite::Error, id: &Identifier) -> StoreError {
    if let rusqlite::Error::SqliteFailure(failure, _) = &err {
        let code = failure.extended_code;
        if code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY || code == ffi::SQLITE_CONSTRAINT_UNIQUE {
            return StoreError::DuplicateKey(id.to_string());
        }
        if code == ffi::SQLITE_CONSTRAINT_FOREIGNKEY {
            return StoreError::MissingParent(id.to_string());
        }
    }
    StoreError::Database(err)
}

/// Persistent catalog, cache, library and vote records.
pub struct CatalogStore {
    conn: Mutex<Connection>,
}

impl CatalogStore {
    /// Open or create `<data_dir>/sqlite/catalog.db`
    pub fn open(data_dir: &Path) -> Result<Self, StoreError> {
        let sqlite_dir = data_dir.join("sqlite");
        std::fs::create_dir_all(&sqlite_dir)?;

        let db_path = sqlite_dir.join(DATABASE_FILE);
        info!("Opening catalog database at {:?}", db_path);

        let conn = Connection::open(&db_path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        Self::from_connection(conn)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self, StoreError> {
        debug!("Opening in-memory catalog database");
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(mut conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        schema::init_schema(&mut conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError>,
    {
        let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        f(&conn)
    }

    /// Execute a multi-statement write with exclusive access
    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError>,
    {
        let mut conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        f(&mut conn)
    }

    pub fn schema_version(&self) -> Result<i32, StoreError> {
        self.with_conn(schema::get_schema_version)
    }

    // ------------------------------------------------------------------
    // Catalog
    // ------------------------------------------------------------------

    /// Insert a new catalog entry. `DuplicateKey` if the id is taken.
    pub fn put_catalog(&self, package: &Package) -> Result<(), StoreError> {
        self.with_conn(|conn| catalog::put(conn, package))
    }

    pub fn get_catalog(&self, id: &Identifier) -> Result<Option<Package>, StoreError> {
        self.with_conn(|conn| catalog::get(conn, id))
    }

    pub fn has_catalog(&self, id: &Identifier) -> Result<bool, StoreError> {
        self.with_conn(|conn| catalog::has(conn, id))
    }

    pub fn list_catalog(&self) -> Result<Vec<Package>, StoreError> {
        self.with_conn(catalog::list)
    }

    pub fn increment_votes(&self, id: &Identifier) -> Result<(), StoreError> {
        self.with_conn(|conn| catalog::increment_votes(conn, id))
    }

    pub fn set_votes(&self, id: &Identifier, votes: u64) -> Result<(), StoreError> {
        self.with_conn(|conn| catalog::set_votes(conn, id, votes))
    }

    // ------------------------------------------------------------------
    // Cache / library
    // ------------------------------------------------------------------

    pub fn add_cache(&self, id: &Identifier) -> Result<bool, StoreError> {
        self.with_conn(|conn| collections::add(conn, Collection::Cache, id))
    }

    pub fn has_cache(&self, id: &Identifier) -> Result<bool, StoreError> {
        self.with_conn(|conn| collections::has(conn, Collection::Cache, id))
    }

    pub fn get_cache(&self, id: &Identifier) -> Result<Option<Identifier>, StoreError> {
        self.with_conn(|conn| collections::get(conn, Collection::Cache, id))
    }

    pub fn list_cache(&self) -> Result<Vec<Identifier>, StoreError> {
        self.with_conn(|conn| collections::list(conn, Collection::Cache))
    }

    pub fn add_library(&self, id: &Identifier) -> Result<bool, StoreError> {
        self.with_conn(|conn| collections::add(conn, Collection::Library, id))
    }

    pub fn has_library(&self, id: &Identifier) -> Result<bool, StoreError> {
        self.with_conn(|conn| collections::has(conn, Collection::Library, id))
    }

    pub fn get_library(&self, id: &Identifier) -> Result<Option<Identifier>, StoreError> {
        self.with_conn(|conn| collections::get(conn, Collection::Library, id))
    }

    pub fn list_library(&self) -> Result<Vec<Identifier>, StoreError> {
        self.with_conn(|conn| collections::list(conn, Collection::Library))
    }

    /// Add `id` to cache and library in a single transaction.
    pub fn install(&self, id: &Identifier) -> Result<(), StoreError> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            collections::add(&tx, Collection::Cache, id)?;
            collections::add(&tx, Collection::Library, id)?;
            tx.commit()?;
            Ok(())
        })
    }

    /// Cached identifiers missing from the library.
    pub fn partial_installs(&self) -> Result<Vec<Identifier>, StoreError> {
        self.with_conn(collections::partial_installs)
    }

    // ------------------------------------------------------------------
    // Votes
    // ------------------------------------------------------------------

    pub fn record_vote(&self, voter: &PublicKey, id: &Identifier) -> Result<bool, StoreError> {
        self.with_conn(|conn| votes::record(conn, voter, id))
    }

    /// Record a vote and bump the tally together. Returns false, changing
    /// nothing, when the vote was already recorded.
    pub fn count_vote(&self, voter: &PublicKey, id: &Identifier) -> Result<bool, StoreError> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            if !votes::record(&tx, voter, id)? {
                return Ok(false);
            }
            catalog::increment_votes(&tx, id)?;
            tx.commit()?;
            Ok(true)
        })
    }

    pub fn did_vote(&self, voter: &PublicKey, id: &Identifier) -> Result<bool, StoreError> {
        self.with_conn(|conn| votes::did_vote(conn, voter, id))
    }

    pub fn votes_for(&self, id: &Identifier) -> Result<Vec<VoteRecord>, StoreError> {
        self.with_conn(|conn| votes::for_subject(conn, id))
    }

    pub fn votes_by(&self, voter: &PublicKey) -> Result<Vec<VoteRecord>, StoreError> {
        self.with_conn(|conn| votes::by_voter(conn, voter))
    }

    pub fn count_votes(&self, id: &Identifier) -> Result<u64, StoreError> {
        self.with_conn(|conn| votes::count_for_subject(conn, id))
    }

    pub fn list_votes(&self) -> Result<Vec<VoteRecord>, StoreError> {
        self.with_conn(votes::list)
    }

    /// Row counts per table
    pub fn stats(&self) -> Result<StoreStats, StoreError> {
        self.with_conn(|conn| {
            let count = |table: &str| -> Result<u64, StoreError> {
                let n: i64 =
                    conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
                Ok(n.max(0) as u64)
            };

            Ok(StoreStats {
                catalog: count("catalog")?,
                cache: count("cache")?,
                library: count("library")?,
                votes: count("votes")?,
            })
        })
    }
}

/// Store statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub catalog: u64,
    pub cache: u64,
    pub library: u64,
    pub votes: u64,
}
