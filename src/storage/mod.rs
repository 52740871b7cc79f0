//! Storage module for persisting synced data
//!
//! This module handles all database operations, including:
//! - SQLite database initialization and schema management
//! - Transactional row writes with write-deduplication
//! - Mappings from platform records to rows
//! - Table statistics for the `--stats` report

pub mod records;
mod schema;
mod sqlite;
mod traits;

pub use schema::TABLES;
pub use sqlite::{SqliteStore, StoreStats};
pub use traits::{
    sql_id, validate_identifier, Key, Row, StorageError, StorageResult, Store, Transaction,
};

use std::num::NonZeroUsize;
use std::path::Path;

/// Opens a storage database
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
/// * `cache_size` - Write cache bound, `None` for unbounded
///
/// # Returns
///
/// * `Ok(SqliteStore)` - Successfully opened storage
/// * `Err(StorageError)` - Failed to open storage
pub fn open_store(path: &Path, cache_size: Option<usize>) -> StorageResult<SqliteStore> {
    SqliteStore::new(path, cache_size.and_then(NonZeroUsize::new))
}

/// Counts the rows of every table
pub fn table_counts<S: Store>(store: &S) -> StorageResult<Vec<(&'static str, u64)>> {
    store.transaction(|tx| {
        TABLES
            .iter()
            .map(|table| Ok((*table, tx.count(table, &Row::new())?)))
            .collect::<StorageResult<Vec<_>>>()
    })
}
