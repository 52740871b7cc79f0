//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the `Store` trait.
//! Keyed upserts go through a `WriteCache` so that rewriting a row with the
//! values it already holds never reaches the database.

use crate::cache::WriteCache;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{
    validate_identifier, Key, Row, StorageError, StorageResult, Store, Transaction,
};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    table: String,
    column: String,
    id: i64,
}

/// Counters describing the work the store has done
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Committed transactions
    pub commits: u64,

    /// Rolled back transactions
    pub rollbacks: u64,

    /// Rows written by committed transactions
    pub written: u64,

    /// Upserts skipped because the row was unchanged
    pub suppressed: u64,

    /// Entries currently held by the write cache
    pub cached: usize,

    /// Entries pushed out of the write cache by its bound
    pub evictions: u64,
}

struct Inner {
    conn: Connection,
    cache: WriteCache<CacheKey, Row>,
    stats: StoreStats,
}

/// SQLite storage backend
///
/// A single connection behind a mutex, so transactions are serialized.
pub struct SqliteStore {
    inner: Mutex<Inner>,
}

impl SqliteStore {
    /// Opens or creates the database at `path`
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    /// * `cache_capacity` - Bound on the write cache, `None` for unbounded
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStore)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path, cache_capacity: Option<NonZeroUsize>) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;
        Ok(Self::with_connection(conn, cache_capacity))
    }

    /// Creates an in-memory database
    pub fn new_in_memory(cache_capacity: Option<NonZeroUsize>) -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self::with_connection(conn, cache_capacity))
    }

    fn with_connection(conn: Connection, cache_capacity: Option<NonZeroUsize>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                conn,
                cache: WriteCache::new(cache_capacity),
                stats: StoreStats::default(),
            }),
        }
    }

    pub fn stats(&self) -> StorageResult<StoreStats> {
        let inner = self.inner.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(StoreStats {
            cached: inner.cache.len(),
            evictions: inner.cache.evictions(),
            ..inner.stats
        })
    }
}

impl Store for SqliteStore {
    fn transaction<R, F>(&self, f: F) -> StorageResult<R>
    where
        F: FnOnce(&mut dyn Transaction) -> StorageResult<R>,
    {
        let mut guard = self.inner.lock().map_err(|_| StorageError::Poisoned)?;
        let Inner { conn, cache, stats } = &mut *guard;

        let tx = conn.transaction()?;
        let mut handle = SqliteTransaction {
            conn: &tx,
            cache: &mut *cache,
            staged: Staged::default(),
        };

        let result = f(&mut handle);
        let staged = handle.into_staged();

        match result {
            Ok(value) => {
                tx.commit()?;
                staged.apply(cache, stats);
                stats.commits += 1;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback() {
                    tracing::warn!("Rollback failed: {}", rollback);
                }
                stats.rollbacks += 1;
                tracing::debug!("Transaction rolled back: {}", e);
                Err(e)
            }
        }
    }
}

/// Cache changes that only take effect once the transaction commits
#[derive(Debug, Default)]
struct Staged {
    refreshed: HashMap<CacheKey, Row>,
    dropped_rows: HashSet<CacheKey>,
    dropped_tables: HashSet<String>,
    written: u64,
    suppressed: u64,
}

impl Staged {
    fn is_dropped(&self, key: &CacheKey) -> bool {
        self.dropped_tables.contains(&key.table) || self.dropped_rows.contains(key)
    }

    fn drop_row(&mut self, key: CacheKey) {
        self.refreshed.remove(&key);
        self.dropped_rows.insert(key);
    }

    fn drop_table(&mut self, table: &str) {
        self.refreshed.retain(|key, _| key.table != table);
        self.dropped_tables.insert(table.to_string());
    }

    fn apply(self, cache: &mut WriteCache<CacheKey, Row>, stats: &mut StoreStats) {
        for key in &self.dropped_rows {
            cache.forget(key);
        }
        for table in &self.dropped_tables {
            cache.forget_where(|key| &key.table == table);
        }
        for (key, row) in self.refreshed {
            cache.set(key, row);
        }

        stats.written += self.written;
        stats.suppressed += self.suppressed;
    }
}

struct SqliteTransaction<'a> {
    conn: &'a Connection,
    cache: &'a mut WriteCache<CacheKey, Row>,
    staged: Staged,
}

impl SqliteTransaction<'_> {
    fn into_staged(self) -> Staged {
        self.staged
    }

    /// Forgets cached rows that a filtered write may have touched
    fn invalidate(&mut self, table: &str, filter: &Row) {
        let single_id = match filter.iter().collect::<Vec<_>>().as_slice() {
            [(column, Value::Integer(id))] => Some(CacheKey {
                table: table.to_string(),
                column: column.to_string(),
                id: *id,
            }),
            _ => None,
        };

        match single_id {
            Some(key) => self.staged.drop_row(key),
            None => self.staged.drop_table(table),
        }
    }
}

/// Builds ` WHERE a IS ?n AND b IS ?n+1`, numbering from `first_param`
fn where_clause(filter: &Row, first_param: usize) -> StorageResult<String> {
    if filter.is_empty() {
        return Ok(String::new());
    }

    let conditions = filter
        .columns()
        .enumerate()
        .map(|(i, column)| {
            validate_identifier(column).map(|c| format!("{} IS ?{}", c, first_param + i))
        })
        .collect::<StorageResult<Vec<_>>>()?;

    Ok(format!(" WHERE {}", conditions.join(" AND ")))
}

fn column_list(values: &Row) -> StorageResult<Vec<&str>> {
    values.columns().map(validate_identifier).collect()
}

impl Transaction for SqliteTransaction<'_> {
    fn upsert(&mut self, table: &str, key: &Key, values: &Row) -> StorageResult<bool> {
        let table = validate_identifier(table)?;
        let key_column = validate_identifier(key.column)?;
        if values.get(key_column).is_some() {
            return Err(StorageError::Constraint(format!(
                "key column {} repeated in values for {}",
                key_column, table
            )));
        }

        let cache_key = CacheKey {
            table: table.to_string(),
            column: key_column.to_string(),
            id: key.id,
        };

        let unchanged = match self.staged.refreshed.get(&cache_key) {
            Some(pending) => pending == values,
            None if self.staged.is_dropped(&cache_key) => false,
            None => self.cache.is_current(&cache_key, values),
        };

        if unchanged {
            tracing::debug!("Skipping unchanged {} row {}", table, key.id);
            self.staged.suppressed += 1;
            return Ok(false);
        }

        let columns = column_list(values)?;
        let placeholders: Vec<String> =
            (1..=columns.len() + 1).map(|i| format!("?{}", i)).collect();
        let conflict = if columns.is_empty() {
            "DO NOTHING".to_string()
        } else {
            let assignments: Vec<String> = columns
                .iter()
                .map(|c| format!("{} = excluded.{}", c, c))
                .collect();
            format!("DO UPDATE SET {}", assignments.join(", "))
        };

        let mut all_columns = vec![key_column];
        all_columns.extend(&columns);

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT({}) {}",
            table,
            all_columns.join(", "),
            placeholders.join(", "),
            key_column,
            conflict
        );

        let params = std::iter::once(Value::Integer(key.id)).chain(values.values().cloned());
        self.conn.prepare_cached(&sql)?.execute(params_from_iter(params))?;

        self.staged.written += 1;
        self.staged.dropped_rows.remove(&cache_key);
        self.staged.refreshed.insert(cache_key, values.clone());
        Ok(true)
    }

    fn insert_if_absent(&mut self, table: &str, values: &Row) -> StorageResult<bool> {
        let table = validate_identifier(table)?;
        if values.is_empty() {
            return Err(StorageError::EmptyRow(table.to_string()));
        }

        let columns = column_list(values)?;
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "INSERT OR IGNORE INTO {} ({}) VALUES ({})",
            table,
            columns.join(", "),
            placeholders.join(", ")
        );

        let inserted = self
            .conn
            .prepare_cached(&sql)?
            .execute(params_from_iter(values.values()))?;

        self.staged.written += inserted as u64;
        Ok(inserted > 0)
    }

    fn update(&mut self, table: &str, filter: &Row, values: &Row) -> StorageResult<usize> {
        let table = validate_identifier(table)?;
        if values.is_empty() {
            return Err(StorageError::EmptyRow(table.to_string()));
        }

        let assignments: Vec<String> = column_list(values)?
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{} = ?{}", c, i + 1))
            .collect();

        let sql = format!(
            "UPDATE {} SET {}{}",
            table,
            assignments.join(", "),
            where_clause(filter, values.len() + 1)?
        );

        let params = values.values().chain(filter.values());
        let changed = self.conn.prepare_cached(&sql)?.execute(params_from_iter(params))?;

        self.invalidate(table, filter);
        self.staged.written += changed as u64;
        Ok(changed)
    }

    fn delete(&mut self, table: &str, filter: &Row) -> StorageResult<usize> {
        let table = validate_identifier(table)?;
        let sql = format!("DELETE FROM {}{}", table, where_clause(filter, 1)?);
        let deleted = self
            .conn
            .prepare_cached(&sql)?
            .execute(params_from_iter(filter.values()))?;

        self.invalidate(table, filter);
        Ok(deleted)
    }

    fn select(&mut self, table: &str, filter: &Row) -> StorageResult<Vec<Row>> {
        let table = validate_identifier(table)?;
        let sql = format!("SELECT * FROM {}{}", table, where_clause(filter, 1)?);
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

        let rows = stmt.query_map(params_from_iter(filter.values()), |row| {
            let mut out = Row::new();
            for (i, name) in names.iter().enumerate() {
                out.set(name, row.get::<_, Value>(i)?);
            }
            Ok(out)
        })?;

        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn count(&mut self, table: &str, filter: &Row) -> StorageResult<u64> {
        let table = validate_identifier(table)?;
        let sql = format!("SELECT COUNT(*) FROM {}{}", table, where_clause(filter, 1)?);
        let count: i64 = self
            .conn
            .prepare_cached(&sql)?
            .query_row(params_from_iter(filter.values()), |row| row.get(0))?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> SqliteStore {
        SqliteStore::new_in_memory(NonZeroUsize::new(16)).unwrap()
    }

    fn user(name: &str) -> Row {
        Row::new()
            .with("name", name.to_string())
            .with("is_bot", false)
    }

    fn user_key(id: u64) -> Key {
        Key::new("user_id", id)
    }

    #[test]
    fn test_create_in_memory() {
        let store = store();
        let count = store
            .transaction(|tx| tx.count("users", &Row::new()))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_upsert_twice_writes_once() {
        let store = store();

        let first = store
            .transaction(|tx| tx.upsert("users", &user_key(1), &user("ammon")))
            .unwrap();
        let second = store
            .transaction(|tx| tx.upsert("users", &user_key(1), &user("ammon")))
            .unwrap();

        assert!(first);
        assert!(!second);

        let stats = store.stats().unwrap();
        assert_eq!(stats.written, 1);
        assert_eq!(stats.suppressed, 1);
    }

    #[test]
    fn test_upsert_changed_value_writes() {
        let store = store();
        store
            .transaction(|tx| tx.upsert("users", &user_key(1), &user("ammon")))
            .unwrap();
        let written = store
            .transaction(|tx| tx.upsert("users", &user_key(1), &user("ammon2")))
            .unwrap();
        assert!(written);

        let rows = store
            .transaction(|tx| tx.select("users", &Row::new().with("user_id", 1i64)))
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_text("name"), Some("ammon2"));
    }

    #[test]
    fn test_suppressed_within_one_transaction() {
        let store = store();
        let results = store
            .transaction(|tx| {
                let a = tx.upsert("users", &user_key(1), &user("ammon"))?;
                let b = tx.upsert("users", &user_key(1), &user("ammon"))?;
                Ok((a, b))
            })
            .unwrap();
        assert_eq!(results, (true, false));
    }

    #[test]
    fn test_rollback_discards_cache_refresh() {
        let store = store();

        let result: StorageResult<()> = store.transaction(|tx| {
            tx.upsert("users", &user_key(1), &user("ammon"))?;
            Err(StorageError::Constraint("forced failure".to_string()))
        });
        assert!(result.is_err());

        let count = store
            .transaction(|tx| tx.count("users", &Row::new()))
            .unwrap();
        assert_eq!(count, 0);

        // The rolled back write must not suppress the retry
        let retried = store
            .transaction(|tx| tx.upsert("users", &user_key(1), &user("ammon")))
            .unwrap();
        assert!(retried);

        let stats = store.stats().unwrap();
        assert_eq!(stats.rollbacks, 1);
        assert_eq!(stats.written, 1);
    }

    #[test]
    fn test_update_invalidates_cached_row() {
        let store = store();
        store
            .transaction(|tx| tx.upsert("users", &user_key(1), &user("ammon")))
            .unwrap();

        let changed = store
            .transaction(|tx| {
                tx.update(
                    "users",
                    &Row::new().with("user_id", 1i64),
                    &Row::new().with("name", "renamed".to_string()),
                )
            })
            .unwrap();
        assert_eq!(changed, 1);

        let rewritten = store
            .transaction(|tx| tx.upsert("users", &user_key(1), &user("ammon")))
            .unwrap();
        assert!(rewritten);

        let rows = store.transaction(|tx| tx.select("users", &Row::new())).unwrap();
        assert_eq!(rows[0].get_text("name"), Some("ammon"));
    }

    #[test]
    fn test_delete_invalidates_table() {
        let store = store();
        store
            .transaction(|tx| {
                tx.upsert("users", &user_key(1), &user("a"))?;
                tx.upsert("users", &user_key(2), &user("b"))
            })
            .unwrap();

        let deleted = store
            .transaction(|tx| tx.delete("users", &Row::new().with("name", "a".to_string())))
            .unwrap();
        assert_eq!(deleted, 1);

        let rewritten = store
            .transaction(|tx| tx.upsert("users", &user_key(1), &user("a")))
            .unwrap();
        assert!(rewritten);
    }

    #[test]
    fn test_eviction_causes_extra_write() {
        let store = SqliteStore::new_in_memory(NonZeroUsize::new(1)).unwrap();
        store
            .transaction(|tx| tx.upsert("users", &user_key(1), &user("a")))
            .unwrap();
        store
            .transaction(|tx| tx.upsert("users", &user_key(2), &user("b")))
            .unwrap();

        let again = store
            .transaction(|tx| tx.upsert("users", &user_key(1), &user("a")))
            .unwrap();
        assert!(again);

        let count = store
            .transaction(|tx| tx.count("users", &Row::new()))
            .unwrap();
        assert_eq!(count, 2);
        assert!(store.stats().unwrap().evictions >= 1);
    }

    #[test]
    fn test_insert_if_absent() {
        let store = store();
        let reaction = Row::new()
            .with("message_id", 1i64)
            .with("emoji", "👍".to_string())
            .with("user_id", 2i64);

        let first = store
            .transaction(|tx| tx.insert_if_absent("reactions", &reaction))
            .unwrap();
        let second = store
            .transaction(|tx| tx.insert_if_absent("reactions", &reaction))
            .unwrap();

        assert!(first);
        assert!(!second);
    }

    #[test]
    fn test_rejects_bad_identifiers() {
        let store = store();
        let result = store.transaction(|tx| tx.select("users; DROP TABLE users", &Row::new()));
        assert!(matches!(result, Err(StorageError::InvalidIdentifier(_))));

        let result = store.transaction(|tx| {
            tx.upsert("users", &user_key(1), &Row::new().with("bad column", 1i64))
        });
        assert!(matches!(result, Err(StorageError::InvalidIdentifier(_))));
    }

    #[test]
    fn test_empty_writes_rejected() {
        let store = store();
        let result = store.transaction(|tx| tx.insert_if_absent("users", &Row::new()));
        assert!(matches!(result, Err(StorageError::EmptyRow(_))));

        let result = store.transaction(|tx| tx.update("users", &Row::new(), &Row::new()));
        assert!(matches!(result, Err(StorageError::EmptyRow(_))));
    }

    #[test]
    fn test_null_filter_matches() {
        let store = store();
        store
            .transaction(|tx| {
                tx.upsert(
                    "users",
                    &user_key(1),
                    &user("a").with("avatar", Option::<String>::None),
                )
            })
            .unwrap();

        let rows = store
            .transaction(|tx| tx.select("users", &Row::new().with("avatar", Value::Null)))
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_persists_to_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("statline.db");

        {
            let store = SqliteStore::new(&path, None).unwrap();
            store
                .transaction(|tx| tx.upsert("users", &user_key(9), &user("disk")))
                .unwrap();
        }

        let reopened = SqliteStore::new(&path, None).unwrap();
        let rows = reopened
            .transaction(|tx| tx.select("users", &Row::new().with("user_id", 9i64)))
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_bool("is_bot"), Some(false));
    }
}
