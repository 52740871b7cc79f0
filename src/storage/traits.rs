//! Storage traits and error types
//!
//! This module defines the transactional row interface the crawler and the
//! ingestion layer write through, along with its error type.

use rusqlite::types::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("No columns given for a write to {0}")]
    EmptyRow(String),

    #[error("Store lock poisoned")]
    Poisoned,

    #[error("Constraint violation: {0}")]
    Constraint(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Column name to value map
///
/// Used both for values to write and as an equality filter, where every
/// listed column must match.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row(BTreeMap<String, Value>);

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a column, builder style
    pub fn with(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.set(column, value);
        self
    }

    pub fn set(&mut self, column: &str, value: impl Into<Value>) {
        self.0.insert(column.to_string(), value.into());
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.get(column)
    }

    pub fn get_i64(&self, column: &str) -> Option<i64> {
        match self.0.get(column) {
            Some(Value::Integer(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn get_text(&self, column: &str) -> Option<&str> {
        match self.0.get(column) {
            Some(Value::Text(value)) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn get_bool(&self, column: &str) -> Option<bool> {
        self.get_i64(column).map(|value| value != 0)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.0.values()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(column, value)| (column.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Primary key of a row written with `Transaction::upsert`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Key {
    pub column: &'static str,
    pub id: i64,
}

impl Key {
    pub fn new(column: &'static str, id: u64) -> Self {
        Self {
            column,
            id: sql_id(id),
        }
    }
}

/// Maps a platform ID onto an SQLite integer
///
/// Snowflakes only use the low 63 bits, so the conversion is lossless.
pub fn sql_id(id: u64) -> i64 {
    id as i64
}

/// Operations available inside one store transaction
pub trait Transaction {
    /// Inserts the row, or updates it when `key` already exists
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - The row was written
    /// * `Ok(false)` - The write was skipped because the row already holds
    ///   exactly `values`
    fn upsert(&mut self, table: &str, key: &Key, values: &Row) -> StorageResult<bool>;

    /// Inserts the row unless it would violate a uniqueness constraint
    ///
    /// Returns true if a row was inserted.
    fn insert_if_absent(&mut self, table: &str, values: &Row) -> StorageResult<bool>;

    /// Sets `values` on every row matching `filter`, returning the row count
    fn update(&mut self, table: &str, filter: &Row, values: &Row) -> StorageResult<usize>;

    /// Deletes every row matching `filter`, returning the row count
    fn delete(&mut self, table: &str, filter: &Row) -> StorageResult<usize>;

    /// Returns every row matching `filter`
    fn select(&mut self, table: &str, filter: &Row) -> StorageResult<Vec<Row>>;

    /// Counts the rows matching `filter`
    fn count(&mut self, table: &str, filter: &Row) -> StorageResult<u64>;
}

/// A transactional row store
///
/// `transaction` commits when the closure returns `Ok` and rolls back when
/// it returns `Err`. Transactions never nest.
pub trait Store: Send + Sync {
    fn transaction<R, F>(&self, f: F) -> StorageResult<R>
    where
        F: FnOnce(&mut dyn Transaction) -> StorageResult<R>;
}

impl<S: Store> Store for std::sync::Arc<S> {
    fn transaction<R, F>(&self, f: F) -> StorageResult<R>
    where
        F: FnOnce(&mut dyn Transaction) -> StorageResult<R>,
    {
        (**self).transaction(f)
    }
}

/// Checks that a table or column name is safe to splice into SQL
pub fn validate_identifier(name: &str) -> StorageResult<&str> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');

    if valid_start && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(name)
    } else {
        Err(StorageError::InvalidIdentifier(name.to_string()))
    }
}
