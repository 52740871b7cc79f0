//! Statline: keeps a local relational mirror of a chat platform in sync
//!
//! This crate crawls paginated history (channel messages, thread messages,
//! guild audit logs) alongside a live event feed and writes everything into
//! SQLite, keeping per-source progress resumable across restarts.

pub mod cache;
pub mod config;
pub mod crawler;
pub mod history;
pub mod ingest;
pub mod model;
pub mod range;
pub mod snowflake;
pub mod source;
pub mod state;
pub mod storage;

use thiserror::Error;

/// Main error type for Statline operations
#[derive(Debug, Error)]
pub enum StatlineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Range error: {0}")]
    Range(#[from] RangeError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Source fetch error: {0}")]
    Source(#[from] source::SourceFetchError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Archive parse error: {0}")]
    Archive(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Interval-set errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RangeError {
    #[error("Invalid range: beginning {begin} is larger than end {end}")]
    InvalidRange { begin: String, end: String },

    #[error("Cannot iterate over or measure an unbounded set")]
    UnboundedSet,

    #[error("Operation not implemented: {0}")]
    NotImplemented(&'static str),
}

/// Result type alias for Statline operations
pub type Result<T> = std::result::Result<T, StatlineError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for interval-set operations
pub type RangeResult<T> = std::result::Result<T, RangeError>;

// Re-export commonly used types
pub use cache::WriteCache;
pub use config::Config;
pub use history::MessageHistory;
pub use range::{IntervalSet, MultiRange, Range};
pub use state::{CrawlProgress, SourceState};
