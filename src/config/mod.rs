//! Configuration module for Statline
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use statline::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("statline.toml")).unwrap();
//! println!("Queue holds {} pages", config.crawler.queue_size);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{CacheConfig, Config, CrawlerConfig, DelayConfig, SourceConfig, StorageConfig};

// Re-export parser functions
pub use parser::{load_config, parse_config};
