//! State module for tracking crawl progress
//!
//! # Components
//!
//! - `SourceState`: Whether a source still has unfetched data
//! - `CrawlProgress`: The producer's in-memory cursor for one source

mod progress;

pub use progress::{CrawlProgress, SourceState};
