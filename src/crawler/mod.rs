//! Crawler module for paginated history backfill
//!
//! This module contains the core crawling logic, including:
//! - The `CrawlPolicy` strategy trait and its progress tables
//! - The producer/consumer engine with backpressure and retries
//! - Lifecycle hooks for sources appearing and disappearing
//! - Concrete policies for message history and audit logs

mod audit_log;
mod engine;
mod messages;
mod policy;

pub use audit_log::AuditLogCrawler;
pub use engine::{
    Batch, Consumer, ConsumerSummary, Control, Crawler, CrawlerHandle, Delivery, EngineSettings,
    Producer, ProducerSummary, Queue, QueueItem, RoundOutcome, RunningCrawler,
};
pub use messages::HistoryCrawler;
pub use policy::{CrawlPolicy, ProgressTable};
