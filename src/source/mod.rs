//! Event source interface
//!
//! An event source is the client side of the chat platform: it lists guilds
//! and channels, pages through history and streams live events. The crawl
//! policies only ever talk to the platform through this trait.

mod archive;

pub use archive::{Archive, ArchiveSource};

use crate::model::{AuditLogEntry, Channel, Guild, LiveEvent, Message};
use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

/// Errors returned by an event source
///
/// All of these are transient from the crawler's point of view: the source
/// is skipped for the current round and tried again on the next one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceFetchError {
    #[error("Unknown channel: {0}")]
    UnknownChannel(u64),

    #[error("Unknown guild: {0}")]
    UnknownGuild(u64),

    #[error("Missing access to {0}")]
    Forbidden(String),

    #[error("Source unavailable: {0}")]
    Unavailable(String),
}

/// Result type for event source calls
pub type FetchResult<T> = Result<T, SourceFetchError>;

/// Read access to the chat platform
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Lists the guilds visible to the bot
    async fn guilds(&self) -> FetchResult<Vec<Guild>>;

    /// Lists the non-thread channels of a guild
    async fn channels(&self, guild_id: u64) -> FetchResult<Vec<Channel>>;

    /// Lists the active and archived threads of a guild
    async fn threads(&self, guild_id: u64) -> FetchResult<Vec<Channel>>;

    /// Returns up to `limit` messages with IDs above `after`, oldest first
    async fn fetch_messages(
        &self,
        channel_id: u64,
        after: u64,
        limit: usize,
    ) -> FetchResult<Vec<Message>>;

    /// Returns up to `limit` audit-log entries, oldest first
    ///
    /// The platform does not honor `after` strictly and may return entries
    /// at or below it.
    async fn fetch_audit_log(
        &self,
        guild_id: u64,
        after: u64,
        limit: usize,
    ) -> FetchResult<Vec<AuditLogEntry>>;

    /// Streams events as the platform pushes them
    fn live_events(&self) -> BoxStream<'static, LiveEvent>;
}
