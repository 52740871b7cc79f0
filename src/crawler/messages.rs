//! Message-history backfill for channels and threads

use crate::crawler::policy::{CrawlPolicy, ProgressTable};
use crate::model::{Channel, ChannelKind, Message};
use crate::snowflake;
use crate::source::{EventSource, SourceFetchError};
use crate::storage::records::insert_message;
use crate::storage::{StorageResult, Transaction};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// Crawls the message history of every readable channel (or thread) in the
/// configured guilds until it is exhausted
pub struct HistoryCrawler<E> {
    name: &'static str,
    source: Arc<E>,
    guild_ids: Vec<u64>,
    kind: ChannelKind,
    table: ProgressTable,
    clock: fn() -> u64,
}

impl<E: EventSource + 'static> HistoryCrawler<E> {
    /// Crawls text channels; an empty `guild_ids` means every guild
    pub fn channels(source: Arc<E>, guild_ids: Vec<u64>) -> Self {
        Self {
            name: "channels",
            source,
            guild_ids,
            kind: ChannelKind::Text,
            table: ProgressTable::CHANNELS,
            clock: snowflake::now,
        }
    }

    pub fn threads(source: Arc<E>, guild_ids: Vec<u64>) -> Self {
        Self {
            name: "threads",
            source,
            guild_ids,
            kind: ChannelKind::Thread,
            table: ProgressTable::THREADS,
            clock: snowflake::now,
        }
    }

    /// Replaces the source of "now" positions
    pub fn with_clock(mut self, clock: fn() -> u64) -> Self {
        self.clock = clock;
        self
    }

    fn wants_guild(&self, guild_id: u64) -> bool {
        self.guild_ids.is_empty() || self.guild_ids.contains(&guild_id)
    }
}

#[async_trait]
impl<E: EventSource + 'static> CrawlPolicy for HistoryCrawler<E> {
    type Source = Channel;
    type Event = Message;

    fn name(&self) -> &str {
        self.name
    }

    fn progress_table(&self) -> ProgressTable {
        self.table
    }

    fn source_id(&self, channel: &Channel) -> u64 {
        channel.id
    }

    async fn discover(&self) -> Result<Vec<Channel>, SourceFetchError> {
        let mut found = Vec::new();

        for guild in self.source.guilds().await? {
            if !self.wants_guild(guild.id) {
                continue;
            }

            let listed = match self.kind {
                ChannelKind::Thread => self.source.threads(guild.id).await,
                _ => self.source.channels(guild.id).await,
            };
            match listed {
                Ok(channels) => found.extend(channels),
                Err(e) => warn!("{}: skipping guild {}: {}", self.name, guild.id, e),
            }
        }

        Ok(found)
    }

    fn accepts(&self, channel: &Channel) -> bool {
        channel.kind == self.kind && channel.readable && self.wants_guild(channel.guild_id)
    }

    async fn read(
        &self,
        channel: &Channel,
        after: u64,
        limit: usize,
    ) -> Result<Vec<Message>, SourceFetchError> {
        self.source.fetch_messages(channel.id, after, limit).await
    }

    fn event_id(&self, message: &Message) -> u64 {
        message.id
    }

    fn write(
        &self,
        tx: &mut dyn Transaction,
        channel: &Channel,
        messages: &[Message],
    ) -> StorageResult<()> {
        let mut written = 0;
        for message in messages {
            written += insert_message(tx, message)?;
        }
        debug!(
            "{}: #{} wrote {} rows for {} messages",
            self.name,
            channel.name,
            written,
            messages.len()
        );
        Ok(())
    }

    fn now_position(&self) -> u64 {
        (self.clock)()
    }
}
