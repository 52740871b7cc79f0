//! Live event ingestion
//!
//! The ingestor writes live events straight into the store and forwards
//! channel and thread lifecycle events to the crawlers, so that a new channel
//! gets backfilled and a deleted one stops being polled.

use crate::crawler::CrawlerHandle;
use crate::model::{Channel, ChannelKind, Guild, LiveEvent};
use crate::storage::records::{
    add_reaction, clear_reactions, edit_message, insert_message, mark_channel_deleted,
    mark_member_left, mark_message_deleted, mark_role_deleted, remove_reaction, sync_guild_emojis,
    upsert_channel, upsert_guild, upsert_member, upsert_role, upsert_user,
};
use crate::storage::{StorageResult, Store};
use futures::{Stream, StreamExt};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Counters for one ingestion run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub events: u64,

    /// Events that changed at least one row
    pub written: u64,

    pub failed: u64,
}

/// Applies live events to the store and drives crawler hooks
pub struct LiveIngestor<St> {
    store: Arc<St>,
    channel_crawlers: Vec<CrawlerHandle<Channel>>,
    thread_crawlers: Vec<CrawlerHandle<Channel>>,
}

impl<St: Store> LiveIngestor<St> {
    pub fn new(store: Arc<St>) -> Self {
        Self {
            store,
            channel_crawlers: Vec::new(),
            thread_crawlers: Vec::new(),
        }
    }

    pub fn with_channel_crawler(mut self, handle: CrawlerHandle<Channel>) -> Self {
        self.channel_crawlers.push(handle);
        self
    }

    pub fn with_thread_crawler(mut self, handle: CrawlerHandle<Channel>) -> Self {
        self.thread_crawlers.push(handle);
        self
    }

    fn crawlers_for(&self, channel: &Channel) -> &[CrawlerHandle<Channel>] {
        match channel.kind {
            ChannelKind::Thread => &self.thread_crawlers,
            _ => &self.channel_crawlers,
        }
    }

    /// Writes the guild and channel listing fetched at startup
    pub fn sync_snapshot(&self, guilds: &[Guild], channels: &[Channel]) -> StorageResult<usize> {
        self.store.transaction(|tx| {
            let mut written = 0;
            for guild in guilds {
                written += usize::from(upsert_guild(tx, guild)?);
            }
            for channel in channels {
                written += usize::from(upsert_channel(tx, channel)?);
            }
            Ok(written)
        })
    }

    /// Applies one event
    ///
    /// Returns true if any row was written. Crawler hooks run only after the
    /// row change is committed.
    pub fn handle(&self, event: &LiveEvent) -> StorageResult<bool> {
        match event {
            LiveEvent::MessageCreate { message } => self
                .store
                .transaction(|tx| insert_message(tx, message))
                .map(|written| written > 0),
            LiveEvent::MessageUpdate { message } => {
                self.store.transaction(|tx| edit_message(tx, message))
            }
            LiveEvent::MessageDelete { message_id, .. } => self
                .store
                .transaction(|tx| mark_message_deleted(tx, *message_id)),
            LiveEvent::ChannelCreate { channel } | LiveEvent::ThreadCreate { thread: channel } => {
                let written = self.store.transaction(|tx| upsert_channel(tx, channel))?;
                for crawler in self.crawlers_for(channel) {
                    crawler.source_created(channel.clone());
                }
                Ok(written)
            }
            LiveEvent::ChannelUpdate { after, .. } => {
                let written = self.store.transaction(|tx| upsert_channel(tx, after))?;
                for crawler in self.crawlers_for(after) {
                    crawler.source_updated(after.clone());
                }
                Ok(written)
            }
            LiveEvent::ChannelDelete { channel } | LiveEvent::ThreadDelete { thread: channel } => {
                let written = self
                    .store
                    .transaction(|tx| mark_channel_deleted(tx, channel.id))?;
                for crawler in self.crawlers_for(channel) {
                    crawler.source_removed(channel.clone());
                }
                Ok(written)
            }
            LiveEvent::UserUpdate { user } => self.store.transaction(|tx| upsert_user(tx, user)),
            LiveEvent::ReactionAdd {
                message_id,
                emoji,
                user_id,
            } => self
                .store
                .transaction(|tx| add_reaction(tx, *message_id, emoji, *user_id)),
            LiveEvent::ReactionRemove {
                message_id,
                emoji,
                user_id,
            } => self
                .store
                .transaction(|tx| remove_reaction(tx, *message_id, emoji, *user_id)),
            LiveEvent::ReactionClear { message_id } => self
                .store
                .transaction(|tx| clear_reactions(tx, *message_id))
                .map(|cleared| cleared > 0),
            LiveEvent::MemberJoin { member } | LiveEvent::MemberUpdate { member } => self
                .store
                .transaction(|tx| upsert_member(tx, member))
                .map(|written| written > 0),
            LiveEvent::MemberRemove { guild_id, user_id } => self
                .store
                .transaction(|tx| mark_member_left(tx, *guild_id, *user_id)),
            LiveEvent::RoleCreate { role } | LiveEvent::RoleUpdate { role } => {
                self.store.transaction(|tx| upsert_role(tx, role))
            }
            LiveEvent::RoleDelete { role } => {
                self.store.transaction(|tx| mark_role_deleted(tx, role.id))
            }
            LiveEvent::EmojisUpdate { guild_id, emojis } => self
                .store
                .transaction(|tx| sync_guild_emojis(tx, *guild_id, emojis))
                .map(|written| written > 0),
        }
    }

    /// Drains a live event stream
    ///
    /// Failed events are logged and skipped.
    pub async fn run<S>(&self, mut events: S) -> IngestStats
    where
        S: Stream<Item = LiveEvent> + Unpin,
    {
        let mut stats = IngestStats::default();

        while let Some(event) = events.next().await {
            stats.events += 1;
            match self.handle(&event) {
                Ok(true) => stats.written += 1,
                Ok(false) => debug!("live {}: nothing changed", event.kind()),
                Err(e) => {
                    stats.failed += 1;
                    error!("live {}: failed to apply: {}", event.kind(), e);
                }
            }
        }

        info!(
            "Live ingestion finished: {} events, {} written, {} failed",
            stats.events, stats.written, stats.failed
        );
        stats
    }
}
