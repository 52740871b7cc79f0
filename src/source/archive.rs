//! Event source backed by a JSON export of a guild
//!
//! Used by the binary to replay an export into the database, and by the
//! tests as a platform stand-in that can be mutated between crawl rounds.

use crate::model::{AuditLogEntry, Channel, ChannelKind, Guild, LiveEvent, Message};
use crate::source::{EventSource, FetchResult, SourceFetchError};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::path::Path;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// On-disk layout of an export
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Archive {
    #[serde(default)]
    pub guilds: Vec<Guild>,

    #[serde(default)]
    pub channels: Vec<Channel>,

    #[serde(default)]
    pub messages: Vec<Message>,

    #[serde(default)]
    pub audit_log: Vec<AuditLogEntry>,

    /// Events replayed through `live_events`
    #[serde(default)]
    pub live: Vec<LiveEvent>,
}

#[derive(Debug, Default)]
struct Index {
    guilds: BTreeMap<u64, Guild>,
    channels: BTreeMap<u64, Channel>,
    messages: HashMap<u64, BTreeMap<u64, Message>>,
    audit_log: HashMap<u64, BTreeMap<u64, AuditLogEntry>>,
    live: Vec<LiveEvent>,
}

/// In-memory event source over an `Archive`
#[derive(Debug, Default)]
pub struct ArchiveSource {
    index: RwLock<Index>,
}

impl ArchiveSource {
    pub fn new(archive: Archive) -> Self {
        let source = Self::default();
        {
            let mut index = source.write();
            for guild in archive.guilds {
                index.guilds.insert(guild.id, guild);
            }
            for channel in archive.channels {
                index.channels.insert(channel.id, channel);
            }
            for message in archive.messages {
                index
                    .messages
                    .entry(message.channel_id)
                    .or_default()
                    .insert(message.id, message);
            }
            for entry in archive.audit_log {
                index
                    .audit_log
                    .entry(entry.guild_id)
                    .or_default()
                    .insert(entry.id, entry);
            }
            index.live = archive.live;
        }
        source
    }

    /// Parses an export from a JSON string
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let archive: Archive = serde_json::from_str(json)?;
        Ok(Self::new(archive))
    }

    /// Loads an export from a JSON file
    pub fn open(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::from_json(&content)?)
    }

    fn read(&self) -> RwLockReadGuard<'_, Index> {
        self.index.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Index> {
        self.index.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push_guild(&self, guild: Guild) {
        self.write().guilds.insert(guild.id, guild);
    }

    /// Adds or replaces a channel
    pub fn push_channel(&self, channel: Channel) {
        self.write().channels.insert(channel.id, channel);
    }

    /// Removes a channel along with its messages
    pub fn remove_channel(&self, channel_id: u64) -> Option<Channel> {
        let mut index = self.write();
        index.messages.remove(&channel_id);
        index.channels.remove(&channel_id)
    }

    pub fn push_message(&self, message: Message) {
        self.write()
            .messages
            .entry(message.channel_id)
            .or_default()
            .insert(message.id, message);
    }

    pub fn push_audit_entry(&self, entry: AuditLogEntry) {
        self.write()
            .audit_log
            .entry(entry.guild_id)
            .or_default()
            .insert(entry.id, entry);
    }

    /// Queues an event for the next `live_events` stream
    pub fn push_live(&self, event: LiveEvent) {
        self.write().live.push(event);
    }

    pub fn message_count(&self, channel_id: u64) -> usize {
        self.read().messages.get(&channel_id).map_or(0, BTreeMap::len)
    }

    fn guild_channels(&self, guild_id: u64, threads: bool) -> FetchResult<Vec<Channel>> {
        let index = self.read();
        if !index.guilds.contains_key(&guild_id) {
            return Err(SourceFetchError::UnknownGuild(guild_id));
        }

        Ok(index
            .channels
            .values()
            .filter(|c| c.guild_id == guild_id)
            .filter(|c| (c.kind == ChannelKind::Thread) == threads)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl EventSource for ArchiveSource {
    async fn guilds(&self) -> FetchResult<Vec<Guild>> {
        Ok(self.read().guilds.values().cloned().collect())
    }

    async fn channels(&self, guild_id: u64) -> FetchResult<Vec<Channel>> {
        self.guild_channels(guild_id, false)
    }

    async fn threads(&self, guild_id: u64) -> FetchResult<Vec<Channel>> {
        self.guild_channels(guild_id, true)
    }

    async fn fetch_messages(
        &self,
        channel_id: u64,
        after: u64,
        limit: usize,
    ) -> FetchResult<Vec<Message>> {
        let index = self.read();
        let channel = index
            .channels
            .get(&channel_id)
            .ok_or(SourceFetchError::UnknownChannel(channel_id))?;

        if !channel.readable {
            return Err(SourceFetchError::Forbidden(format!("channel {}", channel_id)));
        }

        Ok(index
            .messages
            .get(&channel_id)
            .map(|messages| {
                messages
                    .range((Bound::Excluded(after), Bound::Unbounded))
                    .take(limit)
                    .map(|(_, message)| message.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn fetch_audit_log(
        &self,
        guild_id: u64,
        after: u64,
        limit: usize,
    ) -> FetchResult<Vec<AuditLogEntry>> {
        let index = self.read();
        let guild = index
            .guilds
            .get(&guild_id)
            .ok_or(SourceFetchError::UnknownGuild(guild_id))?;

        if !guild.can_view_audit_log {
            return Err(SourceFetchError::Forbidden(format!(
                "audit log of guild {}",
                guild_id
            )));
        }

        let Some(entries) = index.audit_log.get(&guild_id) else {
            return Ok(Vec::new());
        };

        let newer: Vec<AuditLogEntry> = entries
            .range((Bound::Excluded(after), Bound::Unbounded))
            .take(limit)
            .map(|(_, entry)| entry.clone())
            .collect();

        if !newer.is_empty() {
            return Ok(newer);
        }

        // Past the end the platform hands back its newest page again
        let mut latest: Vec<AuditLogEntry> = entries.values().rev().take(limit).cloned().collect();
        latest.reverse();
        Ok(latest)
    }

    fn live_events(&self) -> BoxStream<'static, LiveEvent> {
        let events = std::mem::take(&mut self.write().live);
        stream::iter(events).boxed()
    }
}
