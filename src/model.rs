//! Plain records as delivered by an event source

use crate::snowflake;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

fn yes() -> bool {
    true
}

/// A guild (server) the bot is a member of
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guild {
    pub id: u64,
    pub name: String,

    /// Whether the bot may read this guild's audit log
    #[serde(default = "yes")]
    pub can_view_audit_log: bool,
}

/// The kind of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Text,
    Voice,
    Category,
    Thread,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Voice => "voice",
            Self::Category => "category",
            Self::Thread => "thread",
        }
    }
}

/// A guild channel or thread
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: u64,
    pub guild_id: u64,
    pub name: String,
    pub kind: ChannelKind,

    /// The owning channel, for threads
    #[serde(default)]
    pub parent_id: Option<u64>,

    /// Whether the bot may read this channel's message history
    #[serde(default = "yes")]
    pub readable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub name: String,

    #[serde(default)]
    pub discriminator: Option<String>,

    #[serde(default)]
    pub avatar: Option<String>,

    #[serde(default)]
    pub bot: bool,
}

/// A user's membership in one guild
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub guild_id: u64,
    pub user: User,

    #[serde(default)]
    pub nick: Option<String>,

    #[serde(default)]
    pub role_ids: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: u64,
    pub guild_id: u64,
    pub name: String,

    #[serde(default)]
    pub color: u32,

    /// Raw permission bits
    #[serde(default)]
    pub permissions: u64,

    #[serde(default)]
    pub position: i64,

    #[serde(default)]
    pub hoisted: bool,

    #[serde(default)]
    pub managed: bool,

    #[serde(default)]
    pub mentionable: bool,
}

/// A custom guild emoji
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Emoji {
    pub id: u64,
    pub guild_id: u64,
    pub name: String,

    #[serde(default)]
    pub animated: bool,
}

/// One emoji on a message along with everyone who reacted with it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub emoji: String,

    #[serde(default)]
    pub user_ids: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: u64,
    pub channel_id: u64,
    pub author: User,
    pub content: String,

    #[serde(default)]
    pub edited_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub pinned: bool,

    #[serde(default)]
    pub reactions: Vec<Reaction>,
}

impl Message {
    /// Creation time, recovered from the message ID
    pub fn created_at(&self) -> DateTime<Utc> {
        snowflake::to_datetime(self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: u64,
    pub guild_id: u64,
    pub user_id: u64,
    pub action: String,

    #[serde(default)]
    pub target_id: Option<u64>,

    #[serde(default)]
    pub reason: Option<String>,
}

impl AuditLogEntry {
    pub fn created_at(&self) -> DateTime<Utc> {
        snowflake::to_datetime(self.id)
    }
}

/// An event pushed by the platform in real time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LiveEvent {
    MessageCreate { message: Message },
    MessageUpdate { message: Message },
    MessageDelete { channel_id: u64, message_id: u64 },
    ChannelCreate { channel: Channel },
    ChannelUpdate { before: Channel, after: Channel },
    ChannelDelete { channel: Channel },
    ThreadCreate { thread: Channel },
    ThreadDelete { thread: Channel },
    UserUpdate { user: User },
    ReactionAdd {
        message_id: u64,
        emoji: String,
        user_id: u64,
    },
    ReactionRemove {
        message_id: u64,
        emoji: String,
        user_id: u64,
    },
    ReactionClear { message_id: u64 },
    MemberJoin { member: Member },
    MemberUpdate { member: Member },
    MemberRemove { guild_id: u64, user_id: u64 },
    RoleCreate { role: Role },
    RoleUpdate { role: Role },
    RoleDelete { role: Role },

    /// The full emoji list of a guild after a change
    EmojisUpdate {
        guild_id: u64,
        emojis: Vec<Emoji>,
    },
}

impl LiveEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MessageCreate { .. } => "message_create",
            Self::MessageUpdate { .. } => "message_update",
            Self::MessageDelete { .. } => "message_delete",
            Self::ChannelCreate { .. } => "channel_create",
            Self::ChannelUpdate { .. } => "channel_update",
            Self::ChannelDelete { .. } => "channel_delete",
            Self::ThreadCreate { .. } => "thread_create",
            Self::ThreadDelete { .. } => "thread_delete",
            Self::UserUpdate { .. } => "user_update",
            Self::ReactionAdd { .. } => "reaction_add",
            Self::ReactionRemove { .. } => "reaction_remove",
            Self::ReactionClear { .. } => "reaction_clear",
            Self::MemberJoin { .. } => "member_join",
            Self::MemberUpdate { .. } => "member_update",
            Self::MemberRemove { .. } => "member_remove",
            Self::RoleCreate { .. } => "role_create",
            Self::RoleUpdate { .. } => "role_update",
            Self::RoleDelete { .. } => "role_delete",
            Self::EmojisUpdate { .. } => "emojis_update",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_defaults() {
        let channel: Channel =
            serde_json::from_str(r#"{"id": 5, "guild_id": 1, "name": "general", "kind": "text"}"#)
                .unwrap();
        assert!(channel.readable);
        assert_eq!(channel.parent_id, None);
        assert_eq!(channel.kind, ChannelKind::Text);
    }

    #[test]
    fn test_live_event_tagging() {
        let event: LiveEvent = serde_json::from_str(
            r#"{"type": "message_delete", "channel_id": 5, "message_id": 99}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            LiveEvent::MessageDelete {
                channel_id: 5,
                message_id: 99
            }
        );
        assert_eq!(event.kind(), "message_delete");
    }

    #[test]
    fn test_member_and_role_defaults() {
        let event: LiveEvent = serde_json::from_str(
            r#"{
                "type": "member_join",
                "member": {"guild_id": 1, "user": {"id": 7, "name": "ammon"}}
            }"#,
        )
        .unwrap();
        let LiveEvent::MemberJoin { member } = event else {
            panic!("expected a member join");
        };
        assert_eq!(member.nick, None);
        assert!(member.role_ids.is_empty());

        let role: Role =
            serde_json::from_str(r#"{"id": 3, "guild_id": 1, "name": "mods"}"#).unwrap();
        assert_eq!(role.permissions, 0);
        assert!(!role.mentionable);
    }

    #[test]
    fn test_message_created_at() {
        let message: Message = serde_json::from_str(
            r#"{
                "id": 175928847299117063,
                "channel_id": 5,
                "author": {"id": 7, "name": "ammon"},
                "content": "hi"
            }"#,
        )
        .unwrap();
        assert_eq!(message.created_at().timestamp_millis(), 1_462_015_105_796);
        assert!(message.reactions.is_empty());
        assert!(!message.author.bot);
    }
}
