//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the Statline database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Guilds the bot has seen
CREATE TABLE IF NOT EXISTS guilds (
    guild_id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    is_deleted INTEGER NOT NULL DEFAULT 0
);

-- Channels and threads
CREATE TABLE IF NOT EXISTS channels (
    channel_id INTEGER PRIMARY KEY,
    guild_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    kind TEXT NOT NULL,
    parent_id INTEGER,
    is_deleted INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_channels_guild ON channels(guild_id);

CREATE TABLE IF NOT EXISTS users (
    user_id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    discriminator TEXT,
    avatar TEXT,
    is_bot INTEGER NOT NULL DEFAULT 0
);

-- Guild membership, soft-deleted when the user leaves
CREATE TABLE IF NOT EXISTS members (
    guild_id INTEGER NOT NULL,
    user_id INTEGER NOT NULL,
    nick TEXT,
    is_deleted INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (guild_id, user_id)
);

CREATE TABLE IF NOT EXISTS roles (
    role_id INTEGER PRIMARY KEY,
    guild_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    color INTEGER NOT NULL DEFAULT 0,
    permissions INTEGER NOT NULL DEFAULT 0,
    position INTEGER NOT NULL DEFAULT 0,
    is_hoisted INTEGER NOT NULL DEFAULT 0,
    is_managed INTEGER NOT NULL DEFAULT 0,
    is_mentionable INTEGER NOT NULL DEFAULT 0,
    is_deleted INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_roles_guild ON roles(guild_id);

CREATE TABLE IF NOT EXISTS role_membership (
    role_id INTEGER NOT NULL,
    guild_id INTEGER NOT NULL,
    user_id INTEGER NOT NULL,
    PRIMARY KEY (role_id, user_id)
);

CREATE TABLE IF NOT EXISTS emojis (
    emoji_id INTEGER PRIMARY KEY,
    guild_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    is_animated INTEGER NOT NULL DEFAULT 0,
    is_deleted INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS messages (
    message_id INTEGER PRIMARY KEY,
    channel_id INTEGER NOT NULL,
    author_id INTEGER NOT NULL,
    content TEXT NOT NULL,
    created_at TEXT NOT NULL,
    edited_at TEXT,
    pinned INTEGER NOT NULL DEFAULT 0,
    is_deleted INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_messages_channel ON messages(channel_id);
CREATE INDEX IF NOT EXISTS idx_messages_author ON messages(author_id);

-- One row per user per emoji per message
CREATE TABLE IF NOT EXISTS reactions (
    message_id INTEGER NOT NULL,
    emoji TEXT NOT NULL,
    user_id INTEGER NOT NULL,
    PRIMARY KEY (message_id, emoji, user_id)
);

CREATE TABLE IF NOT EXISTS audit_log (
    audit_entry_id INTEGER PRIMARY KEY,
    guild_id INTEGER NOT NULL,
    user_id INTEGER NOT NULL,
    action TEXT NOT NULL,
    target_id INTEGER,
    reason TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_audit_log_guild ON audit_log(guild_id);

-- Crawl progress, one row per source
CREATE TABLE IF NOT EXISTS channel_crawl (
    source_id INTEGER PRIMARY KEY,
    last_position INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS thread_crawl (
    source_id INTEGER PRIMARY KEY,
    last_position INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS audit_log_crawl (
    source_id INTEGER PRIMARY KEY,
    last_position INTEGER NOT NULL
);
"#;

/// Tables created by `SCHEMA_SQL`
pub const TABLES: &[&str] = &[
    "guilds",
    "channels",
    "users",
    "members",
    "roles",
    "role_membership",
    "emojis",
    "messages",
    "reactions",
    "audit_log",
    "channel_crawl",
    "thread_crawl",
    "audit_log_crawl",
];

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
