//! Row mappings for platform records
//!
//! Each function writes one record kind through an open transaction. Keyed
//! rows go through `upsert`, so rewriting an unchanged guild, channel, user
//! or message is suppressed by the write cache.

use crate::model::{AuditLogEntry, Channel, Emoji, Guild, Member, Message, Role, User};
use crate::storage::traits::{sql_id, Key, Row, StorageResult, Transaction};

pub fn upsert_guild(tx: &mut dyn Transaction, guild: &Guild) -> StorageResult<bool> {
    let values = Row::new()
        .with("name", guild.name.clone())
        .with("is_deleted", false);
    tx.upsert("guilds", &Key::new("guild_id", guild.id), &values)
}

pub fn upsert_channel(tx: &mut dyn Transaction, channel: &Channel) -> StorageResult<bool> {
    let values = Row::new()
        .with("guild_id", sql_id(channel.guild_id))
        .with("name", channel.name.clone())
        .with("kind", channel.kind.as_str().to_string())
        .with("parent_id", channel.parent_id.map(sql_id))
        .with("is_deleted", false);
    tx.upsert("channels", &Key::new("channel_id", channel.id), &values)
}

/// Soft-deletes a channel, keeping its messages
pub fn mark_channel_deleted(tx: &mut dyn Transaction, channel_id: u64) -> StorageResult<bool> {
    let changed = tx.update(
        "channels",
        &Row::new().with("channel_id", sql_id(channel_id)),
        &Row::new().with("is_deleted", true),
    )?;
    Ok(changed > 0)
}

pub fn upsert_user(tx: &mut dyn Transaction, user: &User) -> StorageResult<bool> {
    let values = Row::new()
        .with("name", user.name.clone())
        .with("discriminator", user.discriminator.clone())
        .with("avatar", user.avatar.clone())
        .with("is_bot", user.bot);
    tx.upsert("users", &Key::new("user_id", user.id), &values)
}

fn member_key(guild_id: u64, user_id: u64) -> Row {
    Row::new()
        .with("guild_id", sql_id(guild_id))
        .with("user_id", sql_id(user_id))
}

/// Writes a guild membership together with the user and their roles
///
/// Returns the number of rows actually written.
pub fn upsert_member(tx: &mut dyn Transaction, member: &Member) -> StorageResult<usize> {
    let mut written = usize::from(upsert_user(tx, &member.user)?);

    let key = member_key(member.guild_id, member.user.id);
    let values = Row::new()
        .with("nick", member.nick.clone())
        .with("is_deleted", false);
    let mut row = key.clone();
    for (column, value) in values.iter() {
        row.set(column, value.clone());
    }

    match tx.select("members", &key)?.first() {
        Some(current) if *current == row => {}
        Some(_) => written += tx.update("members", &key, &values)?,
        None => written += usize::from(tx.insert_if_absent("members", &row)?),
    }

    written += sync_member_roles(tx, member)?;
    Ok(written)
}

/// Replaces the role assignments of a member with `member.role_ids`
fn sync_member_roles(tx: &mut dyn Transaction, member: &Member) -> StorageResult<usize> {
    let key = member_key(member.guild_id, member.user.id);
    let current: Vec<u64> = tx
        .select("role_membership", &key)?
        .iter()
        .filter_map(|row| row.get_i64("role_id"))
        .map(|id| id as u64)
        .collect();

    let mut written = 0;
    for role_id in current.iter().filter(|id| !member.role_ids.contains(id)) {
        let filter = key.clone().with("role_id", sql_id(*role_id));
        written += tx.delete("role_membership", &filter)?;
    }
    for role_id in member.role_ids.iter().filter(|id| !current.contains(id)) {
        let values = key.clone().with("role_id", sql_id(*role_id));
        written += usize::from(tx.insert_if_absent("role_membership", &values)?);
    }
    Ok(written)
}

/// Soft-deletes a membership and drops the member's role assignments
pub fn mark_member_left(
    tx: &mut dyn Transaction,
    guild_id: u64,
    user_id: u64,
) -> StorageResult<bool> {
    let key = member_key(guild_id, user_id);
    let changed = tx.update("members", &key, &Row::new().with("is_deleted", true))?;
    tx.delete("role_membership", &key)?;
    Ok(changed > 0)
}

pub fn upsert_role(tx: &mut dyn Transaction, role: &Role) -> StorageResult<bool> {
    let values = Row::new()
        .with("guild_id", sql_id(role.guild_id))
        .with("name", role.name.clone())
        .with("color", role.color)
        .with("permissions", sql_id(role.permissions))
        .with("position", role.position)
        .with("is_hoisted", role.hoisted)
        .with("is_managed", role.managed)
        .with("is_mentionable", role.mentionable)
        .with("is_deleted", false);
    tx.upsert("roles", &Key::new("role_id", role.id), &values)
}

/// Soft-deletes a role and removes it from every member
pub fn mark_role_deleted(tx: &mut dyn Transaction, role_id: u64) -> StorageResult<bool> {
    let key = Row::new().with("role_id", sql_id(role_id));
    let changed = tx.update("roles", &key, &Row::new().with("is_deleted", true))?;
    tx.delete("role_membership", &key)?;
    Ok(changed > 0)
}

pub fn upsert_emoji(tx: &mut dyn Transaction, emoji: &Emoji) -> StorageResult<bool> {
    let values = Row::new()
        .with("guild_id", sql_id(emoji.guild_id))
        .with("name", emoji.name.clone())
        .with("is_animated", emoji.animated)
        .with("is_deleted", false);
    tx.upsert("emojis", &Key::new("emoji_id", emoji.id), &values)
}

/// Brings a guild's emoji rows in line with its current emoji list
///
/// Emojis missing from `emojis` are soft-deleted. Returns the number of rows
/// actually written.
pub fn sync_guild_emojis(
    tx: &mut dyn Transaction,
    guild_id: u64,
    emojis: &[Emoji],
) -> StorageResult<usize> {
    let mut written = 0;
    for emoji in emojis {
        written += usize::from(upsert_emoji(tx, emoji)?);
    }

    let present = Row::new()
        .with("guild_id", sql_id(guild_id))
        .with("is_deleted", false);
    for row in tx.select("emojis", &present)? {
        let Some(emoji_id) = row.get_i64("emoji_id") else {
            continue;
        };
        if emojis.iter().all(|emoji| sql_id(emoji.id) != emoji_id) {
            written += tx.update(
                "emojis",
                &Row::new().with("emoji_id", emoji_id),
                &Row::new().with("is_deleted", true),
            )?;
        }
    }
    Ok(written)
}

fn reaction_row(message_id: u64, emoji: &str, user_id: u64) -> Row {
    Row::new()
        .with("message_id", sql_id(message_id))
        .with("emoji", emoji.to_string())
        .with("user_id", sql_id(user_id))
}

pub fn add_reaction(
    tx: &mut dyn Transaction,
    message_id: u64,
    emoji: &str,
    user_id: u64,
) -> StorageResult<bool> {
    tx.insert_if_absent("reactions", &reaction_row(message_id, emoji, user_id))
}

pub fn remove_reaction(
    tx: &mut dyn Transaction,
    message_id: u64,
    emoji: &str,
    user_id: u64,
) -> StorageResult<bool> {
    let deleted = tx.delete("reactions", &reaction_row(message_id, emoji, user_id))?;
    Ok(deleted > 0)
}

/// Removes every reaction on a message, returning how many went
pub fn clear_reactions(tx: &mut dyn Transaction, message_id: u64) -> StorageResult<usize> {
    tx.delete("reactions", &Row::new().with("message_id", sql_id(message_id)))
}

fn message_row(message: &Message) -> Row {
    Row::new()
        .with("channel_id", sql_id(message.channel_id))
        .with("author_id", sql_id(message.author.id))
        .with("content", message.content.clone())
        .with("created_at", message.created_at().to_rfc3339())
        .with("edited_at", message.edited_at.map(|t| t.to_rfc3339()))
        .with("pinned", message.pinned)
}

/// Writes a message together with its author and reactions
///
/// Returns the number of rows actually written.
pub fn insert_message(tx: &mut dyn Transaction, message: &Message) -> StorageResult<usize> {
    let mut written = 0;

    if upsert_user(tx, &message.author)? {
        written += 1;
    }

    if tx.upsert(
        "messages",
        &Key::new("message_id", message.id),
        &message_row(message),
    )? {
        written += 1;
    }

    for reaction in &message.reactions {
        for user_id in &reaction.user_ids {
            if add_reaction(tx, message.id, &reaction.emoji, *user_id)? {
                written += 1;
            }
        }
    }

    Ok(written)
}

/// Applies an edit to an already stored message
pub fn edit_message(tx: &mut dyn Transaction, message: &Message) -> StorageResult<bool> {
    tx.upsert(
        "messages",
        &Key::new("message_id", message.id),
        &message_row(message),
    )
}

pub fn mark_message_deleted(tx: &mut dyn Transaction, message_id: u64) -> StorageResult<bool> {
    let changed = tx.update(
        "messages",
        &Row::new().with("message_id", sql_id(message_id)),
        &Row::new().with("is_deleted", true),
    )?;
    Ok(changed > 0)
}

pub fn insert_audit_entry(tx: &mut dyn Transaction, entry: &AuditLogEntry) -> StorageResult<bool> {
    let values = Row::new()
        .with("guild_id", sql_id(entry.guild_id))
        .with("user_id", sql_id(entry.user_id))
        .with("action", entry.action.clone())
        .with("target_id", entry.target_id.map(sql_id))
        .with("reason", entry.reason.clone())
        .with("created_at", entry.created_at().to_rfc3339());
    tx.upsert("audit_log", &Key::new("audit_entry_id", entry.id), &values)
}
