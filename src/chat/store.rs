//! Relational chat store. Rows here are the source of truth; the fan-out
//! cache only carries copies of freshly inserted messages.

use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use super::ChatScope;
use crate::db::models::{ChatBan, ChatMessage, ChatSettings, Poll, PollVote, ReactionGroup};

pub const OWN_DELETE_PLACEHOLDER: &str = "Message deleted";
pub const ADMIN_DELETE_PLACEHOLDER: &str = "Admin deleted this message";
pub const DEFAULT_BAN_REASON: &str = "No reason provided";

const MESSAGE_COLUMNS: &str =
    "id, user_name, user_email, message, created_at, is_deleted, deleted_by, is_pinned";

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<ChatMessage> {
    Ok(ChatMessage {
        id: row.get(0)?,
        user_name: row.get(1)?,
        user_email: row.get(2)?,
        message: row.get(3)?,
        created_at: row.get(4)?,
        is_deleted: row.get(5)?,
        deleted_by: row.get(6)?,
        is_pinned: row.get(7)?,
        reactions: Vec::new(),
    })
}

// ---------------------------------------------------------------------------
// Settings and bans
// ---------------------------------------------------------------------------

pub fn load_settings(conn: &Connection) -> rusqlite::Result<ChatSettings> {
    let settings = conn
        .query_row(
            "SELECT sudo_chat_enabled, root_chat_enabled FROM chat_settings WHERE id = 1",
            [],
            |row| {
                Ok(ChatSettings {
                    sudo_chat_enabled: row.get(0)?,
                    root_chat_enabled: row.get(1)?,
                })
            },
        )
        .optional()?;
    Ok(settings.unwrap_or_default())
}

pub fn save_settings(conn: &Connection, settings: ChatSettings) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO chat_settings (id, sudo_chat_enabled, root_chat_enabled, updated_at)
         VALUES (1, ?1, ?2, datetime('now'))
         ON CONFLICT(id) DO UPDATE SET
           sudo_chat_enabled = excluded.sudo_chat_enabled,
           root_chat_enabled = excluded.root_chat_enabled,
           updated_at = excluded.updated_at",
        params![settings.sudo_chat_enabled, settings.root_chat_enabled],
    )?;
    Ok(())
}

pub fn chat_enabled(conn: &Connection, scope: ChatScope) -> rusqlite::Result<bool> {
    let enabled: Option<bool> = conn
        .query_row(
            &format!(
                "SELECT {} FROM chat_settings WHERE id = 1",
                scope.settings_column()
            ),
            [],
            |row| row.get(0),
        )
        .optional()?;
    Ok(enabled.unwrap_or(true))
}

pub fn is_banned(conn: &Connection, email: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT COUNT(*) > 0 FROM chat_bans WHERE user_email = ?1",
        params![email],
        |row| row.get(0),
    )
}

/// Ban `email` from every scope. Re-banning replaces the reason.
pub fn ban(
    conn: &Connection,
    email: &str,
    banned_by: &str,
    reason: Option<&str>,
) -> rusqlite::Result<()> {
    let reason = reason
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .unwrap_or(DEFAULT_BAN_REASON);
    conn.execute(
        "INSERT OR REPLACE INTO chat_bans (user_email, banned_by, reason, created_at)
         VALUES (?1, ?2, ?3, datetime('now'))",
        params![email, banned_by, reason],
    )?;
    Ok(())
}

pub fn unban(conn: &Connection, email: &str) -> rusqlite::Result<bool> {
    let changed = conn.execute("DELETE FROM chat_bans WHERE user_email = ?1", params![email])?;
    Ok(changed > 0)
}

pub fn list_bans(conn: &Connection) -> rusqlite::Result<Vec<ChatBan>> {
    let mut stmt = conn.prepare(
        "SELECT user_email, banned_by, reason, created_at FROM chat_bans ORDER BY created_at DESC",
    )?;
    let bans = stmt
        .query_map([], |row| {
            Ok(ChatBan {
                user_email: row.get(0)?,
                banned_by: row.get(1)?,
                reason: row.get(2)?,
                created_at: row.get(3)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(bans)
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

pub fn insert_message(
    conn: &Connection,
    scope: ChatScope,
    user_name: &str,
    user_email: &str,
    body: &str,
) -> rusqlite::Result<ChatMessage> {
    conn.query_row(
        &format!(
            "INSERT INTO {} (user_name, user_email, message) VALUES (?1, ?2, ?3)
             RETURNING {MESSAGE_COLUMNS}",
            scope.tables().messages
        ),
        params![user_name, user_email, body],
        message_from_row,
    )
}

pub fn get_message(
    conn: &Connection,
    scope: ChatScope,
    id: i64,
) -> rusqlite::Result<Option<ChatMessage>> {
    let message = conn
        .query_row(
            &format!(
                "SELECT {MESSAGE_COLUMNS} FROM {} WHERE id = ?1",
                scope.tables().messages
            ),
            params![id],
            message_from_row,
        )
        .optional()?;

    match message {
        Some(message) => {
            let mut messages = vec![message];
            attach_reactions(conn, scope, &mut messages)?;
            Ok(messages.pop())
        }
        None => Ok(None),
    }
}

/// The `limit` newest messages, oldest first, with reactions attached.
pub fn recent_messages(
    conn: &Connection,
    scope: ChatScope,
    limit: usize,
) -> rusqlite::Result<Vec<ChatMessage>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM {} ORDER BY created_at DESC, id DESC LIMIT ?1",
        scope.tables().messages
    ))?;
    let mut messages = stmt
        .query_map(params![limit as i64], message_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    messages.reverse();
    attach_reactions(conn, scope, &mut messages)?;
    Ok(messages)
}

/// Messages created strictly after `after` (a store timestamp), oldest first.
pub fn messages_after(
    conn: &Connection,
    scope: ChatScope,
    after: &str,
) -> rusqlite::Result<Vec<ChatMessage>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM {} WHERE created_at > ?1 ORDER BY created_at ASC, id ASC",
        scope.tables().messages
    ))?;
    let mut messages = stmt
        .query_map(params![after], message_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    attach_reactions(conn, scope, &mut messages)?;
    Ok(messages)
}

fn attach_reactions(
    conn: &Connection,
    scope: ChatScope,
    messages: &mut [ChatMessage],
) -> rusqlite::Result<()> {
    if messages.is_empty() {
        return Ok(());
    }

    let placeholders = vec!["?"; messages.len()].join(", ");
    let mut stmt = conn.prepare(&format!(
        "SELECT message_id, emoji, user_email FROM {} WHERE message_id IN ({placeholders})
         ORDER BY rowid",
        scope.tables().reactions
    ))?;
    let rows = stmt
        .query_map(params_from_iter(messages.iter().map(|m| m.id)), |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    for (message_id, emoji, user_email) in rows {
        let Some(message) = messages.iter_mut().find(|m| m.id == message_id) else {
            continue;
        };
        match message.reactions.iter_mut().find(|g| g.emoji == emoji) {
            Some(group) => {
                group.count += 1;
                group.users.push(user_email);
            }
            None => message.reactions.push(ReactionGroup {
                emoji,
                count: 1,
                users: vec![user_email],
            }),
        }
    }
    Ok(())
}

/// Returns false when the member already reacted with this emoji.
pub fn add_reaction(
    conn: &Connection,
    scope: ChatScope,
    message_id: i64,
    user_email: &str,
    emoji: &str,
) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        &format!(
            "INSERT OR IGNORE INTO {} (message_id, user_email, emoji) VALUES (?1, ?2, ?3)",
            scope.tables().reactions
        ),
        params![message_id, user_email, emoji],
    )?;
    Ok(changed > 0)
}

pub fn remove_reaction(
    conn: &Connection,
    scope: ChatScope,
    message_id: i64,
    user_email: &str,
    emoji: &str,
) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        &format!(
            "DELETE FROM {} WHERE message_id = ?1 AND user_email = ?2 AND emoji = ?3",
            scope.tables().reactions
        ),
        params![message_id, user_email, emoji],
    )?;
    Ok(changed > 0)
}

pub fn set_pinned(
    conn: &Connection,
    scope: ChatScope,
    message_id: i64,
    pinned: bool,
) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        &format!(
            "UPDATE {} SET is_pinned = ?2 WHERE id = ?1",
            scope.tables().messages
        ),
        params![message_id, pinned],
    )?;
    Ok(changed > 0)
}

/// Soft-delete a member's own, not yet deleted, message.
pub fn soft_delete_own(
    conn: &Connection,
    scope: ChatScope,
    message_id: i64,
    user_email: &str,
) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        &format!(
            "UPDATE {} SET is_deleted = 1, message = ?3, deleted_by = ?2
             WHERE id = ?1 AND user_email = ?2 AND is_deleted = 0",
            scope.tables().messages
        ),
        params![message_id, user_email, OWN_DELETE_PLACEHOLDER],
    )?;
    Ok(changed > 0)
}

/// Soft-delete any message on behalf of an admin.
pub fn admin_delete(
    conn: &Connection,
    scope: ChatScope,
    message_id: i64,
    admin_email: &str,
) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        &format!(
            "UPDATE {} SET is_deleted = 1, message = ?3, deleted_by = ?2
             WHERE id = ?1 AND is_deleted = 0",
            scope.tables().messages
        ),
        params![message_id, admin_email, ADMIN_DELETE_PLACEHOLDER],
    )?;
    Ok(changed > 0)
}

// ---------------------------------------------------------------------------
// Polls
// ---------------------------------------------------------------------------

const POLL_COLUMNS: &str = "id, user_name, user_email, question, options, created_at";

fn poll_from_row(row: &Row<'_>) -> rusqlite::Result<Poll> {
    let options: String = row.get(4)?;
    let options = serde_json::from_str(&options).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(Poll {
        id: row.get(0)?,
        user_name: row.get(1)?,
        user_email: row.get(2)?,
        question: row.get(3)?,
        options,
        created_at: row.get(5)?,
        votes: Vec::new(),
    })
}

pub fn create_poll(
    conn: &Connection,
    scope: ChatScope,
    user_name: &str,
    user_email: &str,
    question: &str,
    options: &[String],
) -> rusqlite::Result<Poll> {
    let options = serde_json::to_string(options)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
    conn.query_row(
        &format!(
            "INSERT INTO {} (user_name, user_email, question, options) VALUES (?1, ?2, ?3, ?4)
             RETURNING {POLL_COLUMNS}",
            scope.tables().polls
        ),
        params![user_name, user_email, question, options],
        poll_from_row,
    )
}

pub fn get_poll(conn: &Connection, scope: ChatScope, id: i64) -> rusqlite::Result<Option<Poll>> {
    let poll = conn
        .query_row(
            &format!(
                "SELECT {POLL_COLUMNS} FROM {} WHERE id = ?1",
                scope.tables().polls
            ),
            params![id],
            poll_from_row,
        )
        .optional()?;

    match poll {
        Some(mut poll) => {
            poll.votes = poll_votes(conn, scope, poll.id)?;
            Ok(Some(poll))
        }
        None => Ok(None),
    }
}

/// The `limit` newest polls, newest first, with their votes.
pub fn recent_polls(
    conn: &Connection,
    scope: ChatScope,
    limit: usize,
) -> rusqlite::Result<Vec<Poll>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {POLL_COLUMNS} FROM {} ORDER BY created_at DESC, id DESC LIMIT ?1",
        scope.tables().polls
    ))?;
    let mut polls = stmt
        .query_map(params![limit as i64], poll_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    for poll in &mut polls {
        poll.votes = poll_votes(conn, scope, poll.id)?;
    }
    Ok(polls)
}

fn poll_votes(conn: &Connection, scope: ChatScope, poll_id: i64) -> rusqlite::Result<Vec<PollVote>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT option_index, user_email FROM {} WHERE poll_id = ?1 ORDER BY rowid",
        scope.tables().votes
    ))?;
    let votes = stmt
        .query_map(params![poll_id], |row| {
            Ok(PollVote {
                option_index: row.get(0)?,
                user_email: row.get(1)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(votes)
}

/// Record a vote. A member's later vote on the same poll replaces the earlier one.
pub fn cast_vote(
    conn: &Connection,
    scope: ChatScope,
    poll_id: i64,
    user_email: &str,
    option_index: i64,
) -> rusqlite::Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO {} (poll_id, user_email, option_index) VALUES (?1, ?2, ?3)
             ON CONFLICT(poll_id, user_email) DO UPDATE SET
               option_index = excluded.option_index,
               created_at = datetime('now')",
            scope.tables().votes
        ),
        params![poll_id, user_email, option_index],
    )?;
    Ok(())
}
