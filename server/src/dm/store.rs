//! Conversation and message rows.
//!
//! Every function takes a borrowed connection so callers can compose them
//! inside one transaction (`rusqlite::Transaction` derefs to `Connection`).

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};

use crate::db::models::{Conversation, MessageRow};
use crate::db::to_db_timestamp;
use crate::dm::payload::MessagePayload;

/// Columns of a conversation that is about to be created.
#[derive(Debug, Clone, Default)]
pub struct NewConversation<'a> {
    pub is_direct: bool,
    /// Sorted member pair of a direct conversation.
    pub direct_key: Option<&'a str>,
    /// Group whose chat stream this conversation carries.
    pub group_id: Option<&'a str>,
}

/// A message that was just appended.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub id: String,
    pub conversation_id: String,
    pub created_at: DateTime<Utc>,
}

pub fn find_conversation(conn: &Connection, conv_id: &str) -> rusqlite::Result<Option<Conversation>> {
    conn.query_row(
        "SELECT id, is_direct, group_id, created_at FROM conversations WHERE id = ?1",
        rusqlite::params![conv_id],
        |row| {
            Ok(Conversation {
                id: row.get(0)?,
                is_direct: row.get(1)?,
                group_id: row.get(2)?,
                created_at: row.get(3)?,
            })
        },
    )
    .optional()
}

pub fn is_member(conn: &Connection, conv_id: &str, user_id: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM conversation_members WHERE conversation_id = ?1 AND user_id = ?2)",
        rusqlite::params![conv_id, user_id],
        |row| row.get(0),
    )
}

/// Member ids of a conversation.
pub fn conversation_members(conn: &Connection, conv_id: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT user_id FROM conversation_members WHERE conversation_id = ?1 ORDER BY user_id",
    )?;
    let members = stmt
        .query_map(rusqlite::params![conv_id], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(members)
}

/// Id of the direct conversation stored under `direct_key`, if any.
pub fn find_direct(conn: &Connection, direct_key: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT id FROM conversations WHERE direct_key = ?1",
        rusqlite::params![direct_key],
        |row| row.get(0),
    )
    .optional()
}

/// Id of the conversation bound to a group's chat stream, if any.
pub fn find_group_conversation(conn: &Connection, group_id: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT id FROM conversations WHERE group_id = ?1",
        rusqlite::params![group_id],
        |row| row.get(0),
    )
    .optional()
}

/// Insert a conversation row.
///
/// Returns `None` when a row with the same `direct_key` or `group_id` already
/// exists; the caller re-reads the existing row.
pub fn insert_conversation(
    conn: &Connection,
    new: &NewConversation<'_>,
) -> rusqlite::Result<Option<String>> {
    let id = uuid::Uuid::now_v7().to_string();
    let inserted = conn.execute(
        "INSERT INTO conversations (id, is_direct, direct_key, group_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT DO NOTHING",
        rusqlite::params![
            id,
            new.is_direct,
            new.direct_key,
            new.group_id,
            to_db_timestamp(&Utc::now()),
        ],
    )?;
    Ok((inserted == 1).then_some(id))
}

/// Add members to a conversation. Existing memberships are kept.
pub fn add_members(conn: &Connection, conv_id: &str, user_ids: &[&str]) -> rusqlite::Result<()> {
    let mut stmt = conn.prepare(
        "INSERT OR IGNORE INTO conversation_members (conversation_id, user_id) VALUES (?1, ?2)",
    )?;
    for user_id in user_ids {
        stmt.execute(rusqlite::params![conv_id, user_id])?;
    }
    Ok(())
}

/// Append one message to a conversation.
pub fn append_message(
    conn: &Connection,
    conv_id: &str,
    sender_id: &str,
    payload: &MessagePayload,
) -> rusqlite::Result<StoredMessage> {
    let id = uuid::Uuid::now_v7().to_string();
    let created_at = Utc::now();
    conn.execute(
        "INSERT INTO messages (id, conversation_id, sender_id, content, kind, seen, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
        rusqlite::params![
            id,
            conv_id,
            sender_id,
            payload.content(),
            payload.kind().as_i64(),
            to_db_timestamp(&created_at),
        ],
    )?;
    Ok(StoredMessage {
        id,
        conversation_id: conv_id.to_string(),
        created_at,
    })
}

fn message_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        content: row.get(3)?,
        kind: row.get(4)?,
        seen: row.get(5)?,
        created_at: row.get(6)?,
    })
}

/// All messages of a conversation, oldest first.
pub fn list_messages(conn: &Connection, conv_id: &str) -> rusqlite::Result<Vec<MessageRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, conversation_id, sender_id, content, kind, seen, created_at
         FROM messages WHERE conversation_id = ?1
         ORDER BY created_at ASC, id ASC",
    )?;
    let rows = stmt
        .query_map(rusqlite::params![conv_id], message_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Most recent message of a conversation.
pub fn last_message(conn: &Connection, conv_id: &str) -> rusqlite::Result<Option<MessageRow>> {
    conn.query_row(
        "SELECT id, conversation_id, sender_id, content, kind, seen, created_at
         FROM messages WHERE conversation_id = ?1
         ORDER BY created_at DESC, id DESC LIMIT 1",
        rusqlite::params![conv_id],
        message_from_row,
    )
    .optional()
}

/// Conversations the user belongs to, excluding group chat streams, most
/// recently active first.
pub fn user_conversations(conn: &Connection, user_id: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT c.id
         FROM conversations c
         JOIN conversation_members cm ON cm.conversation_id = c.id
         WHERE cm.user_id = ?1 AND c.group_id IS NULL
         ORDER BY COALESCE(
             (SELECT MAX(m.created_at) FROM messages m WHERE m.conversation_id = c.id),
             c.created_at
         ) DESC",
    )?;
    let ids = stmt
        .query_map(rusqlite::params![user_id], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}
