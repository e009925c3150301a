//! Conversation list for the messaging sidebar.

use axum::{extract::State, Json};
use rusqlite::Connection;
use serde::Serialize;

use crate::auth::CurrentUser;
use crate::db::models::UserSummary;
use crate::directory::users;
use crate::dm::payload::MessageKind;
use crate::dm::store;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct LastMessage {
    pub id: String,
    pub sender: UserSummary,
    pub content: String,
    pub date: String,
    pub read: bool,
    /// "content" or "image"
    #[serde(rename = "type")]
    pub kind: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ConversationSummary {
    pub conv: String,
    /// Everyone in the conversation except the caller.
    pub users: Vec<UserSummary>,
    #[serde(rename = "lastMessage")]
    pub last_message: Option<LastMessage>,
}

/// Build the caller's conversation list, most recently active first.
pub fn list_conversations(
    conn: &Connection,
    user_id: &str,
) -> Result<Vec<ConversationSummary>, ApiError> {
    let mut out = Vec::new();
    for conv_id in store::user_conversations(conn, user_id)? {
        let others = store::conversation_members(conn, &conv_id)?
            .into_iter()
            .filter(|member| member != user_id)
            .map(|member| users::user_summary_or_default(conn, &member))
            .collect::<Result<Vec<_>, _>>()?;

        let last_message = match store::last_message(conn, &conv_id)? {
            Some(row) => Some(LastMessage {
                sender: users::user_summary_or_default(conn, &row.sender_id)?,
                kind: if MessageKind::from_i64(row.kind).is_image() {
                    "image"
                } else {
                    "content"
                },
                id: row.id,
                content: row.content,
                date: row.created_at,
                read: row.seen,
            }),
            None => None,
        };

        out.push(ConversationSummary {
            conv: conv_id,
            users: others,
            last_message,
        });
    }
    Ok(out)
}

/// GET /api/conversations
pub async fn get_conversations(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<Vec<ConversationSummary>>, ApiError> {
    let db = state.db.clone();
    let list = tokio::task::spawn_blocking(move || -> Result<Vec<ConversationSummary>, ApiError> {
        let conn = db
            .lock()
            .map_err(|_| ApiError::Internal("database lock poisoned".into()))?;
        list_conversations(&conn, &user.user_id)
    })
    .await??;
    Ok(Json(list))
}
