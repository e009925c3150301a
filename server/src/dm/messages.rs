//! REST endpoints for sending and reading conversation messages.

use axum::{
    extract::{DefaultBodyLimit, Multipart, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::auth::CurrentUser;
use crate::db::models::UserSummary;
use crate::directory::users;
use crate::dm::form::{self, MessageForm};
use crate::dm::payload::MessageKind;
use crate::dm::send::{self, SendReceipt, SendRequest};
use crate::dm::store;
use crate::error::ApiError;
use crate::state::AppState;

/// Room for the non-image form fields on top of the image cap.
const FORM_OVERHEAD_BYTES: usize = 1024 * 1024;

/// Body limit layer for routes that accept a message image.
pub fn message_body_limit(max_image_bytes: usize) -> DefaultBodyLimit {
    DefaultBodyLimit::max(max_image_bytes + FORM_OVERHEAD_BYTES)
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(rename = "convID")]
    pub conv_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MessageView {
    pub id: String,
    pub sender: String,
    pub content: String,
    pub conv_id: String,
    pub seen: bool,
    #[serde(rename = "isImage")]
    pub is_image: bool,
    #[serde(rename = "createdAt")]
    pub created_at: String,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub members: Vec<UserSummary>,
    pub messages: Vec<MessageView>,
}

/// POST /api/messages
///
/// Multipart form: repeated `receiver`, `content` or `image`, optional
/// `conversationId`. Responds 201 with the conversation and message ids.
pub async fn send_message(
    State(state): State<AppState>,
    user: CurrentUser,
    multipart: Multipart,
) -> Result<(StatusCode, Json<SendReceipt>), ApiError> {
    let form = MessageForm::read(multipart, state.max_image_bytes).await?;
    if form.receivers.is_empty() && form.conversation_id.is_none() {
        return Err(ApiError::InvalidRequest("missing receiver field".into()));
    }

    let payload = form::build_payload(&state, form.content, form.image).await?;
    let request = SendRequest {
        sender_id: user.user_id,
        recipients: form.receivers,
        conversation_hint: form.conversation_id,
        payload: payload.clone(),
    };

    match send::send_direct_or_group_message(&state, request).await {
        Ok(receipt) => Ok((StatusCode::CREATED, Json(receipt))),
        Err(e) => {
            form::discard_payload(&state, &payload).await;
            Err(e)
        }
    }
}

/// GET /api/messages?convID=
///
/// Members and full history of a conversation the caller belongs to.
pub async fn get_messages(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let conv_id = query
        .conv_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::InvalidRequest("missing convID".into()))?;

    let db = state.db.clone();
    let response = tokio::task::spawn_blocking(move || -> Result<HistoryResponse, ApiError> {
        let conn = db
            .lock()
            .map_err(|_| ApiError::Internal("database lock poisoned".into()))?;

        if store::find_conversation(&conn, &conv_id)?.is_none() {
            return Err(ApiError::NotFound(format!("conversation {}", conv_id)));
        }
        if !store::is_member(&conn, &conv_id, &user.user_id)? {
            return Err(ApiError::Forbidden("not a member of this conversation".into()));
        }

        let members = store::conversation_members(&conn, &conv_id)?
            .iter()
            .map(|id| users::user_summary_or_default(&conn, id))
            .collect::<Result<Vec<_>, _>>()?;

        let messages = store::list_messages(&conn, &conv_id)?
            .into_iter()
            .map(|row| MessageView {
                is_image: MessageKind::from_i64(row.kind).is_image(),
                id: row.id,
                sender: row.sender_id,
                content: row.content,
                conv_id: row.conversation_id,
                seen: row.seen,
                created_at: row.created_at,
            })
            .collect();

        Ok(HistoryResponse { members, messages })
    })
    .await??;

    Ok(Json(response))
}
