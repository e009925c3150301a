//! REST endpoints for group chat.

use axum::{
    extract::{Multipart, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::auth::CurrentUser;
use crate::chat::group::{self, GroupSendRequest};
use crate::db::models::UserSummary;
use crate::directory::users;
use crate::dm::form::{self, MessageForm};
use crate::dm::send::SendReceipt;
use crate::dm::store;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct GroupHistoryQuery {
    #[serde(rename = "groupID")]
    pub group_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GroupMessageView {
    pub id: String,
    pub group_id: String,
    pub sender_id: String,
    pub content: String,
    /// 0 = text, 1 = image
    #[serde(rename = "type")]
    pub kind: i64,
    pub created_at: String,
    pub sender: UserSummary,
}

/// POST /api/messages/group
///
/// Multipart form: `groupID`, then `content` or `image`.
pub async fn send_group_message(
    State(state): State<AppState>,
    user: CurrentUser,
    multipart: Multipart,
) -> Result<(StatusCode, Json<SendReceipt>), ApiError> {
    let form = MessageForm::read(multipart, state.max_image_bytes).await?;
    let group_id = form
        .group_id
        .ok_or_else(|| ApiError::InvalidRequest("missing groupID field".into()))?;

    let payload = form::build_payload(&state, form.content, form.image).await?;
    let request = GroupSendRequest {
        sender_id: user.user_id,
        group_id,
        payload: payload.clone(),
    };

    match group::send_group_message(&state, request).await {
        Ok(receipt) => Ok((StatusCode::CREATED, Json(receipt))),
        Err(e) => {
            form::discard_payload(&state, &payload).await;
            Err(e)
        }
    }
}

/// GET /api/messages/group?groupID=
pub async fn get_group_messages(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<GroupHistoryQuery>,
) -> Result<Json<Vec<GroupMessageView>>, ApiError> {
    let group_id = query
        .group_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::InvalidRequest("missing groupID field".into()))?;

    let db = state.db.clone();
    let messages = tokio::task::spawn_blocking(move || -> Result<Vec<GroupMessageView>, ApiError> {
        let conn = db
            .lock()
            .map_err(|_| ApiError::Internal("database lock poisoned".into()))?;
        group::ensure_group_member(&conn, &group_id, &user.user_id)?;

        let Some(conv_id) = store::find_group_conversation(&conn, &group_id)? else {
            return Ok(Vec::new());
        };

        store::list_messages(&conn, &conv_id)?
            .into_iter()
            .map(|row| -> Result<GroupMessageView, ApiError> {
                Ok(GroupMessageView {
                    sender: users::user_summary_or_default(&conn, &row.sender_id)?,
                    id: row.id,
                    group_id: group_id.clone(),
                    sender_id: row.sender_id,
                    content: row.content,
                    kind: row.kind,
                    created_at: row.created_at,
                })
            })
            .collect()
    })
    .await??;

    Ok(Json(messages))
}
