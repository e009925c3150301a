//! Group chat: the same persist-then-dispatch path as conversations, with
//! membership taken from the group roster.
//!
//! A group's chat stream lives in its own conversation row, minted on the
//! first message and bound to the group by the unique `conversations.group_id`.

use rusqlite::Connection;

use crate::directory::{groups, users};
use crate::dm::payload::MessagePayload;
use crate::dm::send::SendReceipt;
use crate::dm::store::{self, NewConversation};
use crate::error::ApiError;
use crate::state::AppState;
use crate::ws::protocol::{GroupMessageEnvelope, ServerEvent};

#[derive(Debug, Clone)]
pub struct GroupSendRequest {
    pub sender_id: String,
    pub group_id: String,
    pub payload: MessagePayload,
}

/// Check that `group_id` exists and `user_id` is on its roster.
pub fn ensure_group_member(conn: &Connection, group_id: &str, user_id: &str) -> Result<(), ApiError> {
    if !groups::group_exists(conn, group_id)? {
        return Err(ApiError::NotFound(format!("group {}", group_id)));
    }
    if !groups::is_group_member(conn, group_id, user_id)? {
        return Err(ApiError::Forbidden("not a member of this group".into()));
    }
    Ok(())
}

/// The conversation carrying a group's chat, created on first use.
pub fn group_conversation(conn: &Connection, group_id: &str) -> Result<String, ApiError> {
    if let Some(existing) = store::find_group_conversation(conn, group_id)? {
        return Ok(existing);
    }
    let new = NewConversation {
        is_direct: false,
        direct_key: None,
        group_id: Some(group_id),
    };
    match store::insert_conversation(conn, &new)? {
        Some(id) => {
            tracing::debug!(group_id = %group_id, conversation_id = %id, "Created group conversation");
            Ok(id)
        }
        None => store::find_group_conversation(conn, group_id)?.ok_or_else(|| {
            ApiError::Internal(format!("group conversation for {} vanished", group_id))
        }),
    }
}

/// Persist a group message and deliver it to every connected roster member.
pub async fn send_group_message(
    state: &AppState,
    req: GroupSendRequest,
) -> Result<SendReceipt, ApiError> {
    let db = state.db.clone();
    let payload = req.payload.clone();
    let group_id = req.group_id.clone();

    let (stored, roster, sender) = tokio::task::spawn_blocking(move || {
        let mut conn = db
            .lock()
            .map_err(|_| ApiError::Internal("database lock poisoned".into()))?;
        let tx = conn.transaction()?;

        ensure_group_member(&tx, &req.group_id, &req.sender_id)?;
        let conversation_id = group_conversation(&tx, &req.group_id)?;
        let stored = store::append_message(&tx, &conversation_id, &req.sender_id, &req.payload)?;
        let roster = groups::group_members(&tx, &req.group_id)?;
        let sender = users::user_summary_or_default(&tx, &req.sender_id)?;

        tx.commit()?;
        Ok::<_, ApiError>((stored, roster, sender))
    })
    .await??;

    let receipt = SendReceipt {
        conversation_id: stored.conversation_id.clone(),
        message_id: stored.id.clone(),
    };

    let event = ServerEvent::GroupMessage(GroupMessageEnvelope {
        sender,
        content: payload.content().to_string(),
        conv_id: stored.conversation_id,
        group_id: group_id.clone(),
        message_id: stored.id,
        is_image: payload.kind().is_image(),
        time: stored.created_at,
    });
    let report = state.hub.dispatch(&roster, &event).await;

    tracing::debug!(
        group_id = %group_id,
        message_id = %receipt.message_id,
        delivered = report.delivered,
        failed = report.failed,
        offline = report.offline,
        "Group message dispatched"
    );

    Ok(receipt)
}
