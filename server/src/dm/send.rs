//! Send path: resolve, persist, then dispatch.
//!
//! Resolution and the message append share one SQLite transaction, committed
//! before anything is pushed to a socket. Dispatch is best-effort and never
//! fails the send.

use serde::Serialize;

use crate::directory::users;
use crate::dm::payload::MessagePayload;
use crate::dm::resolver;
use crate::dm::store;
use crate::error::ApiError;
use crate::state::AppState;
use crate::ws::protocol::{PrivateMessageEnvelope, ServerEvent};

/// A message addressed to recipients or to an existing conversation.
#[derive(Debug, Clone)]
pub struct SendRequest {
    pub sender_id: String,
    pub recipients: Vec<String>,
    pub conversation_hint: Option<String>,
    pub payload: MessagePayload,
}

/// Identifiers of a persisted message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendReceipt {
    #[serde(rename = "conversationId")]
    pub conversation_id: String,
    #[serde(rename = "messageId")]
    pub message_id: String,
}

/// Persist a message into the resolved conversation and deliver it to every
/// connected member, the sender's other devices included.
pub async fn send_direct_or_group_message(
    state: &AppState,
    req: SendRequest,
) -> Result<SendReceipt, ApiError> {
    let db = state.db.clone();
    let payload = req.payload.clone();

    let (stored, members, sender) = tokio::task::spawn_blocking(move || {
        let mut conn = db
            .lock()
            .map_err(|_| ApiError::Internal("database lock poisoned".into()))?;
        let tx = conn.transaction()?;

        let resolution = resolver::resolve_conversation(
            &tx,
            &req.sender_id,
            &req.recipients,
            req.conversation_hint.as_deref(),
        )?;
        let stored =
            store::append_message(&tx, &resolution.conversation_id, &req.sender_id, &req.payload)?;
        let members = store::conversation_members(&tx, &resolution.conversation_id)?;
        let sender = users::user_summary_or_default(&tx, &req.sender_id)?;

        tx.commit()?;
        Ok::<_, ApiError>((stored, members, sender))
    })
    .await??;

    let receipt = SendReceipt {
        conversation_id: stored.conversation_id.clone(),
        message_id: stored.id.clone(),
    };

    let event = ServerEvent::PrivateMessage(PrivateMessageEnvelope {
        sender,
        content: payload.content().to_string(),
        conv_id: stored.conversation_id,
        message_id: stored.id,
        is_image: payload.kind().is_image(),
        time: stored.created_at,
    });
    let report = state.hub.dispatch(&members, &event).await;

    tracing::debug!(
        conversation_id = %receipt.conversation_id,
        message_id = %receipt.message_id,
        delivered = report.delivered,
        failed = report.failed,
        offline = report.offline,
        "Message dispatched"
    );

    Ok(receipt)
}
