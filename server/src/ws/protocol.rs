//! JSON frames exchanged over the WebSocket.
//!
//! Server-to-client traffic is a closed set of [`ServerEvent`]s tagged by
//! `type`. Clients may only send [`ClientFrame`]s; anything else is logged and
//! dropped, never rebroadcast.

use axum::extract::ws::Message;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::models::UserSummary;
use crate::ws::ConnectionHandle;

/// A persisted direct/conversation message projected for live delivery.
#[derive(Debug, Clone, Serialize)]
pub struct PrivateMessageEnvelope {
    pub sender: UserSummary,
    pub content: String,
    #[serde(rename = "convId")]
    pub conv_id: String,
    #[serde(rename = "messageId")]
    pub message_id: String,
    #[serde(rename = "isImage")]
    pub is_image: bool,
    pub time: DateTime<Utc>,
}

/// A persisted group chat message projected for live delivery.
#[derive(Debug, Clone, Serialize)]
pub struct GroupMessageEnvelope {
    pub sender: UserSummary,
    pub content: String,
    #[serde(rename = "convId")]
    pub conv_id: String,
    #[serde(rename = "groupId")]
    pub group_id: String,
    #[serde(rename = "messageId")]
    pub message_id: String,
    #[serde(rename = "isImage")]
    pub is_image: bool,
    pub time: DateTime<Utc>,
}

/// Everything the server pushes to a live connection.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    PrivateMessage(PrivateMessageEnvelope),
    GroupMessage(GroupMessageEnvelope),
    Presence {
        #[serde(rename = "userId")]
        user_id: String,
        online: bool,
    },
    Pong,
}

impl ServerEvent {
    /// Serialize into a text frame.
    pub fn to_frame(&self) -> Result<Message, serde_json::Error> {
        let json = serde_json::to_string(self)?;
        Ok(Message::Text(json.into()))
    }
}

/// Frames a client may send.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Ping,
}

/// Handle an inbound text frame from `conn`.
pub fn handle_text_frame(text: &str, conn: &ConnectionHandle) {
    match serde_json::from_str::<ClientFrame>(text) {
        Ok(ClientFrame::Ping) => {
            if let Ok(frame) = ServerEvent::Pong.to_frame() {
                if let Err(e) = conn.try_send(frame) {
                    tracing::debug!(
                        user_id = %conn.user_id(),
                        conn_id = conn.id(),
                        error = %e,
                        "Dropped pong reply"
                    );
                }
            }
        }
        Err(_) => {
            tracing::debug!(
                user_id = %conn.user_id(),
                conn_id = conn.id(),
                "Ignoring unrecognized client frame: {}",
                text.chars().take(100).collect::<String>()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sender() -> UserSummary {
        UserSummary {
            id: "u1".into(),
            username: "ada".into(),
            last_name: "Lovelace".into(),
            first_name: "Ada".into(),
            profile_pic: String::new(),
        }
    }

    fn frame_json(event: &ServerEvent) -> serde_json::Value {
        match event.to_frame().unwrap() {
            Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
            other => panic!("expected text frame, got {:?}", other),
        }
    }

    #[test]
    fn test_private_message_wire_shape() {
        let time = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let event = ServerEvent::PrivateMessage(PrivateMessageEnvelope {
            sender: sender(),
            content: "hello".into(),
            conv_id: "c1".into(),
            message_id: "m1".into(),
            is_image: false,
            time,
        });
        let json = frame_json(&event);
        assert_eq!(json["type"], "private_message");
        assert_eq!(json["sender"]["first_name"], "Ada");
        assert_eq!(json["sender"]["profile_pic"], "");
        assert_eq!(json["content"], "hello");
        assert_eq!(json["convId"], "c1");
        assert_eq!(json["time"], "2024-05-01T12:00:00Z");
    }

    #[test]
    fn test_group_message_carries_group_fields() {
        let event = ServerEvent::GroupMessage(GroupMessageEnvelope {
            sender: sender(),
            content: "pic.png".into(),
            conv_id: "c1".into(),
            group_id: "g1".into(),
            message_id: "m1".into(),
            is_image: true,
            time: Utc::now(),
        });
        let json = frame_json(&event);
        assert_eq!(json["type"], "group_message");
        assert_eq!(json["groupId"], "g1");
        assert_eq!(json["messageId"], "m1");
        assert_eq!(json["isImage"], true);
    }

    #[test]
    fn test_presence_and_pong() {
        let json = frame_json(&ServerEvent::Presence {
            user_id: "u1".into(),
            online: true,
        });
        assert_eq!(json["type"], "presence");
        assert_eq!(json["userId"], "u1");
        assert_eq!(frame_json(&ServerEvent::Pong)["type"], "pong");
    }

    #[test]
    fn test_client_ping_gets_pong() {
        let (conn, mut outlet) = ConnectionHandle::new("u1", 4);
        handle_text_frame(r#"{"type":"ping"}"#, &conn);
        handle_text_frame("not json", &conn);
        handle_text_frame(r#"{"type":"private_message"}"#, &conn);

        let reply = outlet.rx.try_recv().unwrap();
        assert_eq!(reply, Message::Text(r#"{"type":"pong"}"#.into()));
        assert!(outlet.rx.try_recv().is_err());
    }
}
