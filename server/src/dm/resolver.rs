//! Decides which conversation a send targets.
//!
//! Resolution order:
//! 1. A conversation id hint wins outright, provided the sender is a member.
//! 2. Recipients are normalized and every one of them must follow the sender.
//! 3. A single recipient reuses the pair's direct conversation when it exists.
//! 4. Otherwise a new conversation is created with the sender and recipients.
//!
//! All checks run before any write. Callers run this inside the same
//! transaction as the message append, so a failure leaves no rows behind.

use rusqlite::Connection;
use std::collections::HashSet;

use crate::directory::follows;
use crate::dm::store::{self, NewConversation};
use crate::error::ApiError;

/// Outcome of resolving a send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub conversation_id: String,
    /// True when this call created the conversation.
    pub created: bool,
}

/// Trim, drop blanks and the sender, de-duplicate preserving first occurrence.
pub fn normalize_recipients(sender_id: &str, recipients: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    recipients
        .iter()
        .map(|r| r.trim())
        .filter(|r| !r.is_empty() && *r != sender_id)
        .filter(|r| seen.insert(r.to_string()))
        .map(str::to_string)
        .collect()
}

/// Order-independent key identifying the direct conversation of a pair.
pub fn direct_key(a: &str, b: &str) -> String {
    if a <= b {
        format!("{}:{}", a, b)
    } else {
        format!("{}:{}", b, a)
    }
}

/// Resolve `(sender, recipients, hint)` to a conversation id, creating the
/// conversation when none applies.
pub fn resolve_conversation(
    conn: &Connection,
    sender_id: &str,
    recipients: &[String],
    hint: Option<&str>,
) -> Result<Resolution, ApiError> {
    if let Some(hint) = hint.map(str::trim).filter(|h| !h.is_empty()) {
        return resolve_hint(conn, sender_id, hint);
    }

    let recipients = normalize_recipients(sender_id, recipients);
    if recipients.is_empty() {
        return Err(ApiError::InvalidRequest("no valid recipient".into()));
    }

    for recipient in &recipients {
        if !follows::is_following(conn, recipient, sender_id)? {
            return Err(ApiError::Forbidden(format!(
                "{} does not follow the sender",
                recipient
            )));
        }
    }

    let mut members: Vec<&str> = Vec::with_capacity(recipients.len() + 1);
    members.push(sender_id);
    members.extend(recipients.iter().map(String::as_str));

    if let [recipient] = recipients.as_slice() {
        let key = direct_key(sender_id, recipient);
        if let Some(existing) = store::find_direct(conn, &key)? {
            return Ok(Resolution {
                conversation_id: existing,
                created: false,
            });
        }
        return create_direct(conn, &key, &members);
    }

    let conversation_id = store::insert_conversation(conn, &NewConversation::default())?
        .ok_or_else(|| ApiError::Internal("conversation insert was ignored".into()))?;
    store::add_members(conn, &conversation_id, &members)?;
    tracing::debug!(
        conversation_id = %conversation_id,
        members = members.len(),
        "Created conversation"
    );
    Ok(Resolution {
        conversation_id,
        created: true,
    })
}

fn resolve_hint(conn: &Connection, sender_id: &str, hint: &str) -> Result<Resolution, ApiError> {
    if store::find_conversation(conn, hint)?.is_none() {
        return Err(ApiError::NotFound(format!("conversation {}", hint)));
    }
    if !store::is_member(conn, hint, sender_id)? {
        return Err(ApiError::Unauthorized);
    }
    Ok(Resolution {
        conversation_id: hint.to_string(),
        created: false,
    })
}

/// Create the pair's direct conversation. If another writer got there first
/// the unique `direct_key` rejects the insert and the existing row is reused.
fn create_direct(conn: &Connection, key: &str, members: &[&str]) -> Result<Resolution, ApiError> {
    let new = NewConversation {
        is_direct: true,
        direct_key: Some(key),
        group_id: None,
    };
    match store::insert_conversation(conn, &new)? {
        Some(conversation_id) => {
            store::add_members(conn, &conversation_id, members)?;
            tracing::debug!(conversation_id = %conversation_id, "Created direct conversation");
            Ok(Resolution {
                conversation_id,
                created: true,
            })
        }
        None => {
            let existing = store::find_direct(conn, key)?.ok_or_else(|| {
                ApiError::Internal(format!("direct conversation {} vanished", key))
            })?;
            Ok(Resolution {
                conversation_id: existing,
                created: false,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use crate::directory::follows::follow;
    use crate::directory::users::{create_user, NewUser};

    fn users(conn: &Connection, n: usize) -> Vec<String> {
        (0..n)
            .map(|i| create_user(conn, &NewUser::named(&format!("U{}", i), "T")).unwrap())
            .collect()
    }

    fn count(conn: &Connection, table: &str) -> i64 {
        conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_normalize_recipients() {
        let raw = vec![
            " b ".to_string(),
            "".to_string(),
            "a".to_string(),
            "c".to_string(),
            "b".to_string(),
            "   ".to_string(),
        ];
        assert_eq!(normalize_recipients("a", &raw), vec!["b", "c"]);
    }

    #[test]
    fn test_direct_key_is_order_independent() {
        assert_eq!(direct_key("x", "y"), direct_key("y", "x"));
        assert_eq!(direct_key("x", "y"), "x:y");
    }

    #[test]
    fn test_creates_then_reuses_direct_conversation() {
        let db = open_in_memory().unwrap();
        let conn = db.lock().unwrap();
        let u = users(&conn, 2);
        follow(&conn, &u[1], &u[0]).unwrap();

        let first = resolve_conversation(&conn, &u[0], &[u[1].clone()], None).unwrap();
        assert!(first.created);

        let again = resolve_conversation(&conn, &u[0], &[u[1].clone(), u[0].clone()], None).unwrap();
        assert!(!again.created);
        assert_eq!(again.conversation_id, first.conversation_id);
        assert_eq!(count(&conn, "conversations"), 1);

        let members = store::conversation_members(&conn, &first.conversation_id).unwrap();
        assert_eq!(members.len(), 2);
    }

    #[test]
    fn test_empty_recipients_rejected() {
        let db = open_in_memory().unwrap();
        let conn = db.lock().unwrap();
        let u = users(&conn, 1);
        let err = resolve_conversation(&conn, &u[0], &[u[0].clone(), " ".into()], None).unwrap_err();
        assert!(matches!(err, ApiError::InvalidRequest(_)));
    }

    #[test]
    fn test_non_follower_is_forbidden_and_nothing_written() {
        let db = open_in_memory().unwrap();
        let conn = db.lock().unwrap();
        let u = users(&conn, 3);
        // u1 follows the sender, u2 does not; the sender following u2 is irrelevant
        follow(&conn, &u[1], &u[0]).unwrap();
        follow(&conn, &u[0], &u[2]).unwrap();

        let err = resolve_conversation(&conn, &u[0], &[u[1].clone(), u[2].clone()], None)
            .unwrap_err();
        match err {
            ApiError::Forbidden(msg) => assert!(msg.contains(&u[2])),
            other => panic!("expected Forbidden, got {:?}", other),
        }
        assert_eq!(count(&conn, "conversations"), 0);
        assert_eq!(count(&conn, "conversation_members"), 0);
    }

    #[test]
    fn test_multi_recipient_creates_non_direct() {
        let db = open_in_memory().unwrap();
        let conn = db.lock().unwrap();
        let u = users(&conn, 3);
        follow(&conn, &u[1], &u[0]).unwrap();
        follow(&conn, &u[2], &u[0]).unwrap();

        let recipients = vec![u[1].clone(), u[2].clone()];
        let first = resolve_conversation(&conn, &u[0], &recipients, None).unwrap();
        let conv = store::find_conversation(&conn, &first.conversation_id)
            .unwrap()
            .unwrap();
        assert!(!conv.is_direct);
        assert_eq!(
            store::conversation_members(&conn, &conv.id).unwrap().len(),
            3
        );

        // Multi-recipient sends without a hint always start a new conversation
        let second = resolve_conversation(&conn, &u[0], &recipients, None).unwrap();
        assert_ne!(second.conversation_id, first.conversation_id);
    }

    #[test]
    fn test_hint_requires_membership() {
        let db = open_in_memory().unwrap();
        let conn = db.lock().unwrap();
        let u = users(&conn, 3);
        follow(&conn, &u[1], &u[0]).unwrap();
        let conv = resolve_conversation(&conn, &u[0], &[u[1].clone()], None)
            .unwrap()
            .conversation_id;

        let via_hint = resolve_conversation(&conn, &u[1], &[], Some(conv.as_str())).unwrap();
        assert_eq!(via_hint.conversation_id, conv);
        assert!(!via_hint.created);

        assert!(matches!(
            resolve_conversation(&conn, &u[2], &[], Some(conv.as_str())),
            Err(ApiError::Unauthorized)
        ));
        assert!(matches!(
            resolve_conversation(&conn, &u[0], &[], Some("missing")),
            Err(ApiError::NotFound(_))
        ));
    }

    #[test]
    fn test_lost_race_reuses_existing_row() {
        let db = open_in_memory().unwrap();
        let conn = db.lock().unwrap();
        let u = users(&conn, 2);
        let key = direct_key(&u[0], &u[1]);
        let winner = store::insert_conversation(
            &conn,
            &NewConversation {
                is_direct: true,
                direct_key: Some(&key),
                group_id: None,
            },
        )
        .unwrap()
        .unwrap();

        let res = create_direct(&conn, &key, &[&u[0], &u[1]]).unwrap();
        assert_eq!(res.conversation_id, winner);
        assert!(!res.created);
    }
}
