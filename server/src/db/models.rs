//! Row types for the messaging tables.
//! These correspond to the SQLite schema defined in migrations.rs.

use serde::Serialize;

/// Attribution data for a user, as shown next to their messages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UserSummary {
    pub id: String,
    pub username: String,
    pub last_name: String,
    pub first_name: String,
    pub profile_pic: String,
}

/// Conversation row.
#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: String,
    pub is_direct: bool,
    pub group_id: Option<String>,
    pub created_at: String,
}

/// Persisted message row.
#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    /// 0 = text, 1 = image
    pub kind: i64,
    pub seen: bool,
    pub created_at: String,
}
