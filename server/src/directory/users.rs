use rusqlite::{Connection, OptionalExtension};

use crate::db::models::UserSummary;
use crate::db::now_rfc3339;

/// Fields for a new account row.
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub username: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub avatar: Option<String>,
}

impl NewUser {
    pub fn named(first_name: &str, last_name: &str) -> Self {
        Self {
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            ..Default::default()
        }
    }
}

/// Insert a user and return the generated id.
pub fn create_user(conn: &Connection, user: &NewUser) -> rusqlite::Result<String> {
    let id = uuid::Uuid::now_v7().to_string();
    conn.execute(
        "INSERT INTO users (id, username, first_name, last_name, avatar, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            id,
            user.username,
            user.first_name,
            user.last_name,
            user.avatar,
            now_rfc3339(),
        ],
    )?;
    Ok(id)
}

/// Profile summary used to attribute messages. Missing username/avatar
/// come back as empty strings.
pub fn user_summary(conn: &Connection, user_id: &str) -> rusqlite::Result<Option<UserSummary>> {
    conn.query_row(
        "SELECT id, username, last_name, first_name, avatar FROM users WHERE id = ?1",
        rusqlite::params![user_id],
        |row| {
            Ok(UserSummary {
                id: row.get(0)?,
                username: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                last_name: row.get(2)?,
                first_name: row.get(3)?,
                profile_pic: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
            })
        },
    )
    .optional()
}

/// Like [`user_summary`], falling back to a bare summary carrying only the id.
pub fn user_summary_or_default(conn: &Connection, user_id: &str) -> rusqlite::Result<UserSummary> {
    Ok(user_summary(conn, user_id)?.unwrap_or_else(|| UserSummary {
        id: user_id.to_string(),
        ..Default::default()
    }))
}
