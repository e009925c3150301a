use rusqlite::{Connection, OptionalExtension};

use crate::db::now_rfc3339;

/// Resolve a session token to the owning user id.
///
/// Returns `Ok(None)` for unknown or empty tokens.
pub fn resolve_session_user(
    conn: &Connection,
    session_token: &str,
) -> rusqlite::Result<Option<String>> {
    if session_token.is_empty() {
        return Ok(None);
    }
    conn.query_row(
        "SELECT user_id FROM sessions WHERE session_id = ?1",
        rusqlite::params![session_token],
        |row| row.get(0),
    )
    .optional()
}

/// Create a session for a user and return its token.
pub fn create_session(conn: &Connection, user_id: &str) -> rusqlite::Result<String> {
    let token = uuid::Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO sessions (session_id, user_id, created_at) VALUES (?1, ?2, ?3)",
        rusqlite::params![token, user_id, now_rfc3339()],
    )?;
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use crate::directory::users::{create_user, NewUser};

    #[test]
    fn test_session_roundtrip() {
        let db = open_in_memory().unwrap();
        let conn = db.lock().unwrap();
        let uid = create_user(&conn, &NewUser::named("Ada", "Lovelace")).unwrap();

        let token = create_session(&conn, &uid).unwrap();
        assert_eq!(
            resolve_session_user(&conn, &token).unwrap().as_deref(),
            Some(uid.as_str())
        );
        assert_eq!(resolve_session_user(&conn, "not-a-token").unwrap(), None);
    }

    #[test]
    fn test_empty_token_never_resolves() {
        let db = open_in_memory().unwrap();
        let conn = db.lock().unwrap();
        assert_eq!(resolve_session_user(&conn, "").unwrap(), None);
    }
}
