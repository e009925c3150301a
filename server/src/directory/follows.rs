use rusqlite::Connection;

use crate::db::now_rfc3339;

/// Whether `follower_id` follows `followee_id`.
pub fn is_following(
    conn: &Connection,
    follower_id: &str,
    followee_id: &str,
) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM follows WHERE follower_id = ?1 AND followee_id = ?2)",
        rusqlite::params![follower_id, followee_id],
        |row| row.get(0),
    )
}

/// Record that `follower_id` follows `followee_id`. Idempotent.
pub fn follow(conn: &Connection, follower_id: &str, followee_id: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO follows (follower_id, followee_id, created_at) VALUES (?1, ?2, ?3)",
        rusqlite::params![follower_id, followee_id, now_rfc3339()],
    )?;
    Ok(())
}
