use rusqlite::Connection;

use crate::db::now_rfc3339;

/// Create a group with its creator as the first roster member.
pub fn create_group(conn: &Connection, creator_id: &str, title: &str) -> rusqlite::Result<String> {
    let id = uuid::Uuid::now_v7().to_string();
    let now = now_rfc3339();
    conn.execute(
        "INSERT INTO groups (id, title, creator_id, created_at) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![id, title, creator_id, now],
    )?;
    join_group(conn, &id, creator_id)?;
    Ok(id)
}

/// Add a user to a group roster. Idempotent.
pub fn join_group(conn: &Connection, group_id: &str, user_id: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO group_members (group_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
        rusqlite::params![group_id, user_id, now_rfc3339()],
    )?;
    Ok(())
}

pub fn group_exists(conn: &Connection, group_id: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM groups WHERE id = ?1)",
        rusqlite::params![group_id],
        |row| row.get(0),
    )
}

pub fn is_group_member(conn: &Connection, group_id: &str, user_id: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM group_members WHERE group_id = ?1 AND user_id = ?2)",
        rusqlite::params![group_id, user_id],
        |row| row.get(0),
    )
}

/// Current roster of a group.
pub fn group_members(conn: &Connection, group_id: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT user_id FROM group_members WHERE group_id = ?1 ORDER BY joined_at, user_id",
    )?;
    let members = stmt
        .query_map(rusqlite::params![group_id], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(members)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use crate::directory::users::{create_user, NewUser};

    #[test]
    fn test_roster() {
        let db = open_in_memory().unwrap();
        let conn = db.lock().unwrap();
        let owner = create_user(&conn, &NewUser::named("O", "O")).unwrap();
        let other = create_user(&conn, &NewUser::named("P", "P")).unwrap();

        let gid = create_group(&conn, &owner, "Rustaceans").unwrap();
        assert!(group_exists(&conn, &gid).unwrap());
        assert!(is_group_member(&conn, &gid, &owner).unwrap());
        assert!(!is_group_member(&conn, &gid, &other).unwrap());

        join_group(&conn, &gid, &other).unwrap();
        join_group(&conn, &gid, &other).unwrap();
        let roster = group_members(&conn, &gid).unwrap();
        assert_eq!(roster.len(), 2);
        assert!(roster.contains(&other));
    }
}
