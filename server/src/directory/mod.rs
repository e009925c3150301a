//! Lookups the messaging core consumes from the rest of the social network.
//!
//! Each function is a narrow, synchronous query on a borrowed connection so it
//! can run inside the caller's `spawn_blocking` section and, where needed, the
//! caller's transaction. The `create_*`/`follow`/`join_group` writers are the
//! seeding side of the same tables (account and group management live outside
//! this crate).

pub mod follows;
pub mod groups;
pub mod sessions;
pub mod users;
