pub mod middleware;

pub use middleware::{resolve_session, session_token_from_headers, CurrentUser, SESSION_COOKIE};
