use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
};

use crate::db::DbPool;
use crate::directory::sessions;
use crate::error::ApiError;
use crate::state::AppState;

/// Name of the cookie carrying the session token.
pub const SESSION_COOKIE: &str = "session_id";

/// Pull a session token out of the `session_id` cookie or, failing that, an
/// `Authorization: Bearer` header.
pub fn session_token_from_headers(headers: &HeaderMap) -> Option<String> {
    let from_cookie = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, token)| token.trim().to_string())
        .filter(|token| !token.is_empty());

    from_cookie.or_else(|| {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty())
    })
}

/// Resolve a session token to its user id on the blocking pool.
pub async fn resolve_session(db: &DbPool, token: String) -> Result<Option<String>, ApiError> {
    let db = db.clone();
    tokio::task::spawn_blocking(move || -> Result<Option<String>, ApiError> {
        let conn = db
            .lock()
            .map_err(|_| ApiError::Internal("database lock poisoned".into()))?;
        Ok(sessions::resolve_session_user(&conn, &token)?)
    })
    .await?
}

/// The authenticated caller of an HTTP request.
///
/// Implements axum's FromRequestParts; rejects with `Unauthorized` when no
/// token is present or the token does not resolve.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub user_id: String,
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = session_token_from_headers(&parts.headers).ok_or(ApiError::Unauthorized)?;
        let user_id = resolve_session(&state.db, token)
            .await?
            .ok_or(ApiError::Unauthorized)?;
        Ok(CurrentUser { user_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_token_from_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; session_id=abc-123; lang=en"),
        );
        assert_eq!(session_token_from_headers(&headers).as_deref(), Some("abc-123"));
    }

    #[test]
    fn test_cookie_wins_over_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("session_id=from-cookie"));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));
        assert_eq!(
            session_token_from_headers(&headers).as_deref(),
            Some("from-cookie")
        );
    }

    #[test]
    fn test_bearer_fallback_and_missing() {
        let mut headers = HeaderMap::new();
        assert_eq!(session_token_from_headers(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic xyz"));
        assert_eq!(session_token_from_headers(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer tok"));
        assert_eq!(session_token_from_headers(&headers).as_deref(), Some("tok"));
    }

    #[test]
    fn test_empty_cookie_value_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("session_id="));
        assert_eq!(session_token_from_headers(&headers), None);
    }

    #[tokio::test]
    async fn test_resolve_session_against_db() {
        let db = crate::db::open_in_memory().unwrap();
        let token = {
            let conn = db.lock().unwrap();
            let uid = crate::directory::users::create_user(
                &conn,
                &crate::directory::users::NewUser::named("Ada", "L"),
            )
            .unwrap();
            sessions::create_session(&conn, &uid).unwrap()
        };
        assert!(resolve_session(&db, token).await.unwrap().is_some());
        assert!(resolve_session(&db, "nope".into()).await.unwrap().is_none());
    }
}
