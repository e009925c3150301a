use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::Response,
};
use serde::Deserialize;

use crate::auth;
use crate::state::AppState;
use crate::ws::actor;

/// Query parameters for the WebSocket upgrade. Browsers cannot attach headers
/// to a WebSocket handshake, so the token may ride in `?token=`.
#[derive(Debug, Default, Deserialize)]
pub struct WsAuthQuery {
    pub token: Option<String>,
}

/// Close code sent when the session token does not resolve.
pub const CLOSE_INVALID_SESSION: u16 = 4001;

/// GET /ws
///
/// Resolves the caller from `?token=`, the session cookie or a bearer header.
/// On failure the socket is upgraded and immediately closed, so it never
/// reaches the hub.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsAuthQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let token = params
        .token
        .filter(|token| !token.is_empty())
        .or_else(|| auth::session_token_from_headers(&headers));

    let resolved = match token {
        Some(token) => auth::resolve_session(&state.db, token).await,
        None => Ok(None),
    };

    match resolved {
        Ok(Some(user_id)) => {
            tracing::info!(user_id = %user_id, "WebSocket connection authenticated");
            ws.on_upgrade(move |socket| actor::run_connection(socket, state, user_id))
        }
        Ok(None) => {
            tracing::warn!(close_code = CLOSE_INVALID_SESSION, "WebSocket auth failed");
            ws.on_upgrade(|socket| reject(socket, CLOSE_INVALID_SESSION, "Invalid session"))
        }
        Err(e) => {
            tracing::error!(error = %e, "Session lookup failed during upgrade");
            ws.on_upgrade(|socket| reject(socket, close_code::ERROR, "Internal error"))
        }
    }
}

async fn reject(mut socket: WebSocket, code: u16, reason: &'static str) {
    let frame = CloseFrame {
        code,
        reason: reason.into(),
    };
    let _ = socket.send(Message::Close(Some(frame))).await;
}
