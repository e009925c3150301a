use axum::{routing::get, Router};

use crate::chat::messages as group_messages;
use crate::dm::{conversations, messages};
use crate::media::routes as media_routes;
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // Message endpoints carry multipart images; raise the body limit to fit them
    let message_routes = Router::new()
        .route(
            "/api/messages",
            get(messages::get_messages).post(messages::send_message),
        )
        .route(
            "/api/messages/group",
            get(group_messages::get_group_messages).post(group_messages::send_group_message),
        )
        .layer(messages::message_body_limit(state.max_image_bytes));

    let read_routes = Router::new()
        .route("/api/conversations", get(conversations::get_conversations))
        .route(
            "/api/images/messages/{name}",
            get(media_routes::get_message_image),
        );

    // WebSocket endpoint (session from ?token=, cookie or bearer header)
    let ws_routes = Router::new().route("/ws", get(ws_handler::ws_upgrade));

    // Health check
    let health = Router::new().route("/health", get(health_check));

    Router::new()
        .merge(message_routes)
        .merge(read_routes)
        .merge(ws_routes)
        .merge(health)
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
