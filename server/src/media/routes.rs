use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
};

use crate::auth::CurrentUser;
use crate::error::ApiError;
use crate::media::store;
use crate::state::AppState;

/// GET /api/images/messages/{name}
///
/// Serve a stored message image with its sniffed content type.
pub async fn get_message_image(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(name): Path<String>,
) -> Result<(StatusCode, HeaderMap, Vec<u8>), ApiError> {
    let dir = state.images_dir.clone();
    let lookup = name.clone();
    let found = tokio::task::spawn_blocking(move || store::read_image(&dir, &lookup)).await??;

    let (format, data) = found.ok_or_else(|| ApiError::NotFound(format!("image {}", name)))?;
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(format.content_type()),
    );
    Ok((StatusCode::OK, headers, data))
}
