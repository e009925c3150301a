//! Multipart parsing shared by the direct and group send endpoints.

use axum::extract::multipart::MultipartError;
use axum::extract::Multipart;
use axum::http::StatusCode;

use crate::dm::payload::MessagePayload;
use crate::error::ApiError;
use crate::media;
use crate::state::AppState;

/// Fields of a send form. Unknown fields are ignored.
#[derive(Debug, Default)]
pub struct MessageForm {
    /// Every `receiver` (or `receiver[]`) field, in order.
    pub receivers: Vec<String>,
    pub content: Option<String>,
    pub conversation_id: Option<String>,
    pub group_id: Option<String>,
    /// Raw bytes of the `image` file field. An empty file part counts as absent.
    pub image: Option<Vec<u8>>,
}

impl MessageForm {
    /// Read the whole form, refusing image data beyond `max_image_bytes`.
    pub async fn read(mut multipart: Multipart, max_image_bytes: usize) -> Result<Self, ApiError> {
        let mut form = MessageForm::default();

        while let Some(mut field) = multipart
            .next_field()
            .await
            .map_err(|e| multipart_error(e, 0, max_image_bytes))?
        {
            let name = field.name().unwrap_or("").to_string();
            match name.as_str() {
                "image" => {
                    let mut data = Vec::new();
                    while let Some(chunk) = field
                        .chunk()
                        .await
                        .map_err(|e| multipart_error(e, data.len(), max_image_bytes))?
                    {
                        data.extend_from_slice(&chunk);
                        if data.len() > max_image_bytes {
                            return Err(ApiError::PayloadTooLarge {
                                size: data.len(),
                                max: max_image_bytes,
                            });
                        }
                    }
                    if !data.is_empty() {
                        form.image = Some(data);
                    }
                }
                "receiver" | "receiver[]" => {
                    form.receivers.push(text_field(field).await?);
                }
                "content" => form.content = Some(text_field(field).await?),
                "conversationId" => form.conversation_id = non_blank(text_field(field).await?),
                "groupID" => form.group_id = non_blank(text_field(field).await?),
                other => {
                    tracing::debug!(field = %other, "Ignoring unknown form field");
                }
            }
        }

        Ok(form)
    }
}

async fn text_field(field: axum::extract::multipart::Field<'_>) -> Result<String, ApiError> {
    field
        .text()
        .await
        .map_err(|e| ApiError::InvalidRequest(format!("Failed to read field: {}", e)))
}

fn non_blank(value: String) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn multipart_error(err: MultipartError, read: usize, max: usize) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge {
            size: read.max(max + 1),
            max,
        }
    } else {
        ApiError::InvalidRequest(format!("Multipart error: {}", err.body_text()))
    }
}

/// Turn form content into a payload, storing the image when there is one.
///
/// The text/image exclusivity check runs before the image is written.
pub async fn build_payload(
    state: &AppState,
    content: Option<String>,
    image: Option<Vec<u8>>,
) -> Result<MessagePayload, ApiError> {
    let Some(data) = image else {
        return MessagePayload::from_parts(content, None);
    };
    MessagePayload::from_parts(content.clone(), Some(String::new()))?;

    let dir = state.images_dir.clone();
    let max = state.max_image_bytes;
    let name = tokio::task::spawn_blocking(move || media::store_image(&dir, &data, max)).await??;
    MessagePayload::from_parts(content, Some(name))
}

/// Remove the stored image of a payload whose send failed.
pub async fn discard_payload(state: &AppState, payload: &MessagePayload) {
    if let MessagePayload::Image(name) = payload {
        let path = state.images_dir.join(name);
        if let Err(e) = tokio::fs::remove_file(&path).await {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove orphaned image");
        }
    }
}
