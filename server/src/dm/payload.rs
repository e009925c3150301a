use crate::error::ApiError;

/// Stored discriminator of a message body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text = 0,
    Image = 1,
}

impl MessageKind {
    pub fn as_i64(self) -> i64 {
        self as i64
    }

    /// Unknown values read back as text.
    pub fn from_i64(value: i64) -> Self {
        if value == MessageKind::Image as i64 {
            MessageKind::Image
        } else {
            MessageKind::Text
        }
    }

    pub fn is_image(self) -> bool {
        self == MessageKind::Image
    }
}

/// Body of a message: inline text or the name of a stored image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessagePayload {
    Text(String),
    Image(String),
}

impl MessagePayload {
    /// Build a payload from optional text and an optional stored image
    /// reference. Exactly one must be present; blank text counts as absent.
    pub fn from_parts(text: Option<String>, image_ref: Option<String>) -> Result<Self, ApiError> {
        let text = text
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        match (text, image_ref) {
            (Some(text), None) => Ok(MessagePayload::Text(text)),
            (None, Some(image)) => Ok(MessagePayload::Image(image)),
            (Some(_), Some(_)) => Err(ApiError::InvalidRequest(
                "only one of content or image is allowed".into(),
            )),
            (None, None) => Err(ApiError::InvalidRequest(
                "either content or an image is required".into(),
            )),
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            MessagePayload::Text(_) => MessageKind::Text,
            MessagePayload::Image(_) => MessageKind::Image,
        }
    }

    /// The text, or the image reference, as stored in `messages.content`.
    pub fn content(&self) -> &str {
        match self {
            MessagePayload::Text(text) | MessagePayload::Image(text) => text,
        }
    }
}
