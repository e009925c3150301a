//! Message image storage on the local filesystem.
//!
//! Images are stored as `{data_dir}/images/messages/{uuid}.{ext}`. The file
//! name is the reference persisted in the message row.

use std::path::{Path, PathBuf};

use crate::error::ApiError;

/// Image formats accepted for messages, detected from the leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Gif,
    Jpeg,
}

impl ImageFormat {
    /// Sniff the format from magic bytes. Declared content types and file
    /// names are not trusted.
    pub fn detect(data: &[u8]) -> Option<Self> {
        if data.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
            Some(ImageFormat::Png)
        } else if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
            Some(ImageFormat::Gif)
        } else if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(ImageFormat::Jpeg)
        } else {
            None
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Gif => "gif",
            ImageFormat::Jpeg => "jpg",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Gif => "image/gif",
            ImageFormat::Jpeg => "image/jpeg",
        }
    }

    fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "png" => Some(ImageFormat::Png),
            "gif" => Some(ImageFormat::Gif),
            "jpg" | "jpeg" => Some(ImageFormat::Jpeg),
            _ => None,
        }
    }
}

/// Directory holding message images below the data directory.
pub fn message_images_dir(data_dir: &str) -> PathBuf {
    Path::new(data_dir).join("images").join("messages")
}

/// Validate and write an image, returning its stored name.
///
/// The size cap is checked before anything touches the disk.
pub fn store_image(dir: &Path, data: &[u8], max_bytes: usize) -> Result<String, ApiError> {
    if data.len() > max_bytes {
        return Err(ApiError::PayloadTooLarge {
            size: data.len(),
            max: max_bytes,
        });
    }
    if data.is_empty() {
        return Err(ApiError::InvalidRequest("empty image".into()));
    }
    let format = ImageFormat::detect(data)
        .ok_or_else(|| ApiError::InvalidRequest("unsupported image type".into()))?;

    std::fs::create_dir_all(dir)?;
    let name = format!("{}.{}", uuid::Uuid::new_v4(), format.extension());
    std::fs::write(dir.join(&name), data)?;

    tracing::debug!(name = %name, size = data.len(), "Stored message image");
    Ok(name)
}

/// Parse a stored image name. Only names this module could have produced are
/// accepted, which rules out path traversal.
pub fn parse_image_name(name: &str) -> Option<ImageFormat> {
    let (stem, ext) = name.rsplit_once('.')?;
    uuid::Uuid::parse_str(stem).ok()?;
    ImageFormat::from_extension(ext)
}

/// Read a stored image. `Ok(None)` when the name is invalid or missing.
pub fn read_image(dir: &Path, name: &str) -> Result<Option<(ImageFormat, Vec<u8>)>, ApiError> {
    let Some(format) = parse_image_name(name) else {
        return Ok(None);
    };
    match std::fs::read(dir.join(name)) {
        Ok(data) => Ok(Some((format, data))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
