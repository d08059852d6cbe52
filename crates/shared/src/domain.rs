use std::{fmt, sync::Arc};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ImageDecodeError;

pub const DEFAULT_IMAGE_MIME_TYPE: &str = "image/png";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// An encoded image as returned by the provider. Immutable once built; clones
/// share the same byte buffer.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "ImagePayload", try_from = "ImagePayload")]
pub struct Image {
    mime_type: String,
    bytes: Arc<[u8]>,
}

impl Image {
    pub fn new(mime_type: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            mime_type: mime_type.into(),
            bytes: bytes.into(),
        }
    }

    pub fn from_base64(
        mime_type: impl Into<String>,
        data_b64: &str,
    ) -> Result<Self, ImageDecodeError> {
        let bytes = STANDARD.decode(data_b64.trim())?;
        Ok(Self::new(mime_type, bytes))
    }

    /// Parses `data:<mime>;base64,<payload>`. A header without a mime type
    /// falls back to `image/png`.
    pub fn from_data_url(data_url: &str) -> Result<Self, ImageDecodeError> {
        let (header, payload) = data_url
            .split_once(',')
            .ok_or(ImageDecodeError::MissingSeparator)?;
        let mime_type = header
            .split_once(':')
            .and_then(|(_, rest)| rest.split_once(';'))
            .map(|(mime, _)| mime)
            .filter(|mime| !mime.is_empty())
            .unwrap_or(DEFAULT_IMAGE_MIME_TYPE);
        Self::from_base64(mime_type, payload)
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.to_base64())
    }

    pub fn file_extension(&self) -> &'static str {
        match self.mime_type.to_ascii_lowercase().as_str() {
            "image/jpeg" | "image/jpg" => "jpg",
            "image/webp" => "webp",
            "image/gif" => "gif",
            _ => "png",
        }
    }
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("mime_type", &self.mime_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ImagePayload {
    mime_type: String,
    data_b64: String,
}

impl From<Image> for ImagePayload {
    fn from(value: Image) -> Self {
        Self {
            data_b64: value.to_base64(),
            mime_type: value.mime_type,
        }
    }
}

impl TryFrom<ImagePayload> for Image {
    type Error = ImageDecodeError;

    fn try_from(value: ImagePayload) -> Result<Self, Self::Error> {
        Image::from_base64(value.mime_type, &value.data_b64)
    }
}

#[cfg(test)]
#[path = "tests/domain_tests.rs"]
mod tests;
