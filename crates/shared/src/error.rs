use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Generation,
    Editing,
}

impl FailureKind {
    pub fn summary(self) -> &'static str {
        match self {
            FailureKind::Generation => "Failed to generate image",
            FailureKind::Editing => "Failed to edit image",
        }
    }
}

/// A provider failure as shown to the user. Held by the session until it is
/// dismissed or a new request starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{message}")]
pub struct SessionFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl SessionFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Folds an opaque provider error into the user-facing message for `kind`.
    pub fn from_provider(kind: FailureKind, detail: impl std::fmt::Display) -> Self {
        let detail = detail.to_string();
        let detail = detail.trim();
        if detail.is_empty() {
            Self::new(kind, format!("{}.", kind.summary()))
        } else {
            Self::new(kind, format!("{}: {detail}", kind.summary()))
        }
    }
}

#[derive(Debug, Error)]
pub enum ImageDecodeError {
    #[error("image data url is missing the ',' separator")]
    MissingSeparator,
    #[error("image payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
}
