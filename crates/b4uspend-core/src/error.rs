//! Error types for the data-access layer.

use thiserror::Error;

/// HTTP status that triggers the renewal protocol.
pub const UNAUTHORIZED: u16 = 401;

/// Failure of a call made through the data-access layer.
///
/// Cloneable so a single in-flight result can be handed to every caller
/// sharing it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Transport(String),

    #[error("HTTP {status}: {}", detail.as_deref().unwrap_or("request failed"))]
    Status { status: u16, detail: Option<String> },

    #[error("Unexpected response: {0}")]
    Decode(String),

    #[error("Session ended while the request was in flight")]
    SessionEnded,

    #[error("A message is already being sent")]
    Busy,

    #[error("Message is empty")]
    EmptyMessage,

    #[error("Message exceeds {0} characters")]
    MessageTooLong(usize),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ApiError {
    pub fn status(status: u16, detail: impl Into<Option<String>>) -> Self {
        Self::Status {
            status,
            detail: detail.into(),
        }
    }

    pub fn unauthorized(detail: &str) -> Self {
        Self::status(UNAUTHORIZED, Some(detail.to_string()))
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Status { status, .. } if *status == UNAUTHORIZED)
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// HTTP status code, when the server answered.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Machine-readable detail supplied by the server, if any.
    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::Status { detail, .. } => detail.as_deref(),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Failure of the durable session storage. Never escapes the credential store.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}
