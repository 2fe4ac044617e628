use axum::http::StatusCode;
use thiserror::Error;

/// Everything that can end an invocation early.
#[derive(Debug, Error)]
pub enum InvocationError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid event: {0}")]
    InvalidEvent(String),

    #[error("storage error {code}: {message}")]
    Storage { code: String, message: String },

    #[error("probe failed: {0}")]
    Probe(String),

    #[error("transcode failed: {0}")]
    Transcode(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl InvocationError {
    pub fn storage(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Storage {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Config(_) => StatusCode::UNAUTHORIZED,
            Self::InvalidEvent(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub type InvocationResult<T> = Result<T, InvocationError>;
