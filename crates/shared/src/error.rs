use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error codes carried by server `error` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WireErrorCode {
    AuthFailed,
    AuthRequired,
    Forbidden,
    NotFound,
    ValidationError,
    UnknownEvent,
    ReconnectFailed,
    InternalError,
}

#[derive(Debug, Clone, Error)]
#[error("{code:?}: {message}")]
pub struct WireError {
    pub code: WireErrorCode,
    pub message: String,
}

impl WireError {
    pub fn new(code: WireErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}
