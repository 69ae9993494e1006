//! Error types for protocol decoding and validation.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while decoding or validating protocol payloads.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The change batch envelope has no `since` or `till` cursor.
    #[error("change batch is missing its `{0}` cursor")]
    MissingCursor(&'static str),

    /// The payload is not valid JSON for the expected shape.
    #[error("malformed payload: {0}")]
    Json(#[from] serde_json::Error),

    /// A flag definition failed structural validation.
    #[error("invalid flag definition `{name}`: {reason}")]
    InvalidFlag {
        /// Flag name.
        name: String,
        /// What was wrong with it.
        reason: String,
    },

    /// A matching key is empty or too long.
    #[error("invalid matching key: {0}")]
    InvalidKey(String),

    /// A recorded event failed validation.
    #[error("invalid event: {0}")]
    InvalidEvent(String),
}

impl ProtocolError {
    /// Creates an invalid flag error.
    pub fn invalid_flag(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidFlag {
            name: name.into(),
            reason: reason.into(),
        }
    }
}
