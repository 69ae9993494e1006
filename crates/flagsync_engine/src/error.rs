//! Error types for the sync engine.

use flagsync_protocol::ProtocolError;
use flagsync_storage::StorageError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
///
/// Stale or raced updates are not errors; see
/// [`UpdateOutcome`](crate::UpdateOutcome).
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("network error: {message}")]
    Network {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The response envelope could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),

    /// Protocol decoding or validation failed.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Persistent cache error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Streaming authentication was rejected.
    #[error("streaming authentication failed: {0}")]
    Auth(String),

    /// No tokio runtime is available to run background work.
    #[error("no tokio runtime available")]
    NoRuntime,

    /// Work was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// Timeout.
    #[error("operation timed out")]
    Timeout,
}

impl SyncError {
    /// Creates a retryable network error.
    pub fn network_retryable(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable network error.
    pub fn network_fatal(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Network { retryable, .. } => *retryable,
            SyncError::Timeout => true,
            _ => false,
        }
    }
}
