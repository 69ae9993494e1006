//! Error types for storage operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A cache file exists but cannot be decoded.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// A value could not be encoded.
    #[error("encoding error: {0}")]
    Codec(String),

    /// Another process holds the cache directory.
    #[error("cache directory is locked: {}", .0.display())]
    Locked(PathBuf),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = StorageError::Locked(PathBuf::from("/tmp/cache"));
        assert_eq!(err.to_string(), "cache directory is locked: /tmp/cache");

        let err = StorageError::Corrupted("bad header".into());
        assert_eq!(err.to_string(), "storage corrupted: bad header");
    }
}
