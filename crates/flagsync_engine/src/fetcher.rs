//! Remote collaborator traits.
//!
//! The engine never speaks HTTP or SSE itself. Hosts plug in transports
//! through these traits; the testkit provides scripted ones.

use crate::error::SyncResult;
use async_trait::async_trait;
use flagsync_protocol::{ChangeCursor, RawChangeBatch};

/// Fetches flag changes after a cursor.
#[async_trait]
pub trait ChangeFetcher: Send + Sync {
    /// Returns the batch of changes after `since`.
    ///
    /// # Errors
    ///
    /// Network failures should be reported as retryable
    /// [`SyncError::Network`](crate::SyncError::Network) errors, malformed
    /// envelopes as [`SyncError::Parse`](crate::SyncError::Parse).
    async fn fetch(&self, since: ChangeCursor) -> SyncResult<RawChangeBatch>;
}

/// Fetches the segment membership of a key.
#[async_trait]
pub trait SegmentsFetcher: Send + Sync {
    /// Returns the names of the segments `matching_key` belongs to.
    async fn fetch(&self, matching_key: &str) -> SyncResult<Vec<String>>;
}

/// Posts a batch of records.
#[async_trait]
pub trait RecordSender<T>: Send + Sync {
    /// Sends `records` in one request.
    async fn send(&self, records: &[T]) -> SyncResult<()>;
}

/// Result of a streaming authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthOutcome {
    /// Whether the server allows streaming for this key.
    pub push_enabled: bool,
    /// Connection token.
    pub token: String,
    /// Channels to subscribe to.
    pub channels: Vec<String>,
    /// Token issue time, seconds since the Unix epoch.
    pub issued_at: i64,
    /// Token expiry time, seconds since the Unix epoch.
    pub expires_at: i64,
}

impl AuthOutcome {
    /// Returns true if a connection should be attempted.
    pub fn can_connect(&self) -> bool {
        self.push_enabled && !self.channels.is_empty()
    }

    /// Token lifetime in seconds; zero if the token is already expired.
    pub fn lifetime_secs(&self) -> u64 {
        u64::try_from(self.expires_at.saturating_sub(self.issued_at)).unwrap_or(0)
    }
}

/// Obtains a streaming token.
#[async_trait]
pub trait StreamingAuthenticator: Send + Sync {
    /// Authenticates `matching_key` for streaming.
    async fn authenticate(&self, matching_key: &str) -> SyncResult<AuthOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(push_enabled: bool, channels: Vec<&str>) -> AuthOutcome {
        AuthOutcome {
            push_enabled,
            token: "t".into(),
            channels: channels.into_iter().map(String::from).collect(),
            issued_at: 1_000,
            expires_at: 4_600,
        }
    }

    #[test]
    fn connect_requires_push_and_channels() {
        assert!(outcome(true, vec!["flags"]).can_connect());
        assert!(!outcome(false, vec!["flags"]).can_connect());
        assert!(!outcome(true, vec![]).can_connect());
    }

    #[test]
    fn token_lifetime() {
        assert_eq!(outcome(true, vec![]).lifetime_secs(), 3_600);
        let expired = AuthOutcome {
            expires_at: 0,
            ..outcome(true, vec![])
        };
        assert_eq!(expired.lifetime_secs(), 0);
    }
}
