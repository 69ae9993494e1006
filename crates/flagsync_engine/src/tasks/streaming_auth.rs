//! Streaming authentication.

use crate::error::SyncResult;
use crate::fetcher::{AuthOutcome, StreamingAuthenticator};
use crate::task::{SyncTask, TaskExecutionInfo, TaskOutput, TaskType};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// Asks the service for a streaming token.
pub struct StreamingAuthTask {
    authenticator: Arc<dyn StreamingAuthenticator>,
    matching_key: String,
}

impl StreamingAuthTask {
    /// Creates a task authenticating `matching_key`.
    pub fn new(
        authenticator: Arc<dyn StreamingAuthenticator>,
        matching_key: impl Into<String>,
    ) -> Self {
        Self {
            authenticator,
            matching_key: matching_key.into(),
        }
    }

    /// Authenticates once, keeping the error for the caller.
    ///
    /// # Errors
    ///
    /// Returns whatever the authenticator reported.
    pub async fn authenticate(&self) -> SyncResult<AuthOutcome> {
        let outcome = self.authenticator.authenticate(&self.matching_key).await?;
        debug!(
            push_enabled = outcome.push_enabled,
            channels = outcome.channels.len(),
            lifetime_secs = outcome.lifetime_secs(),
            "streaming authenticated"
        );
        Ok(outcome)
    }
}

#[async_trait]
impl SyncTask for StreamingAuthTask {
    async fn execute(&self) -> TaskExecutionInfo {
        match self.authenticate().await {
            Ok(outcome) => TaskExecutionInfo::success(TaskType::StreamingAuth)
                .with_output(TaskOutput::StreamingAuth(outcome)),
            Err(e) => {
                warn!(error = %e, "streaming authentication failed");
                TaskExecutionInfo::error(TaskType::StreamingAuth)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;

    struct Fixed(bool);

    #[async_trait]
    impl StreamingAuthenticator for Fixed {
        async fn authenticate(&self, matching_key: &str) -> SyncResult<AuthOutcome> {
            if !self.0 {
                return Err(SyncError::Auth(format!("key {matching_key} rejected")));
            }
            Ok(AuthOutcome {
                push_enabled: true,
                token: format!("token-{matching_key}"),
                channels: vec!["flags".into()],
                issued_at: 0,
                expires_at: 3_600,
            })
        }
    }

    #[tokio::test]
    async fn success_carries_outcome() {
        let info = StreamingAuthTask::new(Arc::new(Fixed(true)), "user-1").execute().await;

        assert!(info.is_success());
        match info.output {
            TaskOutput::StreamingAuth(outcome) => assert_eq!(outcome.token, "token-user-1"),
            other => panic!("unexpected output {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejection_is_an_error_result() {
        let task = StreamingAuthTask::new(Arc::new(Fixed(false)), "user-1");

        assert!(matches!(task.authenticate().await, Err(SyncError::Auth(_))));
        let info = task.execute().await;
        assert_eq!(info.task_type, TaskType::StreamingAuth);
        assert!(!info.is_success());
    }
}
