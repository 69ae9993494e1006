//! Segment membership synchronization.

use crate::backoff::with_retry;
use crate::config::RetryConfig;
use crate::error::SyncResult;
use crate::fetcher::SegmentsFetcher;
use crate::readiness::{InternalEvent, ReadinessGate};
use crate::store::SegmentsStore;
use crate::task::{SyncTask, TaskExecutionInfo, TaskType};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error};

/// Fetches the membership of one key and replaces the stored set.
pub struct SegmentsSyncer {
    fetcher: Arc<dyn SegmentsFetcher>,
    store: Arc<SegmentsStore>,
    matching_key: String,
    readiness: Option<Arc<ReadinessGate>>,
    retry: RetryConfig,
}

impl SegmentsSyncer {
    /// Creates a syncer for `matching_key`.
    pub fn new(
        fetcher: Arc<dyn SegmentsFetcher>,
        store: Arc<SegmentsStore>,
        matching_key: impl Into<String>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            fetcher,
            store,
            matching_key: matching_key.into(),
            readiness: None,
            retry,
        }
    }

    /// Reports fetches and updates to a readiness gate.
    #[must_use]
    pub fn with_readiness(mut self, readiness: Arc<ReadinessGate>) -> Self {
        self.readiness = Some(readiness);
        self
    }

    /// The store this syncer writes to.
    pub fn store(&self) -> &Arc<SegmentsStore> {
        &self.store
    }

    /// Replaces the stored membership with a fresh one. Returns true if it
    /// changed.
    ///
    /// # Errors
    ///
    /// Returns the last fetch error once retries are exhausted.
    pub async fn sync(&self, retry_on_fail: bool) -> SyncResult<bool> {
        let key = self.matching_key.as_str();
        let segments = with_retry(&self.retry, retry_on_fail, "segments sync", || {
            self.fetcher.fetch(key)
        })
        .await?;

        let changed = self.store.set(segments);
        debug!(changed, "segments sync finished");

        if let Some(readiness) = &self.readiness {
            if changed {
                readiness.notify(InternalEvent::SegmentsUpdated);
            }
            readiness.notify(InternalEvent::SegmentsFetched);
        }
        Ok(changed)
    }
}

/// Runs a segments sync.
pub struct SegmentsSyncTask {
    syncer: Arc<SegmentsSyncer>,
    retry_on_fail: bool,
}

impl SegmentsSyncTask {
    /// Creates a task.
    pub fn new(syncer: Arc<SegmentsSyncer>, retry_on_fail: bool) -> Self {
        Self {
            syncer,
            retry_on_fail,
        }
    }
}

#[async_trait]
impl SyncTask for SegmentsSyncTask {
    async fn execute(&self) -> TaskExecutionInfo {
        match self.syncer.sync(self.retry_on_fail).await {
            Ok(_) => TaskExecutionInfo::success(TaskType::SegmentsSync),
            Err(e) => {
                error!(error = %e, "segments sync failed");
                TaskExecutionInfo::error(TaskType::SegmentsSync)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::persist::PersistWriter;
    use flagsync_storage::InMemorySegmentsStorage;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    struct Script {
        responses: Mutex<VecDeque<SyncResult<Vec<String>>>>,
        keys: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SegmentsFetcher for Script {
        async fn fetch(&self, matching_key: &str) -> SyncResult<Vec<String>> {
            self.keys.lock().push(matching_key.to_string());
            self.responses.lock().pop_front().unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    fn syncer(responses: Vec<SyncResult<Vec<String>>>) -> (SegmentsSyncer, Arc<Script>) {
        let script = Arc::new(Script {
            responses: Mutex::new(responses.into()),
            keys: Mutex::new(Vec::new()),
        });
        let store = Arc::new(SegmentsStore::load(
            Arc::new(InMemorySegmentsStorage::new()),
            PersistWriter::spawn().unwrap(),
        ));
        let syncer = SegmentsSyncer::new(script.clone(), store, "user-1", RetryConfig::new(2));
        (syncer, script)
    }

    #[tokio::test]
    async fn replaces_membership() {
        let (syncer, script) = syncer(vec![
            Ok(vec!["beta".into(), "staff".into()]),
            Ok(vec!["beta".into(), "staff".into()]),
        ]);

        assert!(syncer.sync(false).await.unwrap());
        assert!(syncer.store().contains("staff"));
        assert!(!syncer.sync(false).await.unwrap());
        assert_eq!(*script.keys.lock(), vec!["user-1".to_string(), "user-1".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_attempt_budget() {
        let (syncer, script) = syncer(vec![
            Err(SyncError::network_retryable("down")),
            Err(SyncError::network_retryable("down")),
            Ok(vec!["late".into()]),
        ]);
        let task = SegmentsSyncTask::new(Arc::new(syncer), true);

        let info = task.execute().await;

        assert!(!info.is_success());
        assert_eq!(info.task_type, TaskType::SegmentsSync);
        assert_eq!(script.keys.lock().len(), 2);
    }

    #[tokio::test]
    async fn fatal_error_is_not_retried() {
        let (syncer, script) = syncer(vec![Err(SyncError::network_fatal("forbidden"))]);

        assert!(syncer.sync(true).await.is_err());
        assert_eq!(script.keys.lock().len(), 1);
    }
}
