//! Flags synchronization.

use crate::backoff::with_retry;
use crate::config::RetryConfig;
use crate::error::SyncResult;
use crate::fetcher::ChangeFetcher;
use crate::readiness::{InternalEvent, ReadinessGate};
use crate::store::{FlagsStore, UpdateOutcome};
use crate::task::{FlagsSyncOutcome, SyncTask, TaskExecutionInfo, TaskOutput, TaskType};
use async_trait::async_trait;
use flagsync_protocol::ChangeProcessor;
use std::sync::Arc;
use tracing::{debug, error};

/// Fetches, processes and applies flag changes.
///
/// Shared by the periodic, one-shot and push-triggered flag tasks so they
/// all go through the same cursor check in [`FlagsStore::update`].
pub struct FlagsSyncer {
    fetcher: Arc<dyn ChangeFetcher>,
    store: Arc<FlagsStore>,
    processor: ChangeProcessor,
    readiness: Option<Arc<ReadinessGate>>,
    retry: RetryConfig,
}

impl FlagsSyncer {
    /// Creates a syncer.
    pub fn new(
        fetcher: Arc<dyn ChangeFetcher>,
        store: Arc<FlagsStore>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            fetcher,
            store,
            processor: ChangeProcessor::new(),
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
    pub fn store(&self) -> &Arc<FlagsStore> {
        &self.store
    }

    /// Syncs the store up to the latest change.
    ///
    /// # Errors
    ///
    /// Returns the last fetch or envelope error once retries are exhausted,
    /// or immediately when `retry_on_fail` is false.
    pub async fn sync(&self, retry_on_fail: bool) -> SyncResult<FlagsSyncOutcome> {
        let result = with_retry(&self.retry, retry_on_fail, "flags sync", || {
            self.fetch_until_current()
        })
        .await?;

        if let Some(readiness) = &self.readiness {
            if matches!(result.outcome, UpdateOutcome::Applied { .. }) {
                readiness.notify(InternalEvent::FlagsUpdated);
            }
            readiness.notify(InternalEvent::FlagsFetched);
        }
        Ok(result)
    }

    /// Fetches pages until the service reports no newer changes.
    async fn fetch_until_current(&self) -> SyncResult<FlagsSyncOutcome> {
        let mut result = UpdateOutcome::Unchanged;
        loop {
            let since = self.store.till();
            let batch = self.fetcher.fetch(since).await?;
            let change = self.processor.process(&batch)?;

            match (self.store.update(&change), result) {
                (
                    UpdateOutcome::Applied { first_load },
                    UpdateOutcome::Applied {
                        first_load: earlier,
                    },
                ) => {
                    result = UpdateOutcome::Applied {
                        first_load: first_load || earlier,
                    };
                }
                (UpdateOutcome::Applied { first_load }, _) => {
                    result = UpdateOutcome::Applied { first_load };
                }
                (UpdateOutcome::Stale, UpdateOutcome::Unchanged) => {
                    result = UpdateOutcome::Stale;
                    break;
                }
                (UpdateOutcome::Stale, _) | (UpdateOutcome::Unchanged, _) => break,
            }

            if change.till == change.since {
                break;
            }
        }

        let till = self.store.till();
        debug!(till = %till, outcome = ?result, "flags sync finished");
        Ok(FlagsSyncOutcome {
            outcome: result,
            till,
        })
    }
}

/// Runs a full flags sync.
pub struct FlagsSyncTask {
    syncer: Arc<FlagsSyncer>,
    retry_on_fail: bool,
}

impl FlagsSyncTask {
    /// Creates a task. Periodic runs usually pass `retry_on_fail = false`
    /// and let the next tick retry.
    pub fn new(syncer: Arc<FlagsSyncer>, retry_on_fail: bool) -> Self {
        Self {
            syncer,
            retry_on_fail,
        }
    }
}

#[async_trait]
impl SyncTask for FlagsSyncTask {
    async fn execute(&self) -> TaskExecutionInfo {
        match self.syncer.sync(self.retry_on_fail).await {
            Ok(outcome) => TaskExecutionInfo::success(TaskType::FlagsSync)
                .with_output(TaskOutput::FlagsSync(outcome)),
            Err(e) => {
                error!(error = %e, "flags sync failed");
                TaskExecutionInfo::error(TaskType::FlagsSync)
            }
        }
    }
}
