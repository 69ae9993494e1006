//! Record queue flushing.

use crate::fetcher::RecordSender;
use crate::persist::PersistWriter;
use crate::task::{SyncTask, TaskExecutionInfo, TaskType};
use async_trait::async_trait;
use flagsync_protocol::InBytesSizable;
use flagsync_storage::PersistentRecordStorage;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Drains a record queue in batches and posts each batch.
///
/// Queue reads and writes go through the [`PersistWriter`], after any
/// records still on their way in.
///
/// Batches that fail to send are set aside and put back at the front of
/// the queue once the queue has been drained, so one run never pops the
/// same batch twice. The error result carries how much was left unsent.
pub struct RecorderTask<T> {
    storage: Arc<dyn PersistentRecordStorage<T>>,
    persist: PersistWriter,
    sender: Arc<dyn RecordSender<T>>,
    task_type: TaskType,
    per_push: usize,
}

impl<T> RecorderTask<T> {
    /// Creates a task that sends at most `per_push` records per request.
    pub fn new(
        storage: Arc<dyn PersistentRecordStorage<T>>,
        persist: PersistWriter,
        sender: Arc<dyn RecordSender<T>>,
        task_type: TaskType,
        per_push: usize,
    ) -> Self {
        Self {
            storage,
            persist,
            sender,
            task_type,
            per_push: per_push.max(1),
        }
    }

    /// The queue this task drains.
    pub fn storage(&self) -> &Arc<dyn PersistentRecordStorage<T>> {
        &self.storage
    }

    /// The writer queue operations run on.
    pub fn persist(&self) -> &PersistWriter {
        &self.persist
    }

    /// The task type reported in results.
    pub fn task_type(&self) -> TaskType {
        self.task_type
    }
}

#[async_trait]
impl<T> SyncTask for RecorderTask<T>
where
    T: InBytesSizable + Send + Sync + 'static,
{
    async fn execute(&self) -> TaskExecutionInfo {
        let mut failed: Vec<T> = Vec::new();
        let mut sent = 0usize;

        loop {
            let storage = Arc::clone(&self.storage);
            let per_push = self.per_push;
            let batch = match self.persist.run(move || storage.pop(per_push)).await {
                Some(Ok(batch)) => batch,
                Some(Err(e)) => {
                    error!(task_type = ?self.task_type, error = %e, "cannot read record queue");
                    break;
                }
                None => {
                    error!(task_type = ?self.task_type, "record queue unavailable");
                    break;
                }
            };
            if batch.is_empty() {
                break;
            }
            let full = batch.len() == self.per_push;

            match self.sender.send(&batch).await {
                Ok(()) => sent += batch.len(),
                Err(e) => {
                    warn!(
                        task_type = ?self.task_type,
                        records = batch.len(),
                        error = %e,
                        "record batch not sent"
                    );
                    failed.extend(batch);
                }
            }

            if !full {
                break;
            }
        }

        if failed.is_empty() {
            debug!(task_type = ?self.task_type, sent, "record queue flushed");
            return TaskExecutionInfo::success(self.task_type);
        }

        let records = failed.len() as u64;
        let bytes: u64 = failed.iter().map(InBytesSizable::size_in_bytes).sum();
        let storage = Arc::clone(&self.storage);
        match self.persist.run(move || storage.set_active(failed)).await {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                error!(task_type = ?self.task_type, error = %e, "failed to requeue unsent records");
            }
            None => error!(task_type = ?self.task_type, "unsent records lost"),
        }
        TaskExecutionInfo::error(self.task_type).with_non_sent(records, bytes)
    }
}
