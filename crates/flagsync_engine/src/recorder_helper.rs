//! Flush thresholds for record queues.

use crate::persist::PersistWriter;
use crate::task::{TaskExecutionInfo, TaskExecutionListener, TaskStatus, TaskType};
use flagsync_protocol::InBytesSizable;
use flagsync_storage::PersistentRecordStorage;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Default, Clone, Copy)]
struct Pending {
    records: u64,
    bytes: u64,
}

/// Pushes records into a queue and decides when a flush is due.
///
/// Records reach the queue through the [`PersistWriter`], so pushing never
/// waits on the cache. Counts are reset whenever a flush is requested. When the flush fails,
/// the recorder task reports what it could not send and those counts are
/// added back, so the next push can trigger another flush.
pub struct RecorderSyncHelper<T> {
    storage: Arc<dyn PersistentRecordStorage<T>>,
    persist: PersistWriter,
    task_type: TaskType,
    max_records: u64,
    max_bytes: u64,
    pending: Mutex<Pending>,
}

impl<T: InBytesSizable + Send + 'static> RecorderSyncHelper<T> {
    /// Creates a helper for the queue flushed by tasks of `task_type`.
    pub fn new(
        storage: Arc<dyn PersistentRecordStorage<T>>,
        persist: PersistWriter,
        task_type: TaskType,
        max_records: u64,
        max_bytes: u64,
    ) -> Self {
        Self {
            storage,
            persist,
            task_type,
            max_records,
            max_bytes,
            pending: Mutex::new(Pending::default()),
        }
    }

    /// Queues a record. Returns true if the queue should be flushed now.
    ///
    /// A record the cache refuses is logged and lost.
    pub fn push_and_check_flush(&self, record: T) -> bool {
        let size = record.size_in_bytes();
        let storage = Arc::clone(&self.storage);
        let task_type = self.task_type;
        self.persist.write(move || {
            if let Err(e) = storage.push(record) {
                warn!(?task_type, error = %e, "failed to queue record");
            }
        });

        let mut pending = self.pending.lock();
        pending.records += 1;
        pending.bytes += size;
        if pending.records > self.max_records || pending.bytes >= self.max_bytes {
            debug!(
                task_type = ?self.task_type,
                records = pending.records,
                bytes = pending.bytes,
                "record queue full, flush needed"
            );
            *pending = Pending::default();
            return true;
        }
        false
    }

    /// Records and bytes pushed since the last flush request.
    pub fn pending(&self) -> (u64, u64) {
        let pending = self.pending.lock();
        (pending.records, pending.bytes)
    }
}

impl<T: Send> TaskExecutionListener for RecorderSyncHelper<T> {
    fn task_executed(&self, info: &TaskExecutionInfo) {
        if info.status != TaskStatus::Error || info.task_type != self.task_type {
            return;
        }
        let mut pending = self.pending.lock();
        pending.records += info.non_sent_records;
        pending.bytes += info.non_sent_bytes;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flagsync_protocol::Event;
    use flagsync_storage::InMemoryRecordStorage;
    use std::time::{Duration, Instant};

    struct Helper {
        helper: RecorderSyncHelper<Event>,
        storage: Arc<InMemoryRecordStorage<Event>>,
        persist: PersistWriter,
    }

    fn helper(max_records: u64, max_bytes: u64) -> Helper {
        let storage = Arc::new(InMemoryRecordStorage::new());
        let persist = PersistWriter::spawn().unwrap();
        let helper = RecorderSyncHelper::new(
            storage.clone() as Arc<dyn PersistentRecordStorage<Event>>,
            persist.clone(),
            TaskType::EventsRecorder,
            max_records,
            max_bytes,
        );
        Helper {
            helper,
            storage,
            persist,
        }
    }

    fn event(i: i64) -> Event {
        Event::new("key", "user", "click", i)
    }

    #[tokio::test]
    async fn flush_when_count_exceeded() {
        let h = helper(2, u64::MAX);

        assert!(!h.helper.push_and_check_flush(event(1)));
        assert!(!h.helper.push_and_check_flush(event(2)));
        assert!(h.helper.push_and_check_flush(event(3)));
        assert_eq!(h.helper.pending(), (0, 0));

        h.persist.flush().await;
        assert_eq!(h.storage.len(), 3);
    }

    #[tokio::test]
    async fn flush_when_bytes_reached() {
        let h = helper(100, 2048);

        assert!(!h.helper.push_and_check_flush(event(1)));
        assert!(h.helper.push_and_check_flush(event(2)));
    }

    #[tokio::test]
    async fn failed_flush_restores_counts() {
        let h = helper(2, u64::MAX);
        h.helper.push_and_check_flush(event(1));

        h.helper.task_executed(
            &TaskExecutionInfo::error(TaskType::EventsRecorder).with_non_sent(5, 5120),
        );
        assert_eq!(h.helper.pending(), (6, 6144));

        h.helper.task_executed(
            &TaskExecutionInfo::error(TaskType::ImpressionsRecorder).with_non_sent(5, 5120),
        );
        h.helper
            .task_executed(&TaskExecutionInfo::success(TaskType::EventsRecorder));
        assert_eq!(h.helper.pending(), (6, 6144));

        assert!(h.helper.push_and_check_flush(event(2)));
    }

    #[tokio::test]
    async fn push_does_not_wait_for_the_cache() {
        let h = helper(u64::MAX, u64::MAX);
        // Hold the writer until released.
        let (release, released) = tokio::sync::oneshot::channel::<()>();
        h.persist.write(move || {
            let _ = released.blocking_recv();
        });

        let started = Instant::now();
        for i in 0..100 {
            h.helper.push_and_check_flush(event(i));
        }
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(h.storage.is_empty());

        release.send(()).unwrap();
        h.persist.flush().await;
        assert_eq!(h.storage.len(), 100);
    }
}
