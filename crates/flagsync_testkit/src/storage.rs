//! Persistent caches that fail or stall on demand.
//!
//! Wrap the in-memory storages so tests can check that cache failures are
//! logged and survived rather than propagated, and that slow caches never
//! hold up the caller.

use flagsync_storage::{
    FlagsSnapshot, FlagsUpdate, InMemoryFlagsStorage, InMemoryRecordStorage,
    InMemorySegmentsStorage, PersistentFlagsStorage, PersistentRecordStorage,
    PersistentSegmentsStorage, StorageError, StorageResult,
};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

fn injected(what: &str) -> StorageError {
    StorageError::Io(io::Error::other(format!("injected {what} failure")))
}

/// Flags cache with switchable read and write failures.
#[derive(Debug, Default)]
pub struct FailingFlagsStorage {
    inner: InMemoryFlagsStorage,
    fail_load: AtomicBool,
    fail_persist: AtomicBool,
    failed_writes: AtomicUsize,
}

impl FailingFlagsStorage {
    /// Creates an empty, healthy cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a cache holding `snapshot`.
    pub fn with_snapshot(snapshot: FlagsSnapshot) -> Self {
        Self {
            inner: InMemoryFlagsStorage::with_snapshot(snapshot),
            ..Self::default()
        }
    }

    /// Makes loads fail or succeed.
    pub fn set_fail_load(&self, fail: bool) {
        self.fail_load.store(fail, Ordering::SeqCst);
    }

    /// Makes writes fail or succeed.
    pub fn set_fail_persist(&self, fail: bool) {
        self.fail_persist.store(fail, Ordering::SeqCst);
    }

    /// Successful writes.
    pub fn write_count(&self) -> usize {
        self.inner.write_count()
    }

    /// Rejected writes.
    pub fn failed_write_count(&self) -> usize {
        self.failed_writes.load(Ordering::SeqCst)
    }
}

impl PersistentFlagsStorage for FailingFlagsStorage {
    fn load_snapshot(&self) -> StorageResult<FlagsSnapshot> {
        if self.fail_load.load(Ordering::SeqCst) {
            return Err(injected("load"));
        }
        self.inner.load_snapshot()
    }

    fn persist(&self, update: &FlagsUpdate) -> StorageResult<()> {
        if self.fail_persist.load(Ordering::SeqCst) {
            self.failed_writes.fetch_add(1, Ordering::SeqCst);
            return Err(injected("persist"));
        }
        self.inner.persist(update)
    }
}

/// Segments cache with switchable read and write failures.
#[derive(Debug, Default)]
pub struct FailingSegmentsStorage {
    inner: InMemorySegmentsStorage,
    fail_load: AtomicBool,
    fail_persist: AtomicBool,
}

impl FailingSegmentsStorage {
    /// Creates an empty, healthy cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes loads fail or succeed.
    pub fn set_fail_load(&self, fail: bool) {
        self.fail_load.store(fail, Ordering::SeqCst);
    }

    /// Makes writes fail or succeed.
    pub fn set_fail_persist(&self, fail: bool) {
        self.fail_persist.store(fail, Ordering::SeqCst);
    }
}

impl PersistentSegmentsStorage for FailingSegmentsStorage {
    fn load_snapshot(&self) -> StorageResult<Vec<String>> {
        if self.fail_load.load(Ordering::SeqCst) {
            return Err(injected("load"));
        }
        self.inner.load_snapshot()
    }

    fn persist(&self, segments: &[String]) -> StorageResult<()> {
        if self.fail_persist.load(Ordering::SeqCst) {
            return Err(injected("persist"));
        }
        self.inner.persist(segments)
    }
}

/// Record queue whose every write sleeps for a fixed delay first.
#[derive(Debug)]
pub struct SlowRecordStorage<T> {
    inner: InMemoryRecordStorage<T>,
    delay: Duration,
}

impl<T> SlowRecordStorage<T> {
    /// Creates an empty queue whose writes take `delay`.
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: InMemoryRecordStorage::new(),
            delay,
        }
    }
}

impl<T: Send> PersistentRecordStorage<T> for SlowRecordStorage<T> {
    fn push(&self, record: T) -> StorageResult<()> {
        thread::sleep(self.delay);
        self.inner.push(record)
    }

    fn pop(&self, count: usize) -> StorageResult<Vec<T>> {
        self.inner.pop(count)
    }

    fn set_active(&self, records: Vec<T>) -> StorageResult<()> {
        thread::sleep(self.delay);
        self.inner.set_active(records)
    }

    fn len(&self) -> usize {
        self.inner.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flagsync_protocol::ChangeCursor;

    #[test]
    fn failures_toggle() {
        let storage = FailingFlagsStorage::new();
        let update = FlagsUpdate {
            upserts: Vec::new(),
            removals: Vec::new(),
            cursor: ChangeCursor::new(5),
        };

        storage.set_fail_persist(true);
        assert!(storage.persist(&update).is_err());
        assert_eq!(storage.failed_write_count(), 1);

        storage.set_fail_persist(false);
        storage.persist(&update).unwrap();
        assert_eq!(storage.load_snapshot().unwrap().cursor, ChangeCursor::new(5));

        storage.set_fail_load(true);
        assert!(storage.load_snapshot().is_err());
    }
}
