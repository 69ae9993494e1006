//! In-memory storages for testing and ephemeral caches.

use crate::backend::{
    FlagsSnapshot, FlagsUpdate, PersistentFlagsStorage, PersistentRecordStorage,
    PersistentSegmentsStorage,
};
use crate::error::StorageResult;
use flagsync_protocol::{ChangeCursor, FeatureFlag};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};

/// In-memory flags cache.
///
/// Data is lost when the storage is dropped. Counts writes so tests can
/// observe write-through behavior.
#[derive(Debug, Default)]
pub struct InMemoryFlagsStorage {
    state: Mutex<(BTreeMap<String, FeatureFlag>, ChangeCursor)>,
    writes: AtomicUsize,
}

impl InMemoryFlagsStorage {
    /// Creates an empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a storage pre-filled as if a previous run had persisted it.
    #[must_use]
    pub fn with_snapshot(snapshot: FlagsSnapshot) -> Self {
        let flags = snapshot
            .flags
            .into_iter()
            .map(|flag| (flag.name.clone(), flag))
            .collect();
        Self {
            state: Mutex::new((flags, snapshot.cursor)),
            writes: AtomicUsize::new(0),
        }
    }

    /// Number of successful `persist` calls.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl PersistentFlagsStorage for InMemoryFlagsStorage {
    fn load_snapshot(&self) -> StorageResult<FlagsSnapshot> {
        let state = self.state.lock();
        Ok(FlagsSnapshot {
            flags: state.0.values().cloned().collect(),
            cursor: state.1,
        })
    }

    fn persist(&self, update: &FlagsUpdate) -> StorageResult<()> {
        let mut state = self.state.lock();
        for name in &update.removals {
            state.0.remove(name);
        }
        for flag in &update.upserts {
            state.0.insert(flag.name.clone(), flag.clone());
        }
        state.1 = update.cursor;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// In-memory segment membership cache.
#[derive(Debug, Default)]
pub struct InMemorySegmentsStorage {
    segments: Mutex<Vec<String>>,
}

impl InMemorySegmentsStorage {
    /// Creates an empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a storage pre-filled with a membership list.
    #[must_use]
    pub fn with_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: Mutex::new(segments.into_iter().map(Into::into).collect()),
        }
    }
}

impl PersistentSegmentsStorage for InMemorySegmentsStorage {
    fn load_snapshot(&self) -> StorageResult<Vec<String>> {
        Ok(self.segments.lock().clone())
    }

    fn persist(&self, segments: &[String]) -> StorageResult<()> {
        *self.segments.lock() = segments.to_vec();
        Ok(())
    }
}

/// In-memory record queue.
#[derive(Debug)]
pub struct InMemoryRecordStorage<T> {
    queue: Mutex<VecDeque<T>>,
}

impl<T> Default for InMemoryRecordStorage<T> {
    fn default() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
        }
    }
}

impl<T> InMemoryRecordStorage<T> {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl<T: Send> PersistentRecordStorage<T> for InMemoryRecordStorage<T> {
    fn push(&self, record: T) -> StorageResult<()> {
        self.queue.lock().push_back(record);
        Ok(())
    }

    fn pop(&self, count: usize) -> StorageResult<Vec<T>> {
        let mut queue = self.queue.lock();
        let take = count.min(queue.len());
        Ok(queue.drain(..take).collect())
    }

    fn set_active(&self, records: Vec<T>) -> StorageResult<()> {
        let mut queue = self.queue.lock();
        for record in records.into_iter().rev() {
            queue.push_front(record);
        }
        Ok(())
    }

    fn len(&self) -> usize {
        self.queue.lock().len()
    }
}
