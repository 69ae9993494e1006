//! Persistent storage trait definitions.

use crate::error::StorageResult;
use flagsync_protocol::{ChangeCursor, FeatureFlag};
use serde::{Deserialize, Serialize};

/// Everything persisted for flags: definitions plus the cursor they reflect.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlagsSnapshot {
    /// Stored definitions.
    pub flags: Vec<FeatureFlag>,
    /// Cursor of the last applied change.
    pub cursor: ChangeCursor,
}

/// A write-through delta for the flags cache.
#[derive(Debug, Clone, PartialEq)]
pub struct FlagsUpdate {
    /// Definitions to insert or replace.
    pub upserts: Vec<FeatureFlag>,
    /// Names to delete.
    pub removals: Vec<String>,
    /// Cursor after the update.
    pub cursor: ChangeCursor,
}

/// Cold-start cache of flag definitions.
///
/// # Invariants
///
/// - `load_snapshot` of a never-written storage returns an empty snapshot at
///   [`ChangeCursor::INITIAL`]
/// - After `persist(u)`, `load_snapshot().cursor == u.cursor`
pub trait PersistentFlagsStorage: Send + Sync {
    /// Reads the whole cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache exists but cannot be read.
    fn load_snapshot(&self) -> StorageResult<FlagsSnapshot>;

    /// Applies a delta to the cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache cannot be written.
    fn persist(&self, update: &FlagsUpdate) -> StorageResult<()>;
}

/// Cold-start cache of the current key's segment membership.
pub trait PersistentSegmentsStorage: Send + Sync {
    /// Reads the stored membership; empty if never written.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache exists but cannot be read.
    fn load_snapshot(&self) -> StorageResult<Vec<String>>;

    /// Replaces the stored membership.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache cannot be written.
    fn persist(&self, segments: &[String]) -> StorageResult<()>;
}

/// Queue of records waiting to be sent.
///
/// Records handed out by `pop` are owned by the caller until it either
/// drops them (sent) or hands them back with `set_active` (send failed).
pub trait PersistentRecordStorage<T>: Send + Sync {
    /// Appends a record.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be written.
    fn push(&self, record: T) -> StorageResult<()>;

    /// Removes and returns up to `count` of the oldest records.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be written.
    fn pop(&self, count: usize) -> StorageResult<Vec<T>>;

    /// Returns previously popped records to the front of the queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be written.
    fn set_active(&self, records: Vec<T>) -> StorageResult<()>;

    /// Number of queued records.
    fn len(&self) -> usize;

    /// Returns true if nothing is queued.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
