//! Test fixtures.
//!
//! Small constructors for flags, batches and records, plus a temporary
//! storage directory that cleans up after itself.

use flagsync_protocol::{ChangeCursor, Event, FeatureFlag, Impression, RawChangeBatch};
use flagsync_storage::StorageDir;
use serde_json::json;
use std::time::Duration;
use tempfile::TempDir;

/// Traffic type used by the default fixtures.
pub const TRAFFIC_TYPE: &str = "user";

/// Matching key used by the default fixtures.
pub const MATCHING_KEY: &str = "user-1";

/// SDK key used by the default fixtures.
pub const SDK_KEY: &str = "sdk-key";

/// An active flag of [`TRAFFIC_TYPE`].
pub fn flag(name: &str) -> FeatureFlag {
    FeatureFlag::active(name, TRAFFIC_TYPE)
}

/// An archived flag.
pub fn archived(name: &str) -> FeatureFlag {
    FeatureFlag::archived(name)
}

/// A batch from `since` to `till` carrying `flags`.
pub fn batch(
    since: i64,
    till: i64,
    flags: impl IntoIterator<Item = FeatureFlag>,
) -> RawChangeBatch {
    RawChangeBatch::from_flags(ChangeCursor::new(since), ChangeCursor::new(till), flags)
        .expect("fixture flags always encode")
}

/// A batch with no changes at `cursor`.
pub fn empty_batch(cursor: i64) -> RawChangeBatch {
    RawChangeBatch::new(ChangeCursor::new(cursor), ChangeCursor::new(cursor))
}

/// Appends an entry named `name` that cannot be decoded as a flag.
pub fn with_garbage(batch: RawChangeBatch, name: &str) -> RawChangeBatch {
    batch.with_raw_entry(json!({ "name": name, "status": "ACTIVE", "conditions": 42 }))
}

/// An event for [`MATCHING_KEY`].
pub fn event(event_type: &str, timestamp: i64) -> Event {
    Event::new(MATCHING_KEY, TRAFFIC_TYPE, event_type, timestamp)
}

/// An impression for [`MATCHING_KEY`].
pub fn impression(feature: &str, treatment: &str, time: i64) -> Impression {
    Impression::new(MATCHING_KEY, feature, treatment, 1, time)
}

/// Lets spawned tasks run.
///
/// Under a paused clock this also advances time by a few milliseconds.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

/// A storage directory with automatic cleanup.
pub struct TempStorage {
    /// The locked directory.
    pub dir: StorageDir,
    temp_dir: TempDir,
}

impl TempStorage {
    /// Creates and locks a fresh directory.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let dir = StorageDir::open(temp_dir.path()).expect("Failed to open storage directory");
        Self { dir, temp_dir }
    }

    /// Releases the lock and reopens the same directory, as a restarted
    /// process would.
    pub fn reopen(self) -> Self {
        let Self { dir, temp_dir } = self;
        drop(dir);
        let dir = StorageDir::open(temp_dir.path()).expect("Failed to reopen storage directory");
        Self { dir, temp_dir }
    }
}

impl Default for TempStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_fixture_has_cursors() {
        let b = batch(-1, 10, [flag("a"), archived("b")]);
        assert_eq!(b.cursors().unwrap(), (ChangeCursor::INITIAL, ChangeCursor::new(10)));
        assert_eq!(b.entries.len(), 2);
    }

    #[test]
    fn garbage_entry_is_appended() {
        let b = with_garbage(batch(-1, 10, [flag("a")]), "bad");
        assert_eq!(b.entries.len(), 2);
        assert_eq!(b.entries[1]["name"], "bad");
    }

    #[test]
    fn temp_storage_reopens() {
        let storage = TempStorage::new();
        let path = storage.dir.path().to_path_buf();
        let storage = storage.reopen();
        assert_eq!(storage.dir.path(), path);
    }
}
