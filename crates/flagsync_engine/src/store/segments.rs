//! Segment membership store.

use crate::persist::PersistWriter;
use flagsync_storage::PersistentSegmentsStorage;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Segments the current key belongs to.
///
/// Membership is replaced wholesale on each sync.
pub struct SegmentsStore {
    current: RwLock<Arc<HashSet<String>>>,
    writer: Mutex<()>,
    persistent: Arc<dyn PersistentSegmentsStorage>,
    persist: PersistWriter,
    loaded_from_cache: bool,
}

impl SegmentsStore {
    /// Creates a store from whatever the persistent cache holds.
    pub fn load(persistent: Arc<dyn PersistentSegmentsStorage>, persist: PersistWriter) -> Self {
        let (segments, loaded_from_cache) = match persistent.load_snapshot() {
            Ok(segments) => (segments.into_iter().collect::<HashSet<_>>(), true),
            Err(e) => {
                warn!(error = %e, "segments cache unreadable, starting empty");
                (HashSet::new(), false)
            }
        };
        debug!(segments = segments.len(), "loaded segments from cache");

        Self {
            current: RwLock::new(Arc::new(segments)),
            writer: Mutex::new(()),
            persistent,
            persist,
            loaded_from_cache,
        }
    }

    /// Returns true if the cache was readable at construction.
    ///
    /// An empty membership is a valid cached state.
    pub fn loaded_from_cache(&self) -> bool {
        self.loaded_from_cache
    }

    /// Current membership.
    pub fn get_all(&self) -> Arc<HashSet<String>> {
        Arc::clone(&*self.current.read())
    }

    /// Returns true if the key belongs to `segment`.
    pub fn contains(&self, segment: &str) -> bool {
        self.current.read().contains(segment)
    }

    /// Replaces the membership. Returns true if it changed.
    pub fn set(&self, segments: Vec<String>) -> bool {
        let _writer = self.writer.lock();
        let next: HashSet<String> = segments.into_iter().collect();
        if *self.get_all() == next {
            return false;
        }

        let mut sorted: Vec<String> = next.iter().cloned().collect();
        sorted.sort();
        *self.current.write() = Arc::new(next);
        debug!(segments = sorted.len(), "segments updated");

        let persistent = Arc::clone(&self.persistent);
        self.persist.write(move || {
            if let Err(e) = persistent.persist(&sorted) {
                warn!(error = %e, "failed to persist segments");
            }
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flagsync_storage::InMemorySegmentsStorage;

    #[tokio::test]
    async fn set_replaces_and_persists() {
        let persistent = Arc::new(InMemorySegmentsStorage::with_segments(["a", "b"]));
        let persist = PersistWriter::spawn().unwrap();
        let store = SegmentsStore::load(persistent.clone(), persist.clone());
        assert!(store.contains("a"));

        assert!(store.set(vec!["c".into(), "b".into()]));
        assert!(!store.contains("a"));
        assert!(store.contains("c"));
        persist.flush().await;
        assert_eq!(
            persistent.load_snapshot().unwrap(),
            vec!["b".to_string(), "c".to_string()]
        );
    }

    #[tokio::test]
    async fn same_membership_is_not_a_change() {
        let store = SegmentsStore::load(
            Arc::new(InMemorySegmentsStorage::with_segments(["a", "b"])),
            PersistWriter::spawn().unwrap(),
        );
        assert!(!store.set(vec!["b".into(), "a".into()]));
        assert!(store.set(Vec::new()));
        assert!(store.get_all().is_empty());
    }
}
