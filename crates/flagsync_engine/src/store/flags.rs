//! Flags store.

use super::traffic_types::TrafficTypeIndex;
use crate::persist::PersistWriter;
use flagsync_protocol::{ChangeCursor, FeatureFlag, ProcessedChange};
use flagsync_storage::{FlagsUpdate, PersistentFlagsStorage};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What [`FlagsStore::update`] did with a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The change was applied and the cursor advanced.
    Applied {
        /// True exactly once: the first applied change that added flags.
        first_load: bool,
    },
    /// The change carried nothing new.
    Unchanged,
    /// The change raced with another update or is older than the store.
    Stale,
}

/// One immutable version of the store.
#[derive(Debug, Clone, Default)]
struct Snapshot {
    flags: HashMap<String, Arc<FeatureFlag>>,
    traffic_types: TrafficTypeIndex,
    till: ChangeCursor,
}

/// Authoritative in-memory flag definitions.
///
/// Readers clone an `Arc` to the current snapshot and never see a partial
/// update. Writers are serialized; each builds the next snapshot off to
/// the side, publishes it, and then queues the delta on the
/// [`PersistWriter`]. Deltas reach the cache in publish order.
///
/// # Invariants
///
/// - The cursor never decreases
/// - A change is applied only if its `since` equals the current cursor
/// - The traffic type index always matches the stored flags
pub struct FlagsStore {
    current: RwLock<Arc<Snapshot>>,
    writer: Mutex<()>,
    persistent: Arc<dyn PersistentFlagsStorage>,
    persist: PersistWriter,
    loaded_once: AtomicBool,
    loaded_from_cache: bool,
}

impl FlagsStore {
    /// Creates a store from whatever the persistent cache holds.
    ///
    /// An unreadable cache is logged and treated as empty.
    pub fn load(persistent: Arc<dyn PersistentFlagsStorage>, persist: PersistWriter) -> Self {
        let snapshot = match persistent.load_snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "flags cache unreadable, starting empty");
                flagsync_storage::FlagsSnapshot::default()
            }
        };

        let flags: HashMap<String, Arc<FeatureFlag>> = snapshot
            .flags
            .into_iter()
            .filter(FeatureFlag::is_active)
            .map(|flag| (flag.name.clone(), Arc::new(flag)))
            .collect();
        let traffic_types = TrafficTypeIndex::from_flags(flags.values().map(|f| f.as_ref()));
        let loaded_from_cache = !snapshot.cursor.is_initial();

        debug!(
            flags = flags.len(),
            till = %snapshot.cursor,
            "loaded flags from cache"
        );

        Self {
            current: RwLock::new(Arc::new(Snapshot {
                flags,
                traffic_types,
                till: snapshot.cursor,
            })),
            writer: Mutex::new(()),
            persistent,
            persist,
            loaded_once: AtomicBool::new(false),
            loaded_from_cache,
        }
    }

    fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&*self.current.read())
    }

    /// Returns true if the cache held a synced state at construction.
    pub fn loaded_from_cache(&self) -> bool {
        self.loaded_from_cache
    }

    /// Cursor of the last applied change.
    pub fn till(&self) -> ChangeCursor {
        self.snapshot().till
    }

    /// Returns a flag by name.
    pub fn get(&self, name: &str) -> Option<Arc<FeatureFlag>> {
        self.snapshot().flags.get(name).cloned()
    }

    /// Returns the named flags that exist, read from one snapshot.
    pub fn get_many<'a>(
        &self,
        names: impl IntoIterator<Item = &'a str>,
    ) -> HashMap<String, Arc<FeatureFlag>> {
        let snapshot = self.snapshot();
        names
            .into_iter()
            .filter_map(|name| {
                snapshot
                    .flags
                    .get(name)
                    .map(|flag| (name.to_string(), Arc::clone(flag)))
            })
            .collect()
    }

    /// Returns every stored flag.
    pub fn get_all(&self) -> Vec<Arc<FeatureFlag>> {
        self.snapshot().flags.values().cloned().collect()
    }

    /// Number of stored flags.
    pub fn len(&self) -> usize {
        self.snapshot().flags.len()
    }

    /// Returns true if no flag is stored.
    pub fn is_empty(&self) -> bool {
        self.snapshot().flags.is_empty()
    }

    /// Returns true if at least one stored flag uses `traffic_type`.
    pub fn is_valid_traffic_type(&self, traffic_type: &str) -> bool {
        self.snapshot().traffic_types.contains(traffic_type)
    }

    /// Applies a processed change.
    ///
    /// The change is rejected as [`UpdateOutcome::Stale`] when its `since`
    /// is not the current cursor, or when its `till` would move the cursor
    /// backwards.
    pub fn update(&self, change: &ProcessedChange) -> UpdateOutcome {
        let _writer = self.writer.lock();
        let current = self.snapshot();

        if change.since != current.till || change.till < current.till {
            debug!(
                since = %change.since,
                till = %change.till,
                current = %current.till,
                "discarding stale change"
            );
            return UpdateOutcome::Stale;
        }

        if change.is_empty() && change.till == current.till {
            return UpdateOutcome::Unchanged;
        }

        let mut next = Snapshot::clone(&current);
        for name in &change.to_remove {
            if let Some(old) = next.flags.remove(name) {
                next.traffic_types.decrement(old.traffic_type());
            }
        }
        for flag in &change.to_add {
            let flag = Arc::new(flag.clone());
            if let Some(old) = next.flags.insert(flag.name.clone(), Arc::clone(&flag)) {
                next.traffic_types.decrement(old.traffic_type());
            }
            next.traffic_types.increment(flag.traffic_type());
        }
        next.till = change.till;
        *self.current.write() = Arc::new(next);

        let first_load =
            !change.to_add.is_empty() && !self.loaded_once.swap(true, Ordering::SeqCst);
        if first_load {
            info!(
                till = %change.till,
                flags = change.to_add.len(),
                "first flags load"
            );
        } else {
            debug!(
                till = %change.till,
                added = change.to_add.len(),
                removed = change.to_remove.len(),
                "flags updated"
            );
        }

        self.write_through(FlagsUpdate {
            upserts: change.to_add.clone(),
            removals: change.to_remove.clone(),
            cursor: change.till,
        });

        UpdateOutcome::Applied { first_load }
    }

    /// Kills a flag locally.
    ///
    /// The flag serves `default_treatment` from now on. Ignored unless
    /// `change_number` is newer than the flag's own. The store cursor does
    /// not move. Returns true if the flag was killed.
    pub fn kill(&self, name: &str, default_treatment: &str, change_number: i64) -> bool {
        let _writer = self.writer.lock();
        let current = self.snapshot();

        let Some(flag) = current.flags.get(name) else {
            debug!(flag = name, "kill for unknown flag ignored");
            return false;
        };
        if change_number <= flag.change_number {
            debug!(flag = name, change_number, "kill older than flag ignored");
            return false;
        }

        let mut killed = FeatureFlag::clone(flag);
        killed.killed = true;
        killed.default_treatment = default_treatment.to_string();
        killed.change_number = change_number;

        let mut next = Snapshot::clone(&current);
        next.flags.insert(name.to_string(), Arc::new(killed.clone()));
        *self.current.write() = Arc::new(next);
        info!(flag = name, change_number, "flag killed");

        self.write_through(FlagsUpdate {
            upserts: vec![killed],
            removals: Vec::new(),
            cursor: current.till,
        });
        true
    }

    /// Queues a delta for the cache. Called with the writer lock held so
    /// deltas are queued in publish order.
    fn write_through(&self, update: FlagsUpdate) {
        let persistent = Arc::clone(&self.persistent);
        self.persist.write(move || {
            if let Err(e) = persistent.persist(&update) {
                warn!(error = %e, till = %update.cursor, "failed to persist flags");
            }
        });
    }
}
