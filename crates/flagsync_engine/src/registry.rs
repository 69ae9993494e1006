//! Live instance tracking.

use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Counts live [`FlagsContext`](crate::FlagsContext)s per SDK key.
///
/// Owned by the host and handed to each context it creates. Creating more
/// than one context for the same key is allowed but logged, since every
/// instance polls and records on its own.
#[derive(Debug, Default)]
pub struct InstanceRegistry {
    live: Mutex<HashMap<String, usize>>,
}

impl InstanceRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a new instance for `sdk_key`. Returns how many are now live
    /// for that key.
    pub fn register(&self, sdk_key: &str) -> usize {
        let mut live = self.live.lock();
        let count = {
            let count = live.entry(sdk_key.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        if count > 1 {
            warn!(instances = count, "multiple instances created for the same SDK key");
        } else if live.len() > 1 {
            warn!(keys = live.len(), "instances exist for more than one SDK key");
        }
        debug!(instances = count, "instance registered");
        count
    }

    /// Forgets one instance for `sdk_key`.
    pub fn deregister(&self, sdk_key: &str) {
        let mut live = self.live.lock();
        if let Some(count) = live.get_mut(sdk_key) {
            *count -= 1;
            if *count == 0 {
                live.remove(sdk_key);
            }
        }
    }

    /// Live instances for `sdk_key`.
    pub fn count(&self, sdk_key: &str) -> usize {
        self.live.lock().get(sdk_key).copied().unwrap_or(0)
    }

    /// Live instances across all keys.
    pub fn total(&self) -> usize {
        self.live.lock().values().sum()
    }
}
