//! Reference-counted traffic type index.

use flagsync_protocol::FeatureFlag;
use std::collections::HashMap;

/// Counts how many stored flags use each traffic type.
///
/// Names are compared case-insensitively. A type is valid while its count
/// is above zero; entries are dropped when the count reaches zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrafficTypeIndex {
    counts: HashMap<String, u32>,
}

impl TrafficTypeIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Recomputes the index from a set of stored flags.
    pub fn from_flags<'a>(flags: impl IntoIterator<Item = &'a FeatureFlag>) -> Self {
        let mut index = Self::new();
        for flag in flags {
            if flag.is_active() {
                index.increment(flag.traffic_type());
            }
        }
        index
    }

    /// Records one more flag using `traffic_type`.
    pub fn increment(&mut self, traffic_type: Option<&str>) {
        if let Some(name) = traffic_type {
            *self.counts.entry(name.to_lowercase()).or_insert(0) += 1;
        }
    }

    /// Records one fewer flag using `traffic_type`. Never goes below zero.
    pub fn decrement(&mut self, traffic_type: Option<&str>) {
        let Some(name) = traffic_type else {
            return;
        };
        let key = name.to_lowercase();
        if let Some(count) = self.counts.get_mut(&key) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.counts.remove(&key);
            }
        }
    }

    /// Returns true if at least one stored flag uses `traffic_type`.
    pub fn contains(&self, traffic_type: &str) -> bool {
        self.count(traffic_type) > 0
    }

    /// Number of stored flags using `traffic_type`.
    pub fn count(&self, traffic_type: &str) -> u32 {
        self.counts
            .get(&traffic_type.to_lowercase())
            .copied()
            .unwrap_or(0)
    }

    /// Number of distinct traffic types.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// Returns true if no traffic type is in use.
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}
