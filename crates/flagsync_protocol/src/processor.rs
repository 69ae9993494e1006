//! Normalization of raw change batches.

use crate::change::{ProcessedChange, RawChangeBatch};
use crate::error::ProtocolResult;
use crate::flag::FeatureFlag;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// What the batch says about one flag name.
enum Decision {
    Add(Box<FeatureFlag>),
    Remove,
}

/// Turns a [`RawChangeBatch`] into a [`ProcessedChange`].
///
/// Holds no state and performs no I/O. When a batch mentions the same name
/// more than once, the last entry wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChangeProcessor;

impl ChangeProcessor {
    /// Creates a processor.
    pub fn new() -> Self {
        Self
    }

    /// Processes a batch.
    ///
    /// - ACTIVE entries that pass validation are added.
    /// - Non-ACTIVE entries are removed.
    /// - ACTIVE entries that fail validation are removed.
    /// - Entries that cannot be decoded are removed if a name can be read
    ///   from them, otherwise skipped.
    ///
    /// # Errors
    ///
    /// Returns [`crate::ProtocolError::MissingCursor`] if the envelope lacks a
    /// cursor. Individual entries never produce an error.
    pub fn process(&self, batch: &RawChangeBatch) -> ProtocolResult<ProcessedChange> {
        let (since, till) = batch.cursors()?;
        let mut decisions: BTreeMap<String, Decision> = BTreeMap::new();

        for entry in &batch.entries {
            match serde_json::from_value::<FeatureFlag>(entry.clone()) {
                Ok(flag) if flag.name.is_empty() => {
                    warn!("skipping flag entry with empty name");
                }
                Ok(flag) if !flag.is_active() => {
                    decisions.insert(flag.name, Decision::Remove);
                }
                Ok(flag) => match flag.validate() {
                    Ok(()) => {
                        decisions.insert(flag.name.clone(), Decision::Add(Box::new(flag)));
                    }
                    Err(e) => {
                        warn!(flag = %flag.name, error = %e, "removing invalid flag definition");
                        decisions.insert(flag.name, Decision::Remove);
                    }
                },
                Err(e) => match entry.get("name").and_then(|n| n.as_str()) {
                    Some(name) if !name.is_empty() => {
                        warn!(flag = name, error = %e, "removing undecodable flag definition");
                        decisions.insert(name.to_string(), Decision::Remove);
                    }
                    _ => {
                        warn!(error = %e, "skipping undecodable flag entry without a name");
                    }
                },
            }
        }

        let mut change = ProcessedChange::new(since, till);
        for (name, decision) in decisions {
            match decision {
                Decision::Add(flag) => change.to_add.push(*flag),
                Decision::Remove => change.to_remove.push(name),
            }
        }

        debug!(
            since = %since,
            till = %till,
            added = change.to_add.len(),
            removed = change.to_remove.len(),
            "processed change batch"
        );
        Ok(change)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::ChangeCursor;
    use crate::error::ProtocolError;
    use crate::flag::Condition;
    use serde_json::json;

    fn batch(flags: Vec<FeatureFlag>) -> RawChangeBatch {
        RawChangeBatch::from_flags(ChangeCursor::INITIAL, ChangeCursor::new(100), flags).unwrap()
    }

    #[test]
    fn active_added_archived_removed() {
        let change = ChangeProcessor::new()
            .process(&batch(vec![
                FeatureFlag::active("a", "user"),
                FeatureFlag::archived("b"),
            ]))
            .unwrap();

        assert_eq!(change.since, ChangeCursor::INITIAL);
        assert_eq!(change.till, ChangeCursor::new(100));
        assert_eq!(change.to_add.len(), 1);
        assert_eq!(change.to_add[0].name, "a");
        assert_eq!(change.to_remove, vec!["b".to_string()]);
    }

    #[test]
    fn invalid_active_entry_is_removed() {
        let mut broken = FeatureFlag::active("broken", "user");
        broken.conditions[0].matcher_group.matchers.clear();

        let change = ChangeProcessor::new().process(&batch(vec![broken])).unwrap();

        assert!(change.to_add.is_empty());
        assert_eq!(change.to_remove, vec!["broken".to_string()]);
    }

    #[test]
    fn undecodable_entry_with_name_is_removed() {
        let raw = batch(vec![FeatureFlag::active("ok", "user")])
            .with_raw_entry(json!({"name": "bad", "status": 7}))
            .with_raw_entry(json!("not an object"));

        let change = ChangeProcessor::new().process(&raw).unwrap();

        assert_eq!(change.to_add.len(), 1);
        assert_eq!(change.to_remove, vec!["bad".to_string()]);
    }

    #[test]
    fn last_entry_for_a_name_wins() {
        let change = ChangeProcessor::new()
            .process(&batch(vec![
                FeatureFlag::archived("a"),
                FeatureFlag::active("a", "user").with_condition(Condition::all_keys("off", 0)),
            ]))
            .unwrap();

        assert_eq!(change.to_add.len(), 1);
        assert!(change.to_remove.is_empty());

        let change = ChangeProcessor::new()
            .process(&batch(vec![
                FeatureFlag::active("a", "user"),
                FeatureFlag::archived("a"),
            ]))
            .unwrap();

        assert!(change.to_add.is_empty());
        assert_eq!(change.to_remove, vec!["a".to_string()]);
    }

    #[test]
    fn missing_cursor_fails_whole_batch() {
        let raw = RawChangeBatch {
            since: Some(ChangeCursor::INITIAL),
            till: None,
            entries: vec![],
        };
        assert!(matches!(
            ChangeProcessor::new().process(&raw),
            Err(ProtocolError::MissingCursor("till"))
        ));
    }

    #[test]
    fn empty_batch_is_empty_change() {
        let change = ChangeProcessor::new()
            .process(&RawChangeBatch::new(
                ChangeCursor::new(5),
                ChangeCursor::new(5),
            ))
            .unwrap();
        assert!(change.is_empty());
    }

    proptest::proptest! {
        #[test]
        fn entries_never_fail_the_batch(
            names in proptest::collection::vec("[a-c]{0,2}", 0..8),
            statuses in proptest::collection::vec(0u8..3, 8),
        ) {
            let mut raw = RawChangeBatch::new(ChangeCursor::new(1), ChangeCursor::new(2));
            for (name, status) in names.iter().zip(&statuses) {
                let entry = match status {
                    0 => serde_json::to_value(FeatureFlag::active(name.clone(), "user")).unwrap(),
                    1 => serde_json::to_value(FeatureFlag::archived(name.clone())).unwrap(),
                    _ => json!({ "name": name, "conditions": "garbage" }),
                };
                raw = raw.with_raw_entry(entry);
            }

            let change = ChangeProcessor::new().process(&raw).unwrap();

            for flag in &change.to_add {
                proptest::prop_assert!(!change.to_remove.contains(&flag.name));
                proptest::prop_assert!(flag.is_active());
            }
            proptest::prop_assert!(change.to_remove.iter().all(|name| !name.is_empty()));
        }
    }
}
