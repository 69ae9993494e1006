//! Property-based test generators using proptest.
//!
//! Names and traffic types are drawn from small pools so that generated
//! sequences keep replacing, archiving and re-adding the same flags.

use flagsync_protocol::{FeatureFlag, FlagStatus};
use proptest::prelude::*;

/// Strategy for flag names from a small pool.
pub fn flag_name_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["alpha", "beta", "gamma", "delta", "epsilon"]).prop_map(String::from)
}

/// Strategy for traffic types, in mixed case.
pub fn traffic_type_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["user", "User", "account", "ACCOUNT", "device"])
        .prop_map(String::from)
}

/// Strategy for a flag that is either active with some traffic type or
/// archived.
pub fn flag_strategy() -> impl Strategy<Value = FeatureFlag> {
    (flag_name_strategy(), traffic_type_strategy(), any::<bool>(), 0i64..1_000).prop_map(
        |(name, traffic_type, active, change_number)| {
            let flag = if active {
                FeatureFlag::active(name, traffic_type)
            } else {
                FeatureFlag::new(name, FlagStatus::Archived).with_traffic_type(traffic_type)
            };
            flag.with_change_number(change_number)
        },
    )
}

/// Strategy for the flags of one batch.
pub fn batch_flags_strategy() -> impl Strategy<Value = Vec<FeatureFlag>> {
    prop::collection::vec(flag_strategy(), 0..6)
}

/// Strategy for a sequence of batches, each with a positive cursor step.
pub fn batch_sequence_strategy() -> impl Strategy<Value = Vec<(i64, Vec<FeatureFlag>)>> {
    prop::collection::vec((1i64..50, batch_flags_strategy()), 1..12)
}

/// Strategy for segment memberships.
pub fn segments_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(
        prop::string::string_regex("[a-z]{1,8}").expect("Invalid regex"),
        0..6,
    )
}
