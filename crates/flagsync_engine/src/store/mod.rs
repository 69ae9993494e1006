//! In-memory authoritative state with write-through persistence.

mod flags;
mod segments;
mod traffic_types;

pub use flags::{FlagsStore, UpdateOutcome};
pub use segments::SegmentsStore;
pub use traffic_types::TrafficTypeIndex;
