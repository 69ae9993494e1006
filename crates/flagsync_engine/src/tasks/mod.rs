//! Sync and recording tasks.
//!
//! Every task reports through a [`TaskExecutionInfo`](crate::TaskExecutionInfo)
//! and never panics on collaborator failures.

mod flags_sync;
mod flags_update;
mod recorder;
mod segments_sync;
mod streaming_auth;

pub use flags_sync::{FlagsSyncTask, FlagsSyncer};
pub use flags_update::{FlagKillTask, FlagsUpdateTask};
pub use recorder::RecorderTask;
pub use segments_sync::{SegmentsSyncTask, SegmentsSyncer};
pub use streaming_auth::StreamingAuthTask;
