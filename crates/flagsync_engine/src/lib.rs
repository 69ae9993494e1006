//! # flagsync Engine
//!
//! Synchronization, scheduling and readiness engine for flagsync.
//!
//! This crate provides:
//! - Flag and segment stores with cursor-checked atomic updates
//! - One-shot, periodic and push-triggered sync tasks with retry/backoff
//! - A pausable, cancellable periodic task executor
//! - A push coordinator with keep-alive watchdog and reconnect backoff
//! - A readiness gate with exactly-once notifications
//! - Impression and event recorders with flush thresholds
//! - An ordered background writer for every cache write
//! - A host-owned lifecycle context and instance registry
//!
//! ## Architecture
//!
//! Data flows one way:
//! 1. A [`ChangeFetcher`] returns a raw batch after the store's cursor
//! 2. The protocol crate's `ChangeProcessor` normalizes it
//! 3. [`FlagsStore::update`] applies it if its `since` matches the cursor
//! 4. The [`ReadinessGate`] is told what arrived
//!
//! The [`PushCoordinator`] never touches the stores. It reports through a
//! feedback channel and the [`SyncManager`] turns those reports into
//! synchronizer calls.
//!
//! ## Key Invariants
//!
//! - The flags cursor never decreases
//! - Stale or raced batches are dropped, never merged
//! - A traffic type is valid iff an active flag uses it
//! - `ReadyFromCache`, `Ready` and `ReadyTimedOut` fire at most once each
//! - Pausing never interrupts a running task
//! - Nothing runs after the executor is stopped
//! - Callers never wait on a cache write

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

mod backoff;
mod config;
mod context;
mod error;
mod executor;
mod feedback;
mod fetcher;
mod persist;
mod push;
mod readiness;
mod recorder_helper;
mod registry;
mod store;
mod sync_manager;
mod synchronizer;
mod task;
mod tasks;

pub use backoff::BackoffCounter;
pub use config::{randomized_period, RetryConfig, SyncConfig};
pub use context::{Collaborators, FlagsContext, FlagsContextBuilder};
pub use error::{SyncError, SyncResult};
pub use executor::TaskExecutor;
pub use feedback::{
    feedback_channel, update_channel, FeedbackReceiver, FeedbackSender, PushFeedbackEvent,
    UpdateReceiver, UpdateSender,
};
pub use fetcher::{
    AuthOutcome, ChangeFetcher, RecordSender, SegmentsFetcher, StreamingAuthenticator,
};
pub use persist::PersistWriter;
pub use push::{PushCoordinator, PushEventSink, PushState, StreamingClient};
pub use readiness::{InternalEvent, ReadinessGate, ReadinessState, SdkEvent};
pub use recorder_helper::RecorderSyncHelper;
pub use registry::InstanceRegistry;
pub use store::{FlagsStore, SegmentsStore, TrafficTypeIndex, UpdateOutcome};
pub use sync_manager::{StreamingParts, SyncManager};
pub use synchronizer::Synchronizer;
pub use task::{
    FlagsSyncOutcome, SyncTask, TaskExecutionInfo, TaskExecutionListener, TaskId, TaskOutput,
    TaskStatus, TaskType,
};
pub use tasks::{
    FlagKillTask, FlagsSyncTask, FlagsSyncer, FlagsUpdateTask, RecorderTask, SegmentsSyncTask,
    SegmentsSyncer, StreamingAuthTask,
};
