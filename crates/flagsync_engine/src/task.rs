//! Task contract and execution results.

use crate::fetcher::AuthOutcome;
use crate::store::UpdateOutcome;
use async_trait::async_trait;
use flagsync_protocol::ChangeCursor;
use std::fmt;
use uuid::Uuid;

/// Identifies a scheduled or submitted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(Uuid);

impl TaskId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskType {
    /// Full flags sync.
    FlagsSync,
    /// Flags sync up to a known change number.
    FlagsUpdate,
    /// Local kill of one flag.
    FlagKill,
    /// Segment membership sync.
    SegmentsSync,
    /// Events flush.
    EventsRecorder,
    /// Impressions flush.
    ImpressionsRecorder,
    /// Push channel authentication.
    StreamingAuth,
    /// Anything else.
    Generic,
}

/// Whether a task succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// The task did its work.
    Success,
    /// The task gave up.
    Error,
}

/// Result of a flags sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlagsSyncOutcome {
    /// What the last applied batch did to the store.
    pub outcome: UpdateOutcome,
    /// Store cursor after the sync.
    pub till: ChangeCursor,
}

/// Task-specific payload of a [`TaskExecutionInfo`].
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutput {
    /// No payload.
    None,
    /// Outcome of a flags sync.
    FlagsSync(FlagsSyncOutcome),
    /// Outcome of a streaming authentication.
    StreamingAuth(AuthOutcome),
}

/// What a task reports when it finishes.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskExecutionInfo {
    /// Success or error.
    pub status: TaskStatus,
    /// Kind of task.
    pub task_type: TaskType,
    /// Records the task could not deliver.
    pub non_sent_records: u64,
    /// Bytes the task could not deliver.
    pub non_sent_bytes: u64,
    /// Task-specific payload.
    pub output: TaskOutput,
}

impl TaskExecutionInfo {
    /// A successful result.
    pub fn success(task_type: TaskType) -> Self {
        Self {
            status: TaskStatus::Success,
            task_type,
            non_sent_records: 0,
            non_sent_bytes: 0,
            output: TaskOutput::None,
        }
    }

    /// A failed result.
    pub fn error(task_type: TaskType) -> Self {
        Self {
            status: TaskStatus::Error,
            ..Self::success(task_type)
        }
    }

    /// Sets the undelivered record counts.
    #[must_use]
    pub fn with_non_sent(mut self, records: u64, bytes: u64) -> Self {
        self.non_sent_records = records;
        self.non_sent_bytes = bytes;
        self
    }

    /// Sets the payload.
    #[must_use]
    pub fn with_output(mut self, output: TaskOutput) -> Self {
        self.output = output;
        self
    }

    /// Returns true on success.
    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Success
    }
}

/// A unit of work run by the [`TaskExecutor`](crate::TaskExecutor).
///
/// Failures are reported through the returned info, never by panicking.
/// A panic is caught and logged by the executor.
#[async_trait]
pub trait SyncTask: Send + Sync {
    /// Runs the task once.
    async fn execute(&self) -> TaskExecutionInfo;
}

/// Receives the result of every execution of a task.
pub trait TaskExecutionListener: Send + Sync {
    /// Called after the task body returns.
    fn task_executed(&self, info: &TaskExecutionInfo);
}
