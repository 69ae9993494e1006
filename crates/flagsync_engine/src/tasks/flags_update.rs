//! Push-triggered flag tasks.

use super::flags_sync::FlagsSyncer;
use crate::store::{FlagsStore, UpdateOutcome};
use crate::task::{FlagsSyncOutcome, SyncTask, TaskExecutionInfo, TaskOutput, TaskType};
use async_trait::async_trait;
use flagsync_protocol::ChangeCursor;
use std::sync::Arc;
use tracing::{debug, error};

/// Syncs flags up to a change number announced by the push channel.
///
/// Does nothing when the store already reached the target.
pub struct FlagsUpdateTask {
    syncer: Arc<FlagsSyncer>,
    target: ChangeCursor,
}

impl FlagsUpdateTask {
    /// Creates a task targeting `target`.
    pub fn new(syncer: Arc<FlagsSyncer>, target: ChangeCursor) -> Self {
        Self { syncer, target }
    }
}

#[async_trait]
impl SyncTask for FlagsUpdateTask {
    async fn execute(&self) -> TaskExecutionInfo {
        let till = self.syncer.store().till();
        if till >= self.target {
            debug!(till = %till, target = %self.target, "flags already up to date");
            let outcome = FlagsSyncOutcome {
                outcome: UpdateOutcome::Unchanged,
                till,
            };
            return TaskExecutionInfo::success(TaskType::FlagsUpdate)
                .with_output(TaskOutput::FlagsSync(outcome));
        }

        match self.syncer.sync(true).await {
            Ok(outcome) => TaskExecutionInfo::success(TaskType::FlagsUpdate)
                .with_output(TaskOutput::FlagsSync(outcome)),
            Err(e) => {
                error!(error = %e, target = %self.target, "targeted flags update failed");
                TaskExecutionInfo::error(TaskType::FlagsUpdate)
            }
        }
    }
}

/// Kills a flag locally.
pub struct FlagKillTask {
    store: Arc<FlagsStore>,
    name: String,
    default_treatment: String,
    change_number: i64,
}

impl FlagKillTask {
    /// Creates a kill for `name`.
    pub fn new(
        store: Arc<FlagsStore>,
        name: impl Into<String>,
        default_treatment: impl Into<String>,
        change_number: i64,
    ) -> Self {
        Self {
            store,
            name: name.into(),
            default_treatment: default_treatment.into(),
            change_number,
        }
    }
}

#[async_trait]
impl SyncTask for FlagKillTask {
    async fn execute(&self) -> TaskExecutionInfo {
        self.store
            .kill(&self.name, &self.default_treatment, self.change_number);
        TaskExecutionInfo::success(TaskType::FlagKill)
    }
}
