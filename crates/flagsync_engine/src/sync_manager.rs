//! Glue between the push layer and the synchronizer.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::feedback::{
    feedback_channel, update_channel, FeedbackReceiver, PushFeedbackEvent, UpdateReceiver,
};
use crate::fetcher::StreamingAuthenticator;
use crate::push::{PushCoordinator, PushState, StreamingClient};
use crate::synchronizer::Synchronizer;
use crate::tasks::StreamingAuthTask;
use flagsync_protocol::{ChangeCursor, StreamNotification};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Streaming collaborators.
#[derive(Clone)]
pub struct StreamingParts {
    /// Issues streaming tokens.
    pub authenticator: Arc<dyn StreamingAuthenticator>,
    /// Opens streams.
    pub client: Arc<dyn StreamingClient>,
}

/// Starts syncing and reacts to what the push layer reports.
///
/// With streaming on, polling runs only while the push layer asks for it.
/// With streaming off, polling starts right away.
pub struct SyncManager {
    config: SyncConfig,
    synchronizer: Arc<Synchronizer>,
    streaming: Option<StreamingParts>,
    matching_key: String,
    push: Mutex<Option<PushCoordinator>>,
    started: AtomicBool,
    consumers: Mutex<Vec<JoinHandle<()>>>,
}

impl SyncManager {
    /// Creates a manager. Pass `None` for `streaming` to poll only.
    pub fn new(
        config: SyncConfig,
        synchronizer: Arc<Synchronizer>,
        streaming: Option<StreamingParts>,
        matching_key: impl Into<String>,
    ) -> Self {
        Self {
            config,
            synchronizer,
            streaming,
            matching_key: matching_key.into(),
            push: Mutex::new(None),
            started: AtomicBool::new(false),
            consumers: Mutex::new(Vec::new()),
        }
    }

    /// The synchronizer this manager drives.
    pub fn synchronizer(&self) -> &Arc<Synchronizer> {
        &self.synchronizer
    }

    /// Runs the initial syncs and starts polling or streaming.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NoRuntime`] outside a tokio runtime.
    pub fn start(&self) -> SyncResult<()> {
        let runtime = Handle::try_current().map_err(|_| SyncError::NoRuntime)?;
        if self.started.swap(true, Ordering::SeqCst) {
            debug!("sync manager already started");
            return Ok(());
        }

        self.synchronizer.synchronize_flags();
        self.synchronizer.synchronize_segments();
        self.synchronizer.start_periodic_recording();

        let streaming = match &self.streaming {
            Some(parts) if self.config.streaming_enabled => parts.clone(),
            _ => {
                info!("streaming disabled, polling");
                self.synchronizer.start_periodic_fetching();
                return Ok(());
            }
        };

        let (feedback_tx, feedback_rx) = feedback_channel();
        let (updates_tx, updates_rx) = update_channel();
        let coordinator = PushCoordinator::spawn(
            &self.config,
            StreamingAuthTask::new(streaming.authenticator, self.matching_key.clone()),
            streaming.client,
            feedback_tx,
            updates_tx,
        )?;
        *self.push.lock() = Some(coordinator);

        let mut consumers = self.consumers.lock();
        consumers.push(runtime.spawn(consume_feedback(
            Arc::clone(&self.synchronizer),
            feedback_rx,
        )));
        consumers.push(runtime.spawn(consume_updates(Arc::clone(&self.synchronizer), updates_rx)));
        info!("sync manager started with streaming");
        Ok(())
    }

    /// Returns true while periodic fetching is scheduled.
    pub fn is_polling(&self) -> bool {
        self.synchronizer.is_polling()
    }

    /// Connection state of the push layer, if streaming is in use.
    pub fn push_state(&self) -> Option<PushState> {
        self.push.lock().as_ref().map(|push| push.state())
    }

    /// Suspends syncing and closes the stream.
    pub fn pause(&self) {
        self.synchronizer.pause();
        if let Some(push) = self.push.lock().as_ref() {
            push.pause();
        }
    }

    /// Resumes syncing and reconnects the stream.
    pub fn resume(&self) {
        self.synchronizer.resume();
        if let Some(push) = self.push.lock().as_ref() {
            push.resume();
        }
    }

    /// Flushes all records now.
    pub fn flush(&self) {
        self.synchronizer.flush();
    }

    /// Stops streaming, the consumers and the synchronizer.
    pub async fn stop(&self) {
        let push = self.push.lock().take();
        if let Some(push) = push {
            push.stop().await;
        }
        for consumer in self.consumers.lock().drain(..) {
            consumer.abort();
        }
        self.synchronizer.destroy().await;
        info!("sync manager stopped");
    }
}

async fn consume_feedback(synchronizer: Arc<Synchronizer>, mut feedback: FeedbackReceiver) {
    while let Some(event) = feedback.recv().await {
        debug!(?event, "push feedback");
        match event {
            PushFeedbackEvent::EnablePolling => synchronizer.start_periodic_fetching(),
            PushFeedbackEvent::DisablePolling => synchronizer.stop_periodic_fetching(),
            PushFeedbackEvent::StreamingConnected => {
                synchronizer.synchronize_flags();
                synchronizer.synchronize_segments();
            }
        }
    }
}

async fn consume_updates(synchronizer: Arc<Synchronizer>, mut updates: UpdateReceiver) {
    while let Some(notification) = updates.recv().await {
        match notification {
            StreamNotification::FlagsUpdate { change_number } => {
                synchronizer.synchronize_flags_to(ChangeCursor::new(change_number));
            }
            StreamNotification::FlagKill {
                split_name,
                default_treatment,
                change_number,
            } => {
                synchronizer.kill_flag(&split_name, &default_treatment, change_number);
            }
            StreamNotification::SegmentsUpdate => {
                synchronizer.synchronize_segments();
            }
        }
    }
}
