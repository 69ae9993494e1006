//! Host-facing bootstrap object.
//!
//! A [`FlagsContext`] is created by the host application, started once,
//! told about lifecycle changes through [`FlagsContext::on_foreground`] and
//! [`FlagsContext::on_background`], and destroyed when no longer needed.
//! It owns every other component of the engine.

use crate::config::SyncConfig;
use crate::error::SyncResult;
use crate::executor::TaskExecutor;
use crate::fetcher::{ChangeFetcher, RecordSender, SegmentsFetcher};
use crate::persist::PersistWriter;
use crate::push::PushState;
use crate::readiness::{InternalEvent, ReadinessGate};
use crate::registry::InstanceRegistry;
use crate::store::{FlagsStore, SegmentsStore};
use crate::sync_manager::{StreamingParts, SyncManager};
use crate::synchronizer::Synchronizer;
use crate::task::TaskType;
use crate::tasks::{FlagsSyncer, RecorderTask, SegmentsSyncer};
use flagsync_protocol::{validate_key, Event, Impression};
use flagsync_storage::{
    InMemoryFlagsStorage, InMemoryRecordStorage, InMemorySegmentsStorage, PersistentFlagsStorage,
    PersistentRecordStorage, PersistentSegmentsStorage, StorageDir,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Remote collaborators of a context.
#[derive(Clone)]
pub struct Collaborators {
    /// Flag change feed.
    pub flags: Arc<dyn ChangeFetcher>,
    /// Segment membership.
    pub segments: Arc<dyn SegmentsFetcher>,
    /// Event intake.
    pub events: Arc<dyn RecordSender<Event>>,
    /// Impression intake.
    pub impressions: Arc<dyn RecordSender<Impression>>,
    /// Push channel; `None` to poll only.
    pub streaming: Option<StreamingParts>,
}

/// Builds a [`FlagsContext`].
pub struct FlagsContextBuilder {
    sdk_key: String,
    matching_key: String,
    remote: Collaborators,
    config: SyncConfig,
    flags_storage: Option<Arc<dyn PersistentFlagsStorage>>,
    segments_storage: Option<Arc<dyn PersistentSegmentsStorage>>,
    events_storage: Option<Arc<dyn PersistentRecordStorage<Event>>>,
    impressions_storage: Option<Arc<dyn PersistentRecordStorage<Impression>>>,
    registry: Option<Arc<InstanceRegistry>>,
}

impl FlagsContextBuilder {
    /// Sets the configuration.
    #[must_use]
    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Persists flags, segments and record queues under `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing cache file cannot be read.
    pub fn with_storage_dir(mut self, dir: &StorageDir) -> SyncResult<Self> {
        self.flags_storage = Some(Arc::new(dir.flags_storage()?));
        self.segments_storage = Some(Arc::new(dir.segments_storage(&self.matching_key)));
        self.events_storage = Some(Arc::new(dir.record_storage::<Event>("events")?));
        self.impressions_storage = Some(Arc::new(
            dir.record_storage::<Impression>("impressions")?,
        ));
        Ok(self)
    }

    /// Uses a custom flags cache.
    #[must_use]
    pub fn with_flags_storage(mut self, storage: Arc<dyn PersistentFlagsStorage>) -> Self {
        self.flags_storage = Some(storage);
        self
    }

    /// Uses a custom segments cache.
    #[must_use]
    pub fn with_segments_storage(mut self, storage: Arc<dyn PersistentSegmentsStorage>) -> Self {
        self.segments_storage = Some(storage);
        self
    }

    /// Uses custom record queues.
    #[must_use]
    pub fn with_record_storage(
        mut self,
        events: Arc<dyn PersistentRecordStorage<Event>>,
        impressions: Arc<dyn PersistentRecordStorage<Impression>>,
    ) -> Self {
        self.events_storage = Some(events);
        self.impressions_storage = Some(impressions);
        self
    }

    /// Registers the context in `registry`.
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<InstanceRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Loads the caches and wires every component. Nothing is fetched
    /// until [`FlagsContext::start`].
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid matching key, or
    /// [`SyncError::NoRuntime`](crate::SyncError::NoRuntime) outside a tokio
    /// runtime.
    pub fn build(self) -> SyncResult<FlagsContext> {
        validate_key(&self.matching_key)?;
        let config = self.config;
        let executor = TaskExecutor::new(&config)?;
        let readiness = ReadinessGate::new(config.ready_timeout)?;
        let persist = PersistWriter::spawn()?;

        let flags_storage = self
            .flags_storage
            .unwrap_or_else(|| Arc::new(InMemoryFlagsStorage::new()));
        let segments_storage = self
            .segments_storage
            .unwrap_or_else(|| Arc::new(InMemorySegmentsStorage::new()));
        let events_storage = self
            .events_storage
            .unwrap_or_else(|| Arc::new(InMemoryRecordStorage::new()));
        let impressions_storage = self
            .impressions_storage
            .unwrap_or_else(|| Arc::new(InMemoryRecordStorage::new()));

        let flags = Arc::new(FlagsStore::load(flags_storage, persist.clone()));
        let segments = Arc::new(SegmentsStore::load(segments_storage, persist.clone()));
        if flags.loaded_from_cache() {
            readiness.notify(InternalEvent::FlagsLoadedFromCache);
        }
        if segments.loaded_from_cache() {
            readiness.notify(InternalEvent::SegmentsLoadedFromCache);
        }

        let flags_syncer =
            FlagsSyncer::new(self.remote.flags, Arc::clone(&flags), config.retry.clone())
                .with_readiness(Arc::clone(&readiness));
        let segments_syncer = SegmentsSyncer::new(
            self.remote.segments,
            Arc::clone(&segments),
            self.matching_key.clone(),
            config.retry.clone(),
        )
        .with_readiness(Arc::clone(&readiness));
        let events = RecorderTask::new(
            events_storage,
            persist.clone(),
            self.remote.events,
            TaskType::EventsRecorder,
            config.records_per_push,
        );
        let impressions = RecorderTask::new(
            impressions_storage,
            persist.clone(),
            self.remote.impressions,
            TaskType::ImpressionsRecorder,
            config.records_per_push,
        );

        let synchronizer = Arc::new(Synchronizer::new(
            config.clone(),
            executor,
            Arc::new(flags_syncer),
            Arc::new(segments_syncer),
            events,
            impressions,
        ));
        let shutdown_grace = config.shutdown_grace;
        let manager = SyncManager::new(
            config,
            synchronizer,
            self.remote.streaming,
            self.matching_key.clone(),
        );

        if let Some(registry) = &self.registry {
            registry.register(&self.sdk_key);
        }
        info!(flags = flags.len(), "flags context created");

        Ok(FlagsContext {
            sdk_key: self.sdk_key,
            matching_key: self.matching_key,
            flags,
            segments,
            readiness,
            manager,
            persist,
            shutdown_grace,
            registry: self.registry,
            destroyed: AtomicBool::new(false),
        })
    }
}

/// One SDK instance for one matching key.
pub struct FlagsContext {
    sdk_key: String,
    matching_key: String,
    flags: Arc<FlagsStore>,
    segments: Arc<SegmentsStore>,
    readiness: Arc<ReadinessGate>,
    manager: SyncManager,
    persist: PersistWriter,
    shutdown_grace: Duration,
    registry: Option<Arc<InstanceRegistry>>,
    destroyed: AtomicBool,
}

impl FlagsContext {
    /// Starts building a context.
    pub fn builder(
        sdk_key: impl Into<String>,
        matching_key: impl Into<String>,
        remote: Collaborators,
    ) -> FlagsContextBuilder {
        FlagsContextBuilder {
            sdk_key: sdk_key.into(),
            matching_key: matching_key.into(),
            remote,
            config: SyncConfig::default(),
            flags_storage: None,
            segments_storage: None,
            events_storage: None,
            impressions_storage: None,
            registry: None,
        }
    }

    /// Starts syncing. Calling it again does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NoRuntime`](crate::SyncError::NoRuntime) outside
    /// a tokio runtime.
    pub fn start(&self) -> SyncResult<()> {
        if self.is_destroyed() {
            warn!("start called on a destroyed context");
            return Ok(());
        }
        self.manager.start()
    }

    /// The application came to the foreground.
    pub fn on_foreground(&self) {
        if !self.is_destroyed() {
            debug!("foreground, resuming sync");
            self.manager.resume();
        }
    }

    /// The application went to the background.
    pub fn on_background(&self) {
        if !self.is_destroyed() {
            debug!("background, pausing sync");
            self.manager.pause();
        }
    }

    /// Sends queued events and impressions now.
    pub fn flush(&self) {
        if !self.is_destroyed() {
            self.manager.flush();
        }
    }

    /// Queues a custom event. Returns false if the context is destroyed.
    ///
    /// An unknown traffic type is logged but the event is still queued.
    /// The event is handed to the cache writer; this never waits on disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the event is invalid.
    pub fn track(&self, event: Event) -> SyncResult<bool> {
        if self.is_destroyed() {
            warn!("track called on a destroyed context");
            return Ok(false);
        }
        event.validate()?;
        let known_type = self.flags.is_valid_traffic_type(&event.traffic_type_name);
        if !self.flags.is_empty() && !known_type {
            warn!(
                traffic_type = %event.traffic_type_name,
                "traffic type is not used by any flag, tracking anyway"
            );
        }
        self.manager.synchronizer().push_event(event);
        Ok(true)
    }

    /// Queues an impression without waiting on the cache.
    pub fn log_impression(&self, impression: Impression) {
        if !self.is_destroyed() {
            self.manager.synchronizer().push_impression(impression);
        }
    }

    /// Readiness signals.
    pub fn readiness(&self) -> &Arc<ReadinessGate> {
        &self.readiness
    }

    /// Flag definitions.
    pub fn flags(&self) -> &Arc<FlagsStore> {
        &self.flags
    }

    /// Segment membership of the matching key.
    pub fn segments(&self) -> &Arc<SegmentsStore> {
        &self.segments
    }

    /// The writer every cache write goes through.
    pub fn persistence(&self) -> &PersistWriter {
        &self.persist
    }

    /// The key this context evaluates for.
    pub fn matching_key(&self) -> &str {
        &self.matching_key
    }

    /// Returns true while polling is scheduled.
    pub fn is_polling(&self) -> bool {
        self.manager.is_polling()
    }

    /// Push connection state, if streaming is in use.
    pub fn push_state(&self) -> Option<PushState> {
        self.manager.push_state()
    }

    /// Returns true once [`destroy`](Self::destroy) was called.
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Flushes records, stops all background work, waits for pending cache
    /// writes and leaves the registry. Calling it again does nothing.
    pub async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.manager.stop().await;
        if tokio::time::timeout(self.shutdown_grace, self.persist.flush())
            .await
            .is_err()
        {
            warn!("cache writes still pending at shutdown");
        }
        if let Some(registry) = &self.registry {
            registry.deregister(&self.sdk_key);
        }
        info!("flags context destroyed");
    }
}
