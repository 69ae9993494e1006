//! Sync orchestration.

use crate::config::SyncConfig;
use crate::executor::TaskExecutor;
use crate::recorder_helper::RecorderSyncHelper;
use crate::task::{SyncTask, TaskExecutionListener, TaskId};
use crate::tasks::{
    FlagKillTask, FlagsSyncTask, FlagsSyncer, FlagsUpdateTask, RecorderTask, SegmentsSyncTask,
    SegmentsSyncer,
};
use flagsync_protocol::{ChangeCursor, Event, Impression, InBytesSizable};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

/// A record queue with its flush task and thresholds.
struct Recorder<T> {
    task: Arc<RecorderTask<T>>,
    helper: Arc<RecorderSyncHelper<T>>,
}

impl<T> Recorder<T>
where
    T: InBytesSizable + Send + Sync + 'static,
{
    fn new(task: RecorderTask<T>, config: &SyncConfig) -> Self {
        let helper = RecorderSyncHelper::new(
            Arc::clone(task.storage()),
            task.persist().clone(),
            task.task_type(),
            config.record_queue_size,
            config.record_queue_bytes,
        );
        Self {
            task: Arc::new(task),
            helper: Arc::new(helper),
        }
    }

    fn task(&self) -> Arc<dyn SyncTask> {
        Arc::clone(&self.task) as Arc<dyn SyncTask>
    }

    fn listener(&self) -> Arc<dyn TaskExecutionListener> {
        Arc::clone(&self.helper) as Arc<dyn TaskExecutionListener>
    }
}

#[derive(Default)]
struct Scheduled {
    flags: Option<TaskId>,
    segments: Option<TaskId>,
    recorders: Vec<TaskId>,
}

/// Runs flag, segment and recorder work on a [`TaskExecutor`].
///
/// One-shot syncs retry with backoff. Periodic syncs do not; the next tick
/// is the retry.
pub struct Synchronizer {
    config: SyncConfig,
    executor: TaskExecutor,
    flags: Arc<FlagsSyncer>,
    segments: Arc<SegmentsSyncer>,
    events: Recorder<Event>,
    impressions: Recorder<Impression>,
    scheduled: Mutex<Scheduled>,
}

impl Synchronizer {
    /// Creates a synchronizer. Nothing runs until a method is called.
    pub fn new(
        config: SyncConfig,
        executor: TaskExecutor,
        flags: Arc<FlagsSyncer>,
        segments: Arc<SegmentsSyncer>,
        events: RecorderTask<Event>,
        impressions: RecorderTask<Impression>,
    ) -> Self {
        let events = Recorder::new(events, &config);
        let impressions = Recorder::new(impressions, &config);
        Self {
            config,
            executor,
            flags,
            segments,
            events,
            impressions,
            scheduled: Mutex::new(Scheduled::default()),
        }
    }

    /// The executor this synchronizer runs on.
    pub fn executor(&self) -> &TaskExecutor {
        &self.executor
    }

    /// Syncs flags once, retrying on failure.
    pub fn synchronize_flags(&self) -> Option<TaskId> {
        let task = FlagsSyncTask::new(Arc::clone(&self.flags), true);
        self.executor.submit(Arc::new(task), None)
    }

    /// Syncs flags up to `target` unless the store is already there.
    pub fn synchronize_flags_to(&self, target: ChangeCursor) -> Option<TaskId> {
        let task = FlagsUpdateTask::new(Arc::clone(&self.flags), target);
        self.executor.submit(Arc::new(task), None)
    }

    /// Kills a flag locally, then syncs up to the kill's change number.
    pub fn kill_flag(
        &self,
        name: &str,
        default_treatment: &str,
        change_number: i64,
    ) -> Option<TaskId> {
        let kill = FlagKillTask::new(
            Arc::clone(self.flags.store()),
            name,
            default_treatment,
            change_number,
        );
        self.executor.submit(Arc::new(kill), None)?;
        self.synchronize_flags_to(ChangeCursor::new(change_number))
    }

    /// Syncs segment membership once, retrying on failure.
    pub fn synchronize_segments(&self) -> Option<TaskId> {
        let task = SegmentsSyncTask::new(Arc::clone(&self.segments), true);
        self.executor.submit(Arc::new(task), None)
    }

    /// Starts polling flags and segments. Does nothing if already polling.
    pub fn start_periodic_fetching(&self) {
        let mut scheduled = self.scheduled.lock();
        if scheduled.flags.is_some() || scheduled.segments.is_some() {
            debug!("periodic fetching already running");
            return;
        }

        let flags_period = self.config.polling_period(self.config.flags_refresh_rate);
        let segments_period = self.config.polling_period(self.config.segments_refresh_rate);
        scheduled.flags = self.executor.schedule(
            Arc::new(FlagsSyncTask::new(Arc::clone(&self.flags), false)),
            flags_period,
            flags_period,
            None,
        );
        scheduled.segments = self.executor.schedule(
            Arc::new(SegmentsSyncTask::new(Arc::clone(&self.segments), false)),
            segments_period,
            segments_period,
            None,
        );
        info!(
            flags_secs = flags_period.as_secs(),
            segments_secs = segments_period.as_secs(),
            "periodic fetching started"
        );
    }

    /// Stops polling. Does nothing if not polling.
    pub fn stop_periodic_fetching(&self) {
        let mut scheduled = self.scheduled.lock();
        let ids = [scheduled.flags.take(), scheduled.segments.take()];
        if ids.iter().all(Option::is_none) {
            return;
        }
        for id in ids.into_iter().flatten() {
            self.executor.stop_task(id);
        }
        info!("periodic fetching stopped");
    }

    /// Returns true while periodic fetching is scheduled.
    pub fn is_polling(&self) -> bool {
        let scheduled = self.scheduled.lock();
        scheduled.flags.is_some() || scheduled.segments.is_some()
    }

    /// Starts flushing both record queues periodically.
    pub fn start_periodic_recording(&self) {
        let mut scheduled = self.scheduled.lock();
        if !scheduled.recorders.is_empty() {
            return;
        }
        let period = self.config.records_refresh_rate;
        let ids = [
            self.executor.schedule(
                self.events.task(),
                period,
                period,
                Some(self.events.listener()),
            ),
            self.executor.schedule(
                self.impressions.task(),
                period,
                period,
                Some(self.impressions.listener()),
            ),
        ];
        scheduled.recorders = ids.into_iter().flatten().collect();
        debug!(period_secs = period.as_secs(), "periodic recording started");
    }

    /// Stops periodic flushing.
    pub fn stop_periodic_recording(&self) {
        for id in self.scheduled.lock().recorders.drain(..) {
            self.executor.stop_task(id);
        }
    }

    /// Flushes both record queues now.
    pub fn flush(&self) {
        self.executor.submit(self.events.task(), Some(self.events.listener()));
        self.executor
            .submit(self.impressions.task(), Some(self.impressions.listener()));
    }

    /// Queues an event, flushing events if a threshold was crossed.
    /// Never waits on the cache.
    pub fn push_event(&self, event: Event) {
        if self.events.helper.push_and_check_flush(event) {
            self.executor
                .submit(self.events.task(), Some(self.events.listener()));
        }
    }

    /// Queues an impression, flushing impressions if a threshold was
    /// crossed. Never waits on the cache.
    pub fn push_impression(&self, impression: Impression) {
        if self.impressions.helper.push_and_check_flush(impression) {
            self.executor
                .submit(self.impressions.task(), Some(self.impressions.listener()));
        }
    }

    /// Suppresses scheduled work until [`resume`](Self::resume).
    pub fn pause(&self) {
        self.executor.pause();
    }

    /// Re-enables scheduled work.
    pub fn resume(&self) {
        self.executor.resume();
    }

    /// Flushes what can be flushed and stops the executor.
    pub async fn destroy(&self) {
        self.stop_periodic_fetching();
        self.stop_periodic_recording();

        for recorder in [self.events.task(), self.impressions.task()] {
            let info = recorder.execute().await;
            if !info.is_success() {
                debug!(
                    task_type = ?info.task_type,
                    records = info.non_sent_records,
                    "records left unsent at shutdown"
                );
            }
        }

        self.executor.stop().await;
        info!("synchronizer destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{SyncError, SyncResult};
    use crate::fetcher::{ChangeFetcher, RecordSender, SegmentsFetcher};
    use crate::persist::PersistWriter;
    use crate::store::{FlagsStore, SegmentsStore};
    use crate::task::TaskType;
    use async_trait::async_trait;
    use flagsync_protocol::{FeatureFlag, RawChangeBatch};
    use flagsync_storage::{
        InMemoryFlagsStorage, InMemoryRecordStorage, InMemorySegmentsStorage,
        PersistentRecordStorage,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct Remote {
        flag_fetches: AtomicUsize,
        segment_fetches: AtomicUsize,
        sent: AtomicUsize,
        fail_sends: bool,
    }

    #[async_trait]
    impl ChangeFetcher for Remote {
        async fn fetch(&self, since: ChangeCursor) -> SyncResult<RawChangeBatch> {
            self.flag_fetches.fetch_add(1, Ordering::SeqCst);
            if since.is_initial() {
                let flags = [FeatureFlag::active("a", "user")];
                Ok(RawChangeBatch::from_flags(since, ChangeCursor::new(10), flags)?)
            } else {
                Ok(RawChangeBatch::new(since, since))
            }
        }
    }

    #[async_trait]
    impl SegmentsFetcher for Remote {
        async fn fetch(&self, _matching_key: &str) -> SyncResult<Vec<String>> {
            self.segment_fetches.fetch_add(1, Ordering::SeqCst);
            Ok(vec!["beta".into()])
        }
    }

    impl Remote {
        fn post(&self, count: usize) -> SyncResult<()> {
            if self.fail_sends {
                return Err(SyncError::network_retryable("unavailable"));
            }
            self.sent.fetch_add(count, Ordering::SeqCst);
            Ok(())
        }
    }

    #[async_trait]
    impl RecordSender<Event> for Remote {
        async fn send(&self, records: &[Event]) -> SyncResult<()> {
            self.post(records.len())
        }
    }

    #[async_trait]
    impl RecordSender<Impression> for Remote {
        async fn send(&self, records: &[Impression]) -> SyncResult<()> {
            self.post(records.len())
        }
    }

    struct Fixture {
        sync: Synchronizer,
        queue: Arc<InMemoryRecordStorage<Event>>,
        persist: PersistWriter,
    }

    fn synchronizer(config: SyncConfig, remote: Arc<Remote>) -> Fixture {
        let executor = TaskExecutor::new(&config).unwrap();
        let persist = PersistWriter::spawn().unwrap();
        let flags_store = Arc::new(FlagsStore::load(
            Arc::new(InMemoryFlagsStorage::new()),
            persist.clone(),
        ));
        let segments_store = Arc::new(SegmentsStore::load(
            Arc::new(InMemorySegmentsStorage::new()),
            persist.clone(),
        ));
        let flags = FlagsSyncer::new(remote.clone(), flags_store, config.retry.clone());
        let segments =
            SegmentsSyncer::new(remote.clone(), segments_store, "user-1", config.retry.clone());
        let events_queue = Arc::new(InMemoryRecordStorage::<Event>::new());
        let events = RecorderTask::<Event>::new(
            events_queue.clone(),
            persist.clone(),
            remote.clone(),
            TaskType::EventsRecorder,
            config.records_per_push,
        );
        let impressions = RecorderTask::<Impression>::new(
            Arc::new(InMemoryRecordStorage::new()),
            persist.clone(),
            remote,
            TaskType::ImpressionsRecorder,
            config.records_per_push,
        );
        let synchronizer = Synchronizer::new(
            config,
            executor,
            Arc::new(flags),
            Arc::new(segments),
            events,
            impressions,
        );
        Fixture {
            sync: synchronizer,
            queue: events_queue,
            persist,
        }
    }

    fn config() -> SyncConfig {
        SyncConfig::default()
            .with_randomized_polling(false)
            .with_flags_refresh_rate(Duration::from_secs(10))
            .with_segments_refresh_rate(Duration::from_secs(10))
    }

    fn event(i: i64) -> Event {
        Event::new("user-1", "user", "click", i)
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_fetching_is_idempotent() {
        let remote = Arc::new(Remote::default());
        let sync = synchronizer(config(), remote.clone()).sync;

        sync.start_periodic_fetching();
        sync.start_periodic_fetching();
        assert!(sync.is_polling());

        tokio::time::sleep(Duration::from_millis(10_500)).await;
        assert_eq!(remote.flag_fetches.load(Ordering::SeqCst), 2);
        assert_eq!(remote.segment_fetches.load(Ordering::SeqCst), 1);

        sync.stop_periodic_fetching();
        assert!(!sync.is_polling());
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(remote.segment_fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn kill_then_targeted_update() {
        let remote = Arc::new(Remote::default());
        let sync = synchronizer(config(), remote.clone()).sync;
        sync.synchronize_flags();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let store = Arc::clone(sync.flags.store());
        assert_eq!(store.till(), ChangeCursor::new(10));
        let fetches = remote.flag_fetches.load(Ordering::SeqCst);

        sync.kill_flag("a", "off", 5);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(store.get("a").unwrap().killed);
        assert_eq!(remote.flag_fetches.load(Ordering::SeqCst), fetches);
    }

    #[tokio::test(start_paused = true)]
    async fn crossing_threshold_flushes() {
        let remote = Arc::new(Remote::default());
        let f = synchronizer(
            config().with_record_queue_limits(2, u64::MAX),
            remote.clone(),
        );

        f.sync.push_event(event(1));
        f.sync.push_event(event(2));
        f.persist.flush().await;
        assert_eq!(f.queue.len(), 2);

        f.sync.push_event(event(3));
        tokio::time::sleep(Duration::from_millis(10)).await;
        f.persist.flush().await;
        assert!(f.queue.is_empty());
        assert_eq!(remote.sent.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn destroy_flushes_and_stops() {
        let remote = Arc::new(Remote::default());
        let f = synchronizer(config(), remote.clone());
        f.sync.push_event(event(1));

        f.sync.destroy().await;

        assert!(f.queue.is_empty());
        assert_eq!(remote.sent.load(Ordering::SeqCst), 1);
        assert!(f.sync.executor().is_stopped());
        assert!(f.sync.synchronize_flags().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_flush_keeps_records() {
        let remote = Arc::new(Remote {
            fail_sends: true,
            ..Remote::default()
        });
        let f = synchronizer(config(), remote);
        f.sync.push_event(event(1));

        f.sync.flush();
        tokio::time::sleep(Duration::from_millis(10)).await;
        f.persist.flush().await;

        assert_eq!(f.queue.len(), 1);
    }
}
