//! Pausable periodic task executor.
//!
//! Each scheduled task runs in its own tokio loop that waits for the next
//! tick and then hands the body to the worker pool. Bodies run in their own
//! tokio task so a panic is caught and logged instead of killing the loop.
//!
//! Pausing never interrupts a body that is already running. A tick that
//! comes due while paused is dropped; resuming waits for the next regular
//! tick. One-shot submissions made while paused wait for resume.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::task::{SyncTask, TaskExecutionListener, TaskId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{watch, Notify, Semaphore};
use tokio::task::{AbortHandle, JoinError, JoinHandle};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Bodies currently executing, keyed by run number.
#[derive(Default)]
struct Running {
    stopped: bool,
    next_run: u64,
    bodies: HashMap<u64, AbortHandle>,
}

struct Inner {
    handle: Handle,
    paused: watch::Sender<bool>,
    workers: Arc<Semaphore>,
    shutdown_grace: Duration,
    loops: Mutex<HashMap<TaskId, JoinHandle<()>>>,
    running: Mutex<Running>,
    idle: Notify,
}

/// Runs scheduled and submitted [`SyncTask`]s on the current tokio runtime.
///
/// Cloning is cheap; clones share the same pool and pause state.
///
/// # Example
///
/// ```rust,ignore
/// let executor = TaskExecutor::new(&SyncConfig::default())?;
/// let id = executor.schedule(task, Duration::ZERO, Duration::from_secs(60), None);
/// executor.pause();
/// executor.resume();
/// executor.stop().await;
/// ```
#[derive(Clone)]
pub struct TaskExecutor {
    inner: Arc<Inner>,
}

impl TaskExecutor {
    /// Creates an executor bound to the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NoRuntime`] outside a tokio runtime.
    pub fn new(config: &SyncConfig) -> SyncResult<Self> {
        let handle = Handle::try_current().map_err(|_| SyncError::NoRuntime)?;
        Ok(Self::with_handle(handle, config))
    }

    /// Creates an executor that spawns on the given runtime.
    pub fn with_handle(handle: Handle, config: &SyncConfig) -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                handle,
                paused,
                workers: Arc::new(Semaphore::new(config.worker_count.max(1))),
                shutdown_grace: config.shutdown_grace,
                loops: Mutex::new(HashMap::new()),
                running: Mutex::new(Running::default()),
                idle: Notify::new(),
            }),
        }
    }

    /// Runs `task` every `period`, the first time after `initial_delay`.
    ///
    /// Returns `None` once the executor has been stopped.
    pub fn schedule(
        &self,
        task: Arc<dyn SyncTask>,
        initial_delay: Duration,
        period: Duration,
        listener: Option<Arc<dyn TaskExecutionListener>>,
    ) -> Option<TaskId> {
        if self.is_stopped() {
            debug!("executor stopped, not scheduling task");
            return None;
        }

        let period = if period < MIN_PERIOD {
            warn!(period_ms = period.as_millis() as u64, "period too small, clamping");
            MIN_PERIOD
        } else {
            period
        };

        let id = TaskId::new();
        let inner = Arc::clone(&self.inner);
        let mut loops = self.inner.loops.lock();
        let handle = self.inner.handle.spawn(async move {
            let mut ticker = interval_at(Instant::now() + initial_delay, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let paused = inner.paused.subscribe();
            loop {
                ticker.tick().await;
                let is_paused = *paused.borrow();
                if is_paused {
                    debug!(task_id = %id, "skipping tick while paused");
                    continue;
                }
                let run = inner.handle.spawn(Inner::run_once(
                    Arc::clone(&inner),
                    Arc::clone(&task),
                    listener.clone(),
                ));
                log_run_failure(id, run.await);
            }
        });
        loops.insert(id, handle);
        debug!(task_id = %id, period_ms = period.as_millis() as u64, "scheduled periodic task");
        Some(id)
    }

    /// Runs `task` once, as soon as the executor is not paused.
    ///
    /// Returns `None` once the executor has been stopped.
    pub fn submit(
        &self,
        task: Arc<dyn SyncTask>,
        listener: Option<Arc<dyn TaskExecutionListener>>,
    ) -> Option<TaskId> {
        if self.is_stopped() {
            debug!("executor stopped, not submitting task");
            return None;
        }

        let id = TaskId::new();
        let inner = Arc::clone(&self.inner);
        let mut loops = self.inner.loops.lock();
        let handle = self.inner.handle.spawn(async move {
            let mut paused = inner.paused.subscribe();
            let resumed = paused.wait_for(|paused| !*paused).await.is_ok();
            if resumed {
                let run = inner
                    .handle
                    .spawn(Inner::run_once(Arc::clone(&inner), task, listener));
                log_run_failure(id, run.await);
            }
            inner.loops.lock().remove(&id);
        });
        loops.insert(id, handle);
        Some(id)
    }

    /// Cancels future runs of a task. A body already running completes.
    pub fn stop_task(&self, id: TaskId) {
        if let Some(handle) = self.inner.loops.lock().remove(&id) {
            handle.abort();
            debug!(task_id = %id, "stopped task");
        }
    }

    /// Suppresses future runs. Idempotent.
    pub fn pause(&self) {
        if !self.inner.paused.send_replace(true) {
            info!("executor paused");
        }
    }

    /// Re-enables future runs. Idempotent.
    pub fn resume(&self) {
        if self.inner.paused.send_replace(false) {
            info!("executor resumed");
        }
    }

    /// Returns true while paused.
    pub fn is_paused(&self) -> bool {
        *self.inner.paused.borrow()
    }

    /// Returns true once [`stop`](Self::stop) has been called.
    pub fn is_stopped(&self) -> bool {
        self.inner.running.lock().stopped
    }

    /// Number of task bodies currently running.
    pub fn running_count(&self) -> usize {
        self.inner.running.lock().bodies.len()
    }

    /// Stops the executor.
    ///
    /// No new work is accepted. In-flight bodies get the shutdown grace
    /// period to finish and are aborted afterwards. Calling `stop` again is
    /// a no-op.
    pub async fn stop(&self) {
        {
            let mut running = self.inner.running.lock();
            if running.stopped {
                return;
            }
            running.stopped = true;
        }

        for (_, handle) in self.inner.loops.lock().drain() {
            handle.abort();
        }

        let grace = self.inner.shutdown_grace;
        if tokio::time::timeout(grace, self.inner.wait_idle()).await.is_err() {
            let mut running = self.inner.running.lock();
            warn!(
                in_flight = running.bodies.len(),
                grace_ms = grace.as_millis() as u64,
                "tasks still running after shutdown grace, aborting"
            );
            for (_, body) in running.bodies.drain() {
                body.abort();
            }
        }
        info!("executor stopped");
    }
}

fn log_run_failure(id: TaskId, result: Result<(), JoinError>) {
    match result {
        Ok(()) => {}
        Err(e) if e.is_panic() => error!(task_id = %id, error = %e, "task run panicked"),
        Err(_) => debug!(task_id = %id, "task run was cancelled"),
    }
}

impl Inner {
    async fn run_once(
        inner: Arc<Inner>,
        task: Arc<dyn SyncTask>,
        listener: Option<Arc<dyn TaskExecutionListener>>,
    ) {
        let Ok(_permit) = Arc::clone(&inner.workers).acquire_owned().await else {
            return;
        };

        let (run_id, body) = {
            let mut running = inner.running.lock();
            if running.stopped {
                return;
            }
            let run_id = running.next_run;
            running.next_run += 1;
            let body = inner.handle.spawn(async move { task.execute().await });
            running.bodies.insert(run_id, body.abort_handle());
            (run_id, body)
        };

        let result = body.await;
        inner.running.lock().bodies.remove(&run_id);
        inner.idle.notify_waiters();

        match result {
            Ok(info) => {
                debug!(task_type = ?info.task_type, status = ?info.status, "task executed");
                if let Some(listener) = listener {
                    listener.task_executed(&info);
                }
            }
            Err(e) if e.is_panic() => {
                error!(error = %e, "task panicked");
            }
            Err(_) => {
                debug!("task body aborted");
            }
        }
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            let idle = self.running.lock().bodies.is_empty();
            if idle {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{TaskExecutionInfo, TaskType};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingTask {
        runs: AtomicUsize,
        work: Duration,
    }

    impl CountingTask {
        fn new(work: Duration) -> Arc<Self> {
            Arc::new(Self {
                runs: AtomicUsize::new(0),
                work,
            })
        }

        fn runs(&self) -> usize {
            self.runs.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SyncTask for CountingTask {
        async fn execute(&self) -> TaskExecutionInfo {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if !self.work.is_zero() {
                tokio::time::sleep(self.work).await;
            }
            TaskExecutionInfo::success(TaskType::Generic)
        }
    }

    struct PanickingTask;

    #[async_trait]
    impl SyncTask for PanickingTask {
        async fn execute(&self) -> TaskExecutionInfo {
            panic!("boom");
        }
    }

    #[derive(Default)]
    struct CollectingListener {
        infos: Mutex<Vec<TaskExecutionInfo>>,
    }

    impl TaskExecutionListener for CollectingListener {
        fn task_executed(&self, info: &TaskExecutionInfo) {
            self.infos.lock().push(info.clone());
        }
    }

    fn executor() -> TaskExecutor {
        TaskExecutor::new(&SyncConfig::default().with_shutdown_grace(Duration::from_secs(5)))
            .unwrap()
    }

    async fn advance(duration: Duration) {
        tokio::time::sleep(duration).await;
        tokio::task::yield_now().await;
    }

    #[test]
    fn requires_runtime() {
        assert!(matches!(
            TaskExecutor::new(&SyncConfig::default()),
            Err(SyncError::NoRuntime)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_task_runs_every_period() {
        let executor = executor();
        let task = CountingTask::new(Duration::ZERO);

        executor.schedule(task.clone(), Duration::ZERO, Duration::from_secs(10), None);

        advance(Duration::from_millis(1)).await;
        assert_eq!(task.runs(), 1);
        advance(Duration::from_secs(10)).await;
        assert_eq!(task.runs(), 2);
        advance(Duration::from_secs(10)).await;
        assert_eq!(task.runs(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_skips_ticks_and_resume_does_not_catch_up() {
        let executor = executor();
        let task = CountingTask::new(Duration::ZERO);

        executor.schedule(task.clone(), Duration::ZERO, Duration::from_secs(10), None);
        advance(Duration::from_millis(1)).await;
        assert_eq!(task.runs(), 1);

        executor.pause();
        advance(Duration::from_secs(35)).await;
        assert_eq!(task.runs(), 1);

        executor.resume();
        advance(Duration::from_secs(1)).await;
        assert_eq!(task.runs(), 1, "no catch-up run on resume");

        advance(Duration::from_secs(5)).await;
        assert_eq!(task.runs(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_lets_in_flight_body_finish() {
        let executor = executor();
        let task = CountingTask::new(Duration::from_secs(3));
        let listener = Arc::new(CollectingListener::default());

        executor.schedule(
            task.clone(),
            Duration::ZERO,
            Duration::from_secs(10),
            Some(listener.clone()),
        );
        advance(Duration::from_millis(1)).await;
        assert_eq!(executor.running_count(), 1);

        executor.pause();
        advance(Duration::from_secs(4)).await;
        assert_eq!(listener.infos.lock().len(), 1);
        assert_eq!(executor.running_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn submit_waits_for_resume() {
        let executor = executor();
        let task = CountingTask::new(Duration::ZERO);

        executor.pause();
        executor.submit(task.clone(), None);
        advance(Duration::from_secs(60)).await;
        assert_eq!(task.runs(), 0);

        executor.resume();
        advance(Duration::from_millis(1)).await;
        assert_eq!(task.runs(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_and_resume_are_idempotent() {
        let executor = executor();
        executor.pause();
        executor.pause();
        assert!(executor.is_paused());
        executor.resume();
        executor.resume();
        assert!(!executor.is_paused());
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_task_does_not_stop_the_loop() {
        let executor = executor();
        let counter = CountingTask::new(Duration::ZERO);

        executor.schedule(
            Arc::new(PanickingTask),
            Duration::ZERO,
            Duration::from_secs(1),
            None,
        );
        executor.schedule(counter.clone(), Duration::ZERO, Duration::from_secs(1), None);

        advance(Duration::from_millis(3500)).await;
        assert_eq!(counter.runs(), 4);

        executor.submit(Arc::new(PanickingTask), None);
        advance(Duration::from_secs(1)).await;
        assert_eq!(counter.runs(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_listener_is_contained() {
        struct PanickingListener;

        impl TaskExecutionListener for PanickingListener {
            fn task_executed(&self, _info: &TaskExecutionInfo) {
                panic!("listener failed");
            }
        }

        let executor = executor();
        let counter = CountingTask::new(Duration::ZERO);

        executor.submit(counter.clone(), Some(Arc::new(PanickingListener)));
        executor.schedule(
            counter.clone(),
            Duration::from_secs(1),
            Duration::from_secs(1),
            Some(Arc::new(PanickingListener)),
        );
        advance(Duration::from_millis(2500)).await;
        assert_eq!(counter.runs(), 3);
        assert_eq!(executor.running_count(), 0);

        executor.submit(counter.clone(), None);
        advance(Duration::from_millis(1)).await;
        assert_eq!(counter.runs(), 4);
        executor.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_task_cancels_future_runs() {
        let executor = executor();
        let task = CountingTask::new(Duration::ZERO);

        let id = executor
            .schedule(task.clone(), Duration::ZERO, Duration::from_secs(10), None)
            .unwrap();
        advance(Duration::from_millis(1)).await;
        executor.stop_task(id);

        advance(Duration::from_secs(60)).await;
        assert_eq!(task.runs(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_waits_for_in_flight_work() {
        let executor = executor();
        let task = CountingTask::new(Duration::from_secs(2));
        let listener = Arc::new(CollectingListener::default());

        executor.submit(task.clone(), Some(listener.clone()));
        advance(Duration::from_millis(1)).await;

        let start = Instant::now();
        executor.stop().await;
        assert_eq!(listener.infos.lock().len(), 1);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_aborts_after_grace() {
        let executor = executor();
        let task = CountingTask::new(Duration::from_secs(600));
        let listener = Arc::new(CollectingListener::default());

        executor.submit(task.clone(), Some(listener.clone()));
        advance(Duration::from_millis(1)).await;

        let start = Instant::now();
        executor.stop().await;
        assert_eq!(start.elapsed(), Duration::from_secs(5));
        advance(Duration::from_millis(1)).await;
        assert!(listener.infos.lock().is_empty());
        assert_eq!(executor.running_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_executor_rejects_work() {
        let executor = executor();
        executor.stop().await;
        executor.stop().await;

        let task = CountingTask::new(Duration::ZERO);
        assert!(executor.submit(task.clone(), None).is_none());
        assert!(executor
            .schedule(task.clone(), Duration::ZERO, Duration::from_secs(1), None)
            .is_none());
        assert!(executor.is_stopped());
    }

    #[tokio::test(start_paused = true)]
    async fn worker_pool_bounds_concurrency() {
        let executor = executor();
        let task = CountingTask::new(Duration::from_secs(10));

        for _ in 0..5 {
            executor.submit(task.clone(), None);
        }
        advance(Duration::from_millis(1)).await;
        assert_eq!(executor.running_count(), 2);
        assert_eq!(task.runs(), 2);
    }
}
