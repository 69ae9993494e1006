//! Ordered background writes to the persistent caches.
//!
//! Stores and recorders never touch a cache on the caller's thread. They
//! hand each write to a [`PersistWriter`], whose consumer task runs the
//! jobs one at a time on tokio's blocking pool, in the order they were
//! queued.

use crate::error::{SyncError, SyncResult};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Handle to the ordered cache writer.
///
/// Clones share one queue. The consumer stops once every handle is dropped.
#[derive(Debug, Clone)]
pub struct PersistWriter {
    tx: mpsc::UnboundedSender<Job>,
}

impl PersistWriter {
    /// Starts the consumer on the current runtime.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NoRuntime`] outside a tokio runtime.
    pub fn spawn() -> SyncResult<Self> {
        let runtime = Handle::try_current().map_err(|_| SyncError::NoRuntime)?;
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        runtime.spawn(async move {
            while let Some(job) = rx.recv().await {
                if let Err(e) = tokio::task::spawn_blocking(job).await {
                    error!(error = %e, "cache write panicked");
                }
            }
            debug!("persistence writer stopped");
        });
        Ok(Self { tx })
    }

    /// Queues `job` and returns at once. The job reports its own failures.
    pub fn write(&self, job: impl FnOnce() + Send + 'static) {
        if self.tx.send(Box::new(job)).is_err() {
            warn!("persistence writer stopped, dropping cache write");
        }
    }

    /// Runs `job` after everything queued before it and returns its result.
    ///
    /// Returns `None` if the writer has stopped or the job panicked.
    pub async fn run<F, R>(&self, job: F) -> Option<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (done, result) = oneshot::channel();
        let job: Job = Box::new(move || {
            if done.send(job()).is_err() {
                debug!("cache job caller went away");
            }
        });
        self.tx.send(job).ok()?;
        result.await.ok()
    }

    /// Waits until every job queued so far has finished.
    pub async fn flush(&self) {
        if self.run(|| ()).await.is_none() {
            warn!("persistence writer stopped before flushing");
        }
    }
}
