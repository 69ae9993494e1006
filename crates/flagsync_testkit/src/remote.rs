//! Scripted remote collaborators.
//!
//! Each fake replays responses queued by the test and records what the
//! engine asked for. An exhausted script answers with "nothing new".

use async_trait::async_trait;
use flagsync_engine::{
    AuthOutcome, ChangeFetcher, Collaborators, RecordSender, SegmentsFetcher,
    StreamingAuthenticator, StreamingParts, SyncError, SyncResult,
};
use flagsync_protocol::{ChangeCursor, Event, Impression, RawChangeBatch};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Flag change feed replaying queued batches.
#[derive(Debug, Default)]
pub struct ScriptedChangeFetcher {
    script: Mutex<VecDeque<SyncResult<RawChangeBatch>>>,
    calls: Mutex<Vec<ChangeCursor>>,
}

impl ScriptedChangeFetcher {
    /// Creates a fetcher with an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a batch.
    pub fn push_batch(&self, batch: RawChangeBatch) {
        self.script.lock().push_back(Ok(batch));
    }

    /// Queues a failure.
    pub fn push_error(&self, error: SyncError) {
        self.script.lock().push_back(Err(error));
    }

    /// Queues a retryable network failure.
    pub fn push_network_error(&self) {
        self.push_error(SyncError::network_retryable("connection reset"));
    }

    /// Cursors the engine fetched from, oldest first.
    pub fn calls(&self) -> Vec<ChangeCursor> {
        self.calls.lock().clone()
    }

    /// Number of fetches so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Responses not consumed yet.
    pub fn remaining(&self) -> usize {
        self.script.lock().len()
    }
}

#[async_trait]
impl ChangeFetcher for ScriptedChangeFetcher {
    async fn fetch(&self, since: ChangeCursor) -> SyncResult<RawChangeBatch> {
        self.calls.lock().push(since);
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(RawChangeBatch::new(since, since)))
    }
}

/// Segment membership replaying queued responses.
///
/// Once the script runs out it keeps answering with the last membership it
/// served.
#[derive(Debug, Default)]
pub struct ScriptedSegmentsFetcher {
    script: Mutex<VecDeque<SyncResult<Vec<String>>>>,
    last: Mutex<Vec<String>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedSegmentsFetcher {
    /// Creates a fetcher answering with no segments.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a membership.
    pub fn push_segments<I, S>(&self, segments: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments = segments.into_iter().map(Into::into).collect();
        self.script.lock().push_back(Ok(segments));
    }

    /// Queues a failure.
    pub fn push_error(&self, error: SyncError) {
        self.script.lock().push_back(Err(error));
    }

    /// Matching keys fetched for, oldest first.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Number of fetches so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl SegmentsFetcher for ScriptedSegmentsFetcher {
    async fn fetch(&self, matching_key: &str) -> SyncResult<Vec<String>> {
        self.calls.lock().push(matching_key.to_string());
        match self.script.lock().pop_front() {
            Some(Ok(segments)) => {
                *self.last.lock() = segments.clone();
                Ok(segments)
            }
            Some(Err(error)) => Err(error),
            None => Ok(self.last.lock().clone()),
        }
    }
}

/// Record intake that keeps every batch it accepts.
#[derive(Debug)]
pub struct RecordingSender<T> {
    sent: Mutex<Vec<Vec<T>>>,
    failing: AtomicBool,
}

impl<T> Default for RecordingSender<T> {
    fn default() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
        }
    }
}

impl<T: Clone> RecordingSender<T> {
    /// Creates a sender that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following send fail with a retryable error, or succeed
    /// again.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Accepted batches, oldest first.
    pub fn batches(&self) -> Vec<Vec<T>> {
        self.sent.lock().clone()
    }

    /// All accepted records, flattened.
    pub fn records(&self) -> Vec<T> {
        self.sent.lock().iter().flatten().cloned().collect()
    }

    /// Number of accepted records.
    pub fn record_count(&self) -> usize {
        self.sent.lock().iter().map(Vec::len).sum()
    }

    fn accept(&self, records: &[T]) -> SyncResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SyncError::network_retryable("intake unavailable"));
        }
        self.sent.lock().push(records.to_vec());
        Ok(())
    }
}

#[async_trait]
impl RecordSender<Event> for RecordingSender<Event> {
    async fn send(&self, records: &[Event]) -> SyncResult<()> {
        self.accept(records)
    }
}

#[async_trait]
impl RecordSender<Impression> for RecordingSender<Impression> {
    async fn send(&self, records: &[Impression]) -> SyncResult<()> {
        self.accept(records)
    }
}

/// A grant valid for one hour from the epoch, on the `flags` channel.
pub fn granted() -> AuthOutcome {
    AuthOutcome {
        push_enabled: true,
        token: "token".into(),
        channels: vec!["flags".into()],
        issued_at: 0,
        expires_at: 3_600,
    }
}

/// Streaming authenticator replaying queued outcomes, then granting.
#[derive(Debug, Default)]
pub struct ScriptedAuthenticator {
    script: Mutex<VecDeque<SyncResult<AuthOutcome>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedAuthenticator {
    /// Creates an authenticator that always grants.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an outcome.
    pub fn push_outcome(&self, outcome: SyncResult<AuthOutcome>) {
        self.script.lock().push_back(outcome);
    }

    /// Queues a grant with push disabled.
    pub fn push_disabled(&self) {
        self.push_outcome(Ok(AuthOutcome {
            push_enabled: false,
            ..granted()
        }));
    }

    /// Number of authentications so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl StreamingAuthenticator for ScriptedAuthenticator {
    async fn authenticate(&self, matching_key: &str) -> SyncResult<AuthOutcome> {
        self.calls.lock().push(matching_key.to_string());
        self.script.lock().pop_front().unwrap_or_else(|| Ok(granted()))
    }
}

/// Every scripted remote a context needs.
#[derive(Debug, Clone, Default)]
pub struct RemoteFakes {
    /// Flag change feed.
    pub flags: Arc<ScriptedChangeFetcher>,
    /// Segment membership.
    pub segments: Arc<ScriptedSegmentsFetcher>,
    /// Event intake.
    pub events: Arc<RecordingSender<Event>>,
    /// Impression intake.
    pub impressions: Arc<RecordingSender<Impression>>,
    /// Streaming authentication.
    pub auth: Arc<ScriptedAuthenticator>,
}

impl RemoteFakes {
    /// Creates fresh fakes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Collaborators backed by these fakes.
    pub fn collaborators(&self, streaming: Option<StreamingParts>) -> Collaborators {
        Collaborators {
            flags: self.flags.clone(),
            segments: self.segments.clone(),
            events: self.events.clone(),
            impressions: self.impressions.clone(),
            streaming,
        }
    }
}
