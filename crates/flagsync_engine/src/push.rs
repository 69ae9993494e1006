//! Streaming connection lifecycle.
//!
//! The [`PushCoordinator`] owns one connection at a time and runs as a
//! single tokio task fed by a channel. Commands from the host and events
//! from the transport arrive on that channel; timers for the keep-alive
//! watchdog, reconnect backoff and token refresh are deadlines the loop
//! selects on.
//!
//! ```text
//! Disconnected -> Authenticating -> Connected
//!       ^               |               |
//!       +---- error / watchdog / pause -+
//! ```
//!
//! Whenever streaming becomes unavailable the coordinator asks the
//! synchronizer to poll ([`PushFeedbackEvent::EnablePolling`]). When a
//! stream opens it asks it to stop polling and to catch up.

use crate::backoff::BackoffCounter;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::feedback::{FeedbackSender, PushFeedbackEvent, UpdateSender};
use crate::fetcher::AuthOutcome;
use crate::tasks::StreamingAuthTask;
use flagsync_protocol::StreamNotification;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

/// Streaming transport.
///
/// `connect` starts a connection in the background and reports everything
/// that happens on it through the sink. It must not block.
pub trait StreamingClient: Send + Sync {
    /// Opens a stream using the credentials in `auth`.
    fn connect(&self, auth: &AuthOutcome, sink: PushEventSink);

    /// Closes the current stream, if any.
    fn disconnect(&self);
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushState {
    /// No stream.
    Disconnected,
    /// Obtaining a token or waiting for the stream to open.
    Authenticating,
    /// Stream open.
    Connected,
    /// The coordinator has shut down.
    Stopped,
}

#[derive(Debug)]
enum TransportEvent {
    Open,
    Message(StreamNotification),
    KeepAlive,
    Error { retryable: bool },
}

#[derive(Debug)]
enum Input {
    Transport { connection: u64, event: TransportEvent },
    Pause,
    Resume,
    Stop,
}

/// Where a transport reports what happens on one connection.
///
/// Events from a connection the coordinator already closed are ignored.
#[derive(Debug, Clone)]
pub struct PushEventSink {
    connection: u64,
    tx: mpsc::UnboundedSender<Input>,
}

impl PushEventSink {
    fn send(&self, event: TransportEvent) {
        let input = Input::Transport {
            connection: self.connection,
            event,
        };
        if self.tx.send(input).is_err() {
            debug!(
                connection = self.connection,
                "push coordinator gone, dropping event"
            );
        }
    }

    /// The stream is open.
    pub fn on_open(&self) {
        self.send(TransportEvent::Open);
    }

    /// A notification arrived.
    pub fn on_message(&self, notification: StreamNotification) {
        self.send(TransportEvent::Message(notification));
    }

    /// A keep-alive arrived.
    pub fn on_keep_alive(&self) {
        self.send(TransportEvent::KeepAlive);
    }

    /// The stream failed.
    pub fn on_error(&self, retryable: bool) {
        self.send(TransportEvent::Error { retryable });
    }
}

/// Handle to the push coordinator task.
pub struct PushCoordinator {
    tx: mpsc::UnboundedSender<Input>,
    state: watch::Receiver<PushState>,
    handle: Mutex<Option<JoinHandle<()>>>,
    shutdown_grace: Duration,
}

impl PushCoordinator {
    /// Starts the coordinator. It authenticates right away.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NoRuntime`] outside a tokio runtime.
    pub fn spawn(
        config: &SyncConfig,
        auth: StreamingAuthTask,
        client: Arc<dyn StreamingClient>,
        feedback: FeedbackSender,
        updates: UpdateSender,
    ) -> SyncResult<Self> {
        let runtime = Handle::try_current().map_err(|_| SyncError::NoRuntime)?;
        let (tx, inputs) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(PushState::Disconnected);

        let actor = Actor {
            inputs,
            sink_tx: tx.clone(),
            auth,
            client,
            feedback,
            updates,
            state: state_tx,
            backoff: BackoffCounter::new(config.reconnect.clone()),
            keep_alive: config.streaming_keep_alive,
            expiry_margin: config.token_expiry_margin,
            active: None,
            next_connection: 0,
            paused: false,
            watchdog: None,
            reconnect_at: Some(Instant::now()),
            refresh_at: None,
        };
        let handle = runtime.spawn(actor.run());

        Ok(Self {
            tx,
            state,
            handle: Mutex::new(Some(handle)),
            shutdown_grace: config.shutdown_grace,
        })
    }

    /// Current connection state.
    pub fn state(&self) -> PushState {
        *self.state.borrow()
    }

    /// Watches connection state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<PushState> {
        self.state.clone()
    }

    /// Closes the stream and stops reconnecting until [`resume`](Self::resume).
    pub fn pause(&self) {
        self.command(Input::Pause);
    }

    /// Reconnects after a pause.
    pub fn resume(&self) {
        self.command(Input::Resume);
    }

    /// Closes the stream and ends the coordinator task.
    pub async fn stop(&self) {
        self.command(Input::Stop);
        let Some(handle) = self.handle.lock().take() else {
            return;
        };
        let abort = handle.abort_handle();
        if tokio::time::timeout(self.shutdown_grace, handle).await.is_err() {
            warn!("push coordinator did not stop in time, aborting");
            abort.abort();
        }
    }

    fn command(&self, input: Input) {
        if self.tx.send(input).is_err() {
            debug!("push coordinator already stopped");
        }
    }
}

impl Drop for PushCoordinator {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.get_mut().take() {
            handle.abort();
        }
    }
}

struct Actor {
    inputs: mpsc::UnboundedReceiver<Input>,
    sink_tx: mpsc::UnboundedSender<Input>,
    auth: StreamingAuthTask,
    client: Arc<dyn StreamingClient>,
    feedback: FeedbackSender,
    updates: UpdateSender,
    state: watch::Sender<PushState>,
    backoff: BackoffCounter,
    keep_alive: Duration,
    expiry_margin: Duration,
    active: Option<u64>,
    next_connection: u64,
    paused: bool,
    watchdog: Option<Instant>,
    reconnect_at: Option<Instant>,
    refresh_at: Option<Instant>,
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl Actor {
    async fn run(mut self) {
        loop {
            tokio::select! {
                input = self.inputs.recv() => match input {
                    Some(Input::Stop) | None => break,
                    Some(Input::Pause) => self.pause(),
                    Some(Input::Resume) => self.resume(),
                    Some(Input::Transport { connection, event }) => {
                        self.on_transport(connection, event)
                    }
                },
                () = sleep_until_opt(self.watchdog) => {
                    warn!(
                        window_secs = self.keep_alive.as_secs(),
                        "no streaming traffic within keep-alive window"
                    );
                    self.connection_lost();
                }
                () = sleep_until_opt(self.reconnect_at) => {
                    self.reconnect_at = None;
                    self.connect().await;
                }
                () = sleep_until_opt(self.refresh_at) => {
                    info!("streaming token about to expire, reconnecting");
                    self.close_connection();
                    self.connect().await;
                }
            }
        }

        self.close_connection();
        self.reconnect_at = None;
        self.state.send_replace(PushState::Stopped);
        info!("push coordinator stopped");
    }

    async fn connect(&mut self) {
        if self.paused {
            return;
        }
        self.set_state(PushState::Authenticating);

        let outcome = match self.auth.authenticate().await {
            Ok(outcome) if outcome.can_connect() => outcome,
            Ok(_) => {
                info!("streaming not available for this key, polling until it is");
                self.fall_back();
                return;
            }
            Err(e) => {
                warn!(error = %e, retryable = e.is_retryable(), "streaming authentication failed");
                self.fall_back();
                return;
            }
        };

        self.next_connection += 1;
        let connection = self.next_connection;
        self.active = Some(connection);

        let now = Instant::now();
        self.watchdog = Some(now + self.keep_alive);
        let lifetime = Duration::from_secs(outcome.lifetime_secs());
        self.refresh_at = lifetime
            .checked_sub(self.expiry_margin)
            .filter(|refresh| !refresh.is_zero())
            .map(|refresh| now + refresh);

        debug!(connection, channels = ?outcome.channels, "opening stream");
        let sink = PushEventSink {
            connection,
            tx: self.sink_tx.clone(),
        };
        self.client.connect(&outcome, sink);
    }

    fn on_transport(&mut self, connection: u64, event: TransportEvent) {
        if self.active != Some(connection) {
            debug!(connection, ?event, "ignoring event from closed stream");
            return;
        }

        match event {
            TransportEvent::Open => {
                info!(connection, "streaming connected");
                self.backoff.reset();
                self.set_state(PushState::Connected);
                self.rearm_watchdog();
                self.emit(PushFeedbackEvent::DisablePolling);
                self.emit(PushFeedbackEvent::StreamingConnected);
            }
            TransportEvent::Message(notification) => {
                self.rearm_watchdog();
                debug!(?notification, "stream notification");
                if self.updates.send(notification).is_err() {
                    debug!("update consumer gone, dropping notification");
                }
            }
            TransportEvent::KeepAlive => self.rearm_watchdog(),
            TransportEvent::Error { retryable } => {
                warn!(connection, retryable, "stream error");
                self.connection_lost();
            }
        }
    }

    fn connection_lost(&mut self) {
        self.close_connection();
        self.fall_back();
    }

    /// Polls while streaming is down and tries again after the next backoff
    /// delay.
    fn fall_back(&mut self) {
        self.set_state(PushState::Disconnected);
        self.emit(PushFeedbackEvent::EnablePolling);
        self.schedule_reconnect();
    }

    fn close_connection(&mut self) {
        if let Some(connection) = self.active.take() {
            debug!(connection, "closing stream");
            self.client.disconnect();
        }
        self.watchdog = None;
        self.refresh_at = None;
        self.set_state(PushState::Disconnected);
    }

    fn schedule_reconnect(&mut self) {
        let delay = self.backoff.next_delay();
        debug!(
            delay_ms = delay.as_millis() as u64,
            retry = self.backoff.retries(),
            "scheduling reconnect"
        );
        self.reconnect_at = Some(Instant::now() + delay);
    }

    fn pause(&mut self) {
        if self.paused {
            return;
        }
        info!("streaming paused");
        self.paused = true;
        self.reconnect_at = None;
        self.close_connection();
    }

    fn resume(&mut self) {
        if !self.paused {
            return;
        }
        info!("streaming resumed");
        self.paused = false;
        self.backoff.reset();
        self.reconnect_at = Some(Instant::now());
    }

    fn rearm_watchdog(&mut self) {
        self.watchdog = Some(Instant::now() + self.keep_alive);
    }

    fn emit(&self, event: PushFeedbackEvent) {
        if self.feedback.send(event).is_err() {
            debug!(?event, "feedback consumer gone");
        }
    }

    fn set_state(&self, state: PushState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = ?previous, to = ?state, "push state changed");
        }
    }
}
