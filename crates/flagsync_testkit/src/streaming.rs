//! Fake streaming transport.
//!
//! The engine hands the transport a [`PushEventSink`] on every connect.
//! Tests keep the latest sink and drive the connection through it.

use flagsync_engine::{AuthOutcome, PushEventSink, StreamingClient};
use flagsync_protocol::StreamNotification;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Streaming transport controlled by the test.
#[derive(Debug, Default)]
pub struct FakeStreamingClient {
    sinks: Mutex<Vec<PushEventSink>>,
    tokens: Mutex<Vec<String>>,
    disconnects: AtomicUsize,
}

impl FakeStreamingClient {
    /// Creates a transport with no connections.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of connects requested by the engine.
    pub fn connect_count(&self) -> usize {
        self.sinks.lock().len()
    }

    /// Number of disconnects requested by the engine.
    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    /// Tokens used for each connect, oldest first.
    pub fn tokens(&self) -> Vec<String> {
        self.tokens.lock().clone()
    }

    /// Sink of the most recent connection.
    pub fn last_sink(&self) -> Option<PushEventSink> {
        self.sinks.lock().last().cloned()
    }

    /// Opens the most recent connection.
    ///
    /// # Panics
    ///
    /// Panics if the engine never connected.
    pub fn open(&self) {
        self.current().on_open();
    }

    /// Delivers a notification on the most recent connection.
    ///
    /// # Panics
    ///
    /// Panics if the engine never connected.
    pub fn send(&self, notification: StreamNotification) {
        self.current().on_message(notification);
    }

    /// Delivers a keep-alive on the most recent connection.
    ///
    /// # Panics
    ///
    /// Panics if the engine never connected.
    pub fn keep_alive(&self) {
        self.current().on_keep_alive();
    }

    /// Fails the most recent connection.
    ///
    /// # Panics
    ///
    /// Panics if the engine never connected.
    pub fn fail(&self, retryable: bool) {
        self.current().on_error(retryable);
    }

    fn current(&self) -> PushEventSink {
        self.last_sink().expect("no streaming connection was requested")
    }
}

impl StreamingClient for FakeStreamingClient {
    fn connect(&self, auth: &AuthOutcome, sink: PushEventSink) {
        self.tokens.lock().push(auth.token.clone());
        self.sinks.lock().push(sink);
    }

    fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}
