//! Readiness signalling.
//!
//! The gate counts which data dependencies have arrived and tells listeners
//! when the SDK can serve evaluations. `ReadyFromCache`, `Ready` and
//! `ReadyTimedOut` fire at most once each. `Updated` fires on every change
//! after `Ready`.
//!
//! Listeners are called outside the state lock but one event at a time, in
//! the order the state changed.

use crate::error::{SyncError, SyncResult};
use parking_lot::{Mutex, ReentrantMutex};
use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Event delivered to readiness listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SdkEvent {
    /// Cached data is loaded and can be evaluated.
    ReadyFromCache,
    /// Fresh data has been fetched from the service.
    Ready,
    /// `Ready` did not happen within the configured timeout.
    ReadyTimedOut,
    /// Flags or segments changed after `Ready`.
    Updated,
}

/// Where the gate stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessState {
    /// Nothing usable yet.
    NotReady,
    /// Serving cached data.
    ReadyFromCache,
    /// Serving fresh data.
    Ready,
    /// Gave up waiting; may still become `Ready`.
    TimedOut,
}

/// Signals from the sync layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InternalEvent {
    /// Flags cache loaded at startup.
    FlagsLoadedFromCache,
    /// Segments cache loaded at startup.
    SegmentsLoadedFromCache,
    /// A flags sync completed.
    FlagsFetched,
    /// A segments sync completed.
    SegmentsFetched,
    /// A flags sync changed the store.
    FlagsUpdated,
    /// A segments sync changed the store.
    SegmentsUpdated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Dependency {
    Flags,
    Segments,
}

const DEPENDENCIES: usize = 2;

type Listener = Arc<dyn Fn(SdkEvent) + Send + Sync>;

struct GateState {
    cached: HashSet<Dependency>,
    fetched: HashSet<Dependency>,
    state: ReadinessState,
    fired: Vec<SdkEvent>,
    listeners: Vec<Listener>,
}

impl GateState {
    fn has_fired(&self, event: SdkEvent) -> bool {
        self.fired.contains(&event)
    }
}

/// Tracks initial data arrival and notifies listeners.
pub struct ReadinessGate {
    inner: Mutex<GateState>,
    // Held from state change through delivery. Reentrant so a listener may
    // call back into the gate.
    dispatch: ReentrantMutex<()>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl ReadinessGate {
    /// Creates a gate and starts its timeout, if any.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NoRuntime`] if a timeout is requested outside a
    /// tokio runtime.
    pub fn new(timeout: Option<Duration>) -> SyncResult<Arc<Self>> {
        let gate = Arc::new(Self {
            inner: Mutex::new(GateState {
                cached: HashSet::new(),
                fetched: HashSet::new(),
                state: ReadinessState::NotReady,
                fired: Vec::new(),
                listeners: Vec::new(),
            }),
            dispatch: ReentrantMutex::new(()),
            timer: Mutex::new(None),
        });

        if let Some(timeout) = timeout {
            let handle = Handle::try_current().map_err(|_| SyncError::NoRuntime)?;
            let weak: Weak<Self> = Arc::downgrade(&gate);
            let timer = handle.spawn(async move {
                tokio::time::sleep(timeout).await;
                if let Some(gate) = weak.upgrade() {
                    gate.on_timeout();
                }
            });
            *gate.timer.lock() = Some(timer);
        }

        Ok(gate)
    }

    /// Current state.
    pub fn state(&self) -> ReadinessState {
        self.inner.lock().state
    }

    /// Returns true once `Ready` has fired.
    pub fn is_ready(&self) -> bool {
        self.inner.lock().has_fired(SdkEvent::Ready)
    }

    /// Registers a listener.
    ///
    /// Exactly-once events that already fired are delivered to the new
    /// listener immediately, in the order they fired.
    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(SdkEvent) + Send + Sync + 'static,
    {
        let listener: Listener = Arc::new(listener);
        let _dispatch = self.dispatch.lock();
        let replay = {
            let mut inner = self.inner.lock();
            inner.listeners.push(Arc::clone(&listener));
            inner.fired.clone()
        };
        for event in replay {
            listener(event);
        }
    }

    /// Feeds a signal from the sync layer.
    pub fn notify(&self, event: InternalEvent) {
        let _dispatch = self.dispatch.lock();
        let (fire, listeners) = {
            let mut inner = self.inner.lock();
            let fire = match event {
                InternalEvent::FlagsLoadedFromCache => {
                    Self::cache_loaded(&mut inner, Dependency::Flags)
                }
                InternalEvent::SegmentsLoadedFromCache => {
                    Self::cache_loaded(&mut inner, Dependency::Segments)
                }
                InternalEvent::FlagsFetched => Self::fetched(&mut inner, Dependency::Flags),
                InternalEvent::SegmentsFetched => Self::fetched(&mut inner, Dependency::Segments),
                InternalEvent::FlagsUpdated | InternalEvent::SegmentsUpdated => {
                    (inner.state == ReadinessState::Ready).then_some(SdkEvent::Updated)
                }
            };
            match fire {
                Some(event) => (event, inner.listeners.clone()),
                None => return,
            }
        };

        if fire == SdkEvent::Ready {
            if let Some(timer) = self.timer.lock().take() {
                timer.abort();
            }
        }

        debug!(event = ?fire, listeners = listeners.len(), "firing readiness event");
        for listener in listeners {
            listener(fire);
        }
    }

    fn cache_loaded(inner: &mut GateState, dependency: Dependency) -> Option<SdkEvent> {
        if !inner.cached.insert(dependency) || inner.cached.len() < DEPENDENCIES {
            return None;
        }
        if inner.has_fired(SdkEvent::Ready) || inner.has_fired(SdkEvent::ReadyFromCache) {
            return None;
        }
        inner.fired.push(SdkEvent::ReadyFromCache);
        if inner.state == ReadinessState::NotReady {
            inner.state = ReadinessState::ReadyFromCache;
        }
        info!("ready from cache");
        Some(SdkEvent::ReadyFromCache)
    }

    fn fetched(inner: &mut GateState, dependency: Dependency) -> Option<SdkEvent> {
        if !inner.fetched.insert(dependency) || inner.fetched.len() < DEPENDENCIES {
            return None;
        }
        if inner.has_fired(SdkEvent::Ready) {
            return None;
        }
        inner.fired.push(SdkEvent::Ready);
        inner.state = ReadinessState::Ready;
        info!("ready");
        Some(SdkEvent::Ready)
    }

    fn on_timeout(&self) {
        let _dispatch = self.dispatch.lock();
        let listeners = {
            let mut inner = self.inner.lock();
            if inner.has_fired(SdkEvent::Ready) || inner.has_fired(SdkEvent::ReadyTimedOut) {
                return;
            }
            inner.fired.push(SdkEvent::ReadyTimedOut);
            inner.state = ReadinessState::TimedOut;
            inner.listeners.clone()
        };
        warn!("readiness timed out");
        for listener in listeners {
            listener(SdkEvent::ReadyTimedOut);
        }
    }
}

impl Drop for ReadinessGate {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.get_mut().take() {
            timer.abort();
        }
    }
}
