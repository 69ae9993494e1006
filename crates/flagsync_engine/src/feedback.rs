//! Channels from the push layer to the sync layer.

use flagsync_protocol::StreamNotification;
use tokio::sync::mpsc;

/// What the push layer asks of the synchronizer.
///
/// Delivery is ordered and at least once; consumers treat repeats as
/// no-ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushFeedbackEvent {
    /// Streaming is unavailable; poll instead.
    EnablePolling,
    /// Streaming is up; polling can stop.
    DisablePolling,
    /// A stream just connected; catch up on anything missed.
    StreamingConnected,
}

/// Producer side of the feedback channel.
pub type FeedbackSender = mpsc::UnboundedSender<PushFeedbackEvent>;

/// Consumer side of the feedback channel.
pub type FeedbackReceiver = mpsc::UnboundedReceiver<PushFeedbackEvent>;

/// Producer side of the notification channel.
pub type UpdateSender = mpsc::UnboundedSender<StreamNotification>;

/// Consumer side of the notification channel.
pub type UpdateReceiver = mpsc::UnboundedReceiver<StreamNotification>;

/// Creates a feedback channel.
pub fn feedback_channel() -> (FeedbackSender, FeedbackReceiver) {
    mpsc::unbounded_channel()
}

/// Creates a channel for stream notifications.
pub fn update_channel() -> (UpdateSender, UpdateReceiver) {
    mpsc::unbounded_channel()
}
