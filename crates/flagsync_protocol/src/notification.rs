//! Notifications delivered over the push channel.

use crate::cursor::ChangeCursor;
use crate::error::ProtocolResult;
use serde::{Deserialize, Serialize};

/// A decoded push notification.
///
/// The transport decodes the raw stream frames; this type is the payload
/// the coordinator acts on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamNotification {
    /// New flag changes exist up to `change_number`.
    #[serde(rename = "SPLIT_UPDATE", rename_all = "camelCase")]
    FlagsUpdate {
        /// Change number to sync up to.
        change_number: i64,
    },
    /// A flag was killed.
    #[serde(rename = "SPLIT_KILL", rename_all = "camelCase")]
    FlagKill {
        /// Flag name.
        split_name: String,
        /// Treatment to serve from now on.
        default_treatment: String,
        /// Change number of the kill.
        change_number: i64,
    },
    /// Segment membership of the current key changed.
    #[serde(rename = "MY_SEGMENTS_UPDATE")]
    SegmentsUpdate,
}

impl StreamNotification {
    /// Decodes a notification payload.
    ///
    /// # Errors
    ///
    /// Returns [`crate::ProtocolError::Json`] for unknown or malformed payloads.
    pub fn from_json(body: &str) -> ProtocolResult<Self> {
        Ok(serde_json::from_str(body)?)
    }

    /// Cursor the notification refers to, if any.
    pub fn target_cursor(&self) -> Option<ChangeCursor> {
        match self {
            Self::FlagsUpdate { change_number } | Self::FlagKill { change_number, .. } => {
                Some(ChangeCursor::new(*change_number))
            }
            Self::SegmentsUpdate => None,
        }
    }
}
