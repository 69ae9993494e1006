//! Usage records reported back to the service.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Estimated fixed cost of an event without properties.
const EVENT_BASE_SIZE: u64 = 1024;

/// Estimated fixed cost of an impression.
const IMPRESSION_BASE_SIZE: u64 = 150;

/// Longest accepted matching key.
pub const MAX_KEY_LENGTH: usize = 250;

/// Longest accepted event type id.
const MAX_EVENT_TYPE_LENGTH: usize = 80;

/// Checks that a matching key is usable.
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidKey`] for empty or overlong keys.
pub fn validate_key(key: &str) -> ProtocolResult<()> {
    if key.trim().is_empty() {
        return Err(ProtocolError::InvalidKey("key must be a non-empty string".into()));
    }
    if key.chars().count() > MAX_KEY_LENGTH {
        return Err(ProtocolError::InvalidKey(format!(
            "key too long, must be {MAX_KEY_LENGTH} characters or less"
        )));
    }
    Ok(())
}

/// A record whose approximate wire size is known.
///
/// Recorder queues use this to decide when a flush is needed.
pub trait InBytesSizable {
    /// Approximate size in bytes.
    fn size_in_bytes(&self) -> u64;
}

/// A custom event tracked by the application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Event type, e.g. `checkout.completed`.
    pub event_type_id: String,
    /// Traffic type of the key.
    pub traffic_type_name: String,
    /// Matching key.
    pub key: String,
    /// Optional numeric value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// Free-form properties.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub properties: HashMap<String, serde_json::Value>,
}

impl Event {
    /// Creates an event with no value or properties.
    pub fn new(
        key: impl Into<String>,
        traffic_type_name: impl Into<String>,
        event_type_id: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        Self {
            event_type_id: event_type_id.into(),
            traffic_type_name: traffic_type_name.into(),
            key: key.into(),
            value: None,
            timestamp,
            properties: HashMap::new(),
        }
    }

    /// Sets the numeric value.
    #[must_use]
    pub fn with_value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }

    /// Adds a property.
    #[must_use]
    pub fn with_property(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.insert(name.into(), value);
        self
    }

    /// Checks the key, traffic type and event type.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidEvent`] describing the first problem.
    pub fn validate(&self) -> ProtocolResult<()> {
        if self.key.trim().is_empty() {
            return Err(ProtocolError::InvalidEvent(
                "matching key must be a non-empty string".into(),
            ));
        }
        if self.key.chars().count() > MAX_KEY_LENGTH {
            return Err(ProtocolError::InvalidEvent(format!(
                "matching key too long, must be {MAX_KEY_LENGTH} characters or less"
            )));
        }
        if self.traffic_type_name.trim().is_empty() {
            return Err(ProtocolError::InvalidEvent(
                "traffic type must be a non-empty string".into(),
            ));
        }
        if !is_valid_event_type(&self.event_type_id) {
            return Err(ProtocolError::InvalidEvent(format!(
                "event type `{}` must start with a letter or digit and contain only \
                 letters, digits, '-', '_', '.' or ':' (max {MAX_EVENT_TYPE_LENGTH})",
                self.event_type_id
            )));
        }
        if self.value.is_some_and(|v| !v.is_finite()) {
            return Err(ProtocolError::InvalidEvent("value must be finite".into()));
        }
        Ok(())
    }
}

fn is_valid_event_type(event_type: &str) -> bool {
    let mut chars = event_type.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    first.is_ascii_alphanumeric()
        && event_type.len() <= MAX_EVENT_TYPE_LENGTH
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
}

impl InBytesSizable for Event {
    fn size_in_bytes(&self) -> u64 {
        let properties = if self.properties.is_empty() {
            0
        } else {
            serde_json::to_vec(&self.properties)
                .map(|bytes| bytes.len() as u64)
                .unwrap_or(0)
        };
        EVENT_BASE_SIZE + properties
    }
}

/// A record of one flag evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Impression {
    /// Matching key.
    pub key_name: String,
    /// Bucketing key, when different from the matching key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucketing_key: Option<String>,
    /// Flag name.
    pub feature: String,
    /// Treatment served.
    pub treatment: String,
    /// Label of the condition that decided the treatment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Change number of the flag used.
    pub change_number: i64,
    /// Milliseconds since the Unix epoch.
    pub time: i64,
}

impl Impression {
    /// Creates an impression.
    pub fn new(
        key_name: impl Into<String>,
        feature: impl Into<String>,
        treatment: impl Into<String>,
        change_number: i64,
        time: i64,
    ) -> Self {
        Self {
            key_name: key_name.into(),
            bucketing_key: None,
            feature: feature.into(),
            treatment: treatment.into(),
            label: None,
            change_number,
            time,
        }
    }
}

impl InBytesSizable for Impression {
    fn size_in_bytes(&self) -> u64 {
        IMPRESSION_BASE_SIZE
            + (self.key_name.len() + self.feature.len() + self.treatment.len()) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_validation() {
        assert!(validate_key("user-1").is_ok());
        assert!(matches!(validate_key("  "), Err(ProtocolError::InvalidKey(_))));
        assert!(validate_key(&"k".repeat(MAX_KEY_LENGTH)).is_ok());
        assert!(validate_key(&"k".repeat(MAX_KEY_LENGTH + 1)).is_err());
    }

    #[test]
    fn valid_event() {
        let event = Event::new("user-1", "user", "checkout.completed", 1).with_value(9.5);
        assert!(event.validate().is_ok());
    }

    #[test]
    fn event_type_rules() {
        assert!(is_valid_event_type("a"));
        assert!(is_valid_event_type("page:view-2_b.c"));
        assert!(!is_valid_event_type(""));
        assert!(!is_valid_event_type("-starts-with-dash"));
        assert!(!is_valid_event_type("has space"));
        assert!(!is_valid_event_type(&"x".repeat(81)));
    }

    #[test]
    fn empty_or_long_key_is_rejected() {
        assert!(Event::new(" ", "user", "e", 1).validate().is_err());
        let long = "k".repeat(MAX_KEY_LENGTH + 1);
        assert!(Event::new(long, "user", "e", 1).validate().is_err());
    }

    #[test]
    fn properties_add_to_event_size() {
        let bare = Event::new("k", "user", "e", 1);
        assert_eq!(bare.size_in_bytes(), EVENT_BASE_SIZE);

        let rich = bare.clone().with_property("plan", json!("premium"));
        assert!(rich.size_in_bytes() > EVENT_BASE_SIZE);
    }

    #[test]
    fn event_wire_shape() {
        let json = serde_json::to_value(Event::new("k", "user", "e", 7)).unwrap();
        assert_eq!(json["eventTypeId"], "e");
        assert_eq!(json["trafficTypeName"], "user");
        assert!(json.get("value").is_none());
    }
}
