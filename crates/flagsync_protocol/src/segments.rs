//! Segment membership payloads.

use crate::error::ProtocolResult;
use serde::{Deserialize, Serialize};

/// A segment the current key belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MySegment {
    /// Server-side id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Segment name.
    pub name: String,
}

/// Membership response: `{"mySegments": [{"id": .., "name": ..}, ..]}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MySegmentsResponse {
    /// Segments the key belongs to.
    #[serde(default)]
    pub my_segments: Vec<MySegment>,
}

impl MySegmentsResponse {
    /// Creates a response from segment names.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            my_segments: names
                .into_iter()
                .map(|name| MySegment {
                    id: None,
                    name: name.into(),
                })
                .collect(),
        }
    }

    /// Decodes a response body.
    ///
    /// # Errors
    ///
    /// Returns [`crate::ProtocolError::Json`] if the body is malformed.
    pub fn from_json(body: &str) -> ProtocolResult<Self> {
        Ok(serde_json::from_str(body)?)
    }

    /// Returns the segment names, skipping empty ones.
    pub fn into_names(self) -> Vec<String> {
        self.my_segments
            .into_iter()
            .map(|segment| segment.name)
            .filter(|name| !name.is_empty())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_membership() {
        let body = r#"{"mySegments":[{"id":"1","name":"beta"},{"name":"employees"},{"name":""}]}"#;
        let names = MySegmentsResponse::from_json(body).unwrap().into_names();
        assert_eq!(names, vec!["beta".to_string(), "employees".to_string()]);
    }

    #[test]
    fn missing_list_is_empty() {
        assert!(MySegmentsResponse::from_json("{}")
            .unwrap()
            .into_names()
            .is_empty());
    }
}
