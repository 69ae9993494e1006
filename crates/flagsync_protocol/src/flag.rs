//! Feature flag definitions.
//!
//! A flag ("split") is kept in the same shape the server sends it. The
//! matcher grammar is carried structurally and validated, not evaluated.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Treatment returned when no definition is available.
pub const CONTROL_TREATMENT: &str = "control";

/// The only combiner the server emits for matcher groups.
const AND_COMBINER: &str = "AND";

/// Lifecycle status of a flag in the change log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlagStatus {
    /// Flag is live and must be stored.
    Active,
    /// Flag was archived and must be removed.
    Archived,
}

/// Kind of targeting condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConditionType {
    /// Explicit key list.
    Whitelist,
    /// Percentage rollout.
    #[default]
    Rollout,
}

/// A single matcher inside a matcher group.
///
/// Matcher-specific data (key lists, segment names, numeric bounds, ...) is
/// kept as an opaque JSON payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Matcher {
    /// Matcher kind, e.g. `ALL_KEYS` or `IN_SEGMENT`.
    pub matcher_type: String,
    /// Whether the match result is inverted.
    #[serde(default)]
    pub negate: bool,
    /// Remaining matcher fields.
    #[serde(flatten)]
    pub payload: serde_json::Map<String, serde_json::Value>,
}

impl Matcher {
    /// Creates a matcher of the given type with no payload.
    pub fn new(matcher_type: impl Into<String>) -> Self {
        Self {
            matcher_type: matcher_type.into(),
            negate: false,
            payload: serde_json::Map::new(),
        }
    }
}

/// A group of matchers joined by a combiner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatcherGroup {
    /// How matcher results are combined.
    pub combiner: String,
    /// Matchers in the group.
    #[serde(default)]
    pub matchers: Vec<Matcher>,
}

/// A treatment bucket of a rollout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    /// Treatment served to this bucket.
    pub treatment: String,
    /// Bucket size in percent.
    pub size: i32,
}

/// A targeting condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Kind of condition.
    #[serde(default)]
    pub condition_type: ConditionType,
    /// Matchers deciding whether the condition applies.
    pub matcher_group: MatcherGroup,
    /// Treatment buckets.
    #[serde(default)]
    pub partitions: Vec<Partition>,
    /// Label reported in impressions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Condition {
    /// Creates a rollout condition matching every key.
    pub fn all_keys(treatment: impl Into<String>, size: i32) -> Self {
        Self {
            condition_type: ConditionType::Rollout,
            matcher_group: MatcherGroup {
                combiner: AND_COMBINER.into(),
                matchers: vec![Matcher::new("ALL_KEYS")],
            },
            partitions: vec![Partition {
                treatment: treatment.into(),
                size,
            }],
            label: Some("default rule".into()),
        }
    }
}

fn control() -> String {
    CONTROL_TREATMENT.to_string()
}

/// A feature flag definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureFlag {
    /// Unique flag name.
    pub name: String,
    /// Change log status.
    pub status: FlagStatus,
    /// Traffic type the flag targets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traffic_type_name: Option<String>,
    /// Hashing seed.
    #[serde(default)]
    pub seed: i64,
    /// Kill switch.
    #[serde(default)]
    pub killed: bool,
    /// Treatment served when killed or when no condition matches.
    #[serde(default = "control")]
    pub default_treatment: String,
    /// Change number of the last modification.
    #[serde(default)]
    pub change_number: i64,
    /// Targeting conditions, evaluated in order.
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Dynamic configuration per treatment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configurations: Option<HashMap<String, String>>,
}

impl FeatureFlag {
    /// Creates a flag with no conditions.
    pub fn new(name: impl Into<String>, status: FlagStatus) -> Self {
        Self {
            name: name.into(),
            status,
            traffic_type_name: None,
            seed: 0,
            killed: false,
            default_treatment: control(),
            change_number: 0,
            conditions: Vec::new(),
            configurations: None,
        }
    }

    /// Creates an active flag on `traffic_type` serving `on` to everybody.
    pub fn active(name: impl Into<String>, traffic_type: impl Into<String>) -> Self {
        Self::new(name, FlagStatus::Active)
            .with_traffic_type(traffic_type)
            .with_default_treatment("off")
            .with_condition(Condition::all_keys("on", 100))
    }

    /// Creates an archived flag.
    pub fn archived(name: impl Into<String>) -> Self {
        Self::new(name, FlagStatus::Archived)
    }

    /// Sets the traffic type.
    #[must_use]
    pub fn with_traffic_type(mut self, traffic_type: impl Into<String>) -> Self {
        self.traffic_type_name = Some(traffic_type.into());
        self
    }

    /// Sets the default treatment.
    #[must_use]
    pub fn with_default_treatment(mut self, treatment: impl Into<String>) -> Self {
        self.default_treatment = treatment.into();
        self
    }

    /// Appends a condition.
    #[must_use]
    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Sets the change number.
    #[must_use]
    pub fn with_change_number(mut self, change_number: i64) -> Self {
        self.change_number = change_number;
        self
    }

    /// Sets the configuration for a treatment.
    #[must_use]
    pub fn with_config(mut self, treatment: impl Into<String>, config: impl Into<String>) -> Self {
        self.configurations
            .get_or_insert_with(HashMap::new)
            .insert(treatment.into(), config.into());
        self
    }

    /// Returns true if the flag is ACTIVE.
    pub fn is_active(&self) -> bool {
        self.status == FlagStatus::Active
    }

    /// Returns the traffic type, if any.
    pub fn traffic_type(&self) -> Option<&str> {
        self.traffic_type_name.as_deref()
    }

    /// Returns the configuration attached to a treatment.
    pub fn config_for(&self, treatment: &str) -> Option<&str> {
        self.configurations
            .as_ref()
            .and_then(|configs| configs.get(treatment))
            .map(String::as_str)
    }

    /// Checks that the definition can be used for evaluation.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidFlag`] if:
    /// - The name is empty
    /// - A condition has no matchers or an unknown combiner
    /// - A partition has an empty treatment or a size outside `0..=100`
    pub fn validate(&self) -> ProtocolResult<()> {
        if self.name.is_empty() {
            return Err(ProtocolError::invalid_flag("", "empty name"));
        }

        for (index, condition) in self.conditions.iter().enumerate() {
            let group = &condition.matcher_group;
            if group.matchers.is_empty() {
                return Err(ProtocolError::invalid_flag(
                    &self.name,
                    format!("condition {index} has an empty matcher group"),
                ));
            }
            if group.combiner != AND_COMBINER {
                return Err(ProtocolError::invalid_flag(
                    &self.name,
                    format!("condition {index} uses unknown combiner {}", group.combiner),
                ));
            }
            for partition in &condition.partitions {
                if partition.treatment.is_empty() {
                    return Err(ProtocolError::invalid_flag(
                        &self.name,
                        format!("condition {index} has a partition without treatment"),
                    ));
                }
                if !(0..=100).contains(&partition.size) {
                    return Err(ProtocolError::invalid_flag(
                        &self.name,
                        format!(
                            "condition {index} has partition size {} out of range",
                            partition.size
                        ),
                    ));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_server_definition() {
        let json = r#"{
            "trafficTypeName": "account",
            "name": "FACUNDO_TEST",
            "seed": -1222652054,
            "status": "ACTIVE",
            "killed": false,
            "defaultTreatment": "off",
            "changeNumber": 1506703262916,
            "configurations": { "on": "{\"color\":\"green\"}" },
            "conditions": [{
                "conditionType": "WHITELIST",
                "matcherGroup": {
                    "combiner": "AND",
                    "matchers": [{
                        "matcherType": "WHITELIST",
                        "negate": false,
                        "whitelistMatcherData": { "whitelist": ["nico_test"] }
                    }]
                },
                "partitions": [{ "treatment": "on", "size": 100 }],
                "label": "whitelisted"
            }]
        }"#;

        let flag: FeatureFlag = serde_json::from_str(json).unwrap();
        assert!(flag.is_active());
        assert_eq!(flag.traffic_type(), Some("account"));
        assert_eq!(flag.change_number, 1_506_703_262_916);
        assert_eq!(flag.conditions[0].condition_type, ConditionType::Whitelist);
        assert!(flag.conditions[0].matcher_group.matchers[0]
            .payload
            .contains_key("whitelistMatcherData"));
        assert_eq!(flag.config_for("on"), Some("{\"color\":\"green\"}"));
        assert!(flag.validate().is_ok());
    }

    #[test]
    fn missing_default_treatment_is_control() {
        let flag: FeatureFlag =
            serde_json::from_str(r#"{"name":"f","status":"ARCHIVED"}"#).unwrap();
        assert_eq!(flag.default_treatment, CONTROL_TREATMENT);
        assert!(!flag.is_active());
    }

    #[test]
    fn empty_matcher_group_is_invalid() {
        let mut flag = FeatureFlag::active("f", "user");
        flag.conditions[0].matcher_group.matchers.clear();

        let err = flag.validate().unwrap_err();
        assert!(err.to_string().contains("empty matcher group"));
    }

    #[test]
    fn unknown_combiner_is_invalid() {
        let mut flag = FeatureFlag::active("f", "user");
        flag.conditions[0].matcher_group.combiner = "XOR".into();
        assert!(flag.validate().is_err());
    }

    #[test]
    fn partition_size_out_of_range_is_invalid() {
        let flag = FeatureFlag::active("f", "user").with_condition(Condition::all_keys("on", 101));
        assert!(flag.validate().is_err());
    }

    #[test]
    fn builder_sets_fields() {
        let flag = FeatureFlag::active("checkout", "user")
            .with_change_number(42)
            .with_config("on", "{}");

        assert_eq!(flag.name, "checkout");
        assert_eq!(flag.default_treatment, "off");
        assert_eq!(flag.change_number, 42);
        assert_eq!(flag.config_for("on"), Some("{}"));
        assert_eq!(flag.config_for("off"), None);
    }
}
