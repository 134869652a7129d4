//! Session control document

use serde::{Deserialize, Deserializer};

use crate::cluster::{BrokerSet, ConsumerSpec, OffsetDescriptor};
use crate::error::ConfigError;
use crate::rules::Rule;

/// First message a client sends on a new session
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDocument {
    /// Comma separated brokers used by consumers that name none
    #[serde(default)]
    pub brokers: Option<String>,
    /// Offset used by consumers that name none
    #[serde(default, deserialize_with = "optional_offset")]
    pub offset: Option<OffsetDescriptor>,
    #[serde(default)]
    pub consumers: Vec<ConsumerEntry>,
    #[serde(default)]
    pub rules: Vec<Rule>,
    /// Only events for this fsmId are shown
    #[serde(default)]
    pub fsm_id: Option<String>,
    /// Token the client's heartbeats carry
    #[serde(default, rename = "heartbeatUUID")]
    pub heartbeat_uuid: Option<String>,
    #[serde(default)]
    pub tutorial: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerEntry {
    #[serde(default)]
    pub topic: String,
    /// Negative values mean every partition
    #[serde(default)]
    pub partition: Option<i32>,
    #[serde(default, deserialize_with = "optional_offset")]
    pub offset: Option<OffsetDescriptor>,
    #[serde(default)]
    pub brokers: Option<String>,
    /// Report the checkpointed message count instead of consuming
    #[serde(default)]
    pub count_only: bool,
}

/// Empty strings mean "not set"
fn optional_offset<'de, D>(deserializer: D) -> Result<Option<OffsetDescriptor>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(i64),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Text(text)) if text.trim().is_empty() => Ok(None),
        Some(Raw::Text(text)) => OffsetDescriptor::parse(&text)
            .map(Some)
            .map_err(serde::de::Error::custom),
        Some(Raw::Number(n)) => OffsetDescriptor::parse(&n.to_string())
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

/// Where a session's messages come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Tutorial,
    Brokers(Vec<ConsumerSpec>),
}

/// A validated session document
#[derive(Debug, Clone)]
pub struct SessionPlan {
    pub source: Source,
    pub rules: Vec<Rule>,
    pub fsm_id: Option<String>,
    pub heartbeat_token: Option<String>,
    /// Topics reported by checkpoint count only
    pub count_only: Vec<String>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl SessionDocument {
    pub fn from_json(text: &str) -> crate::error::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Validate the document and resolve every consumer's brokers and offset.
    ///
    /// With no broker configured anywhere the session runs the tutorial,
    /// unless it asks for count-only topics, which need a real session.
    pub fn resolve(self, default_brokers: Option<&str>) -> Result<SessionPlan, ConfigError> {
        let global_brokers = non_empty(&self.brokers)
            .or(default_brokers.map(str::trim).filter(|b| !b.is_empty()));
        let any_brokers = global_brokers.is_some()
            || self
                .consumers
                .iter()
                .any(|c| !c.count_only && non_empty(&c.brokers).is_some());
        let any_count_only = self.consumers.iter().any(|c| c.count_only);
        let tutorial = self.tutorial || (!any_brokers && !any_count_only);
        let global_offset = self.offset.unwrap_or_default();

        let mut specs = Vec::new();
        let mut count_only = Vec::new();
        for (i, entry) in self.consumers.iter().enumerate() {
            let topic = entry.topic.trim();
            if topic.is_empty() {
                return Err(ConfigError::missing(format!("topic for consumer {}", i)));
            }
            if entry.count_only {
                count_only.push(topic.to_string());
                continue;
            }
            if tutorial {
                continue;
            }

            let brokers = non_empty(&entry.brokers)
                .or(global_brokers)
                .ok_or_else(|| ConfigError::missing(format!("brokers for topic {}", topic)))?;

            specs.push(ConsumerSpec {
                topic: topic.to_string(),
                partition: entry.partition.filter(|p| *p >= 0),
                offset: entry.offset.unwrap_or(global_offset),
                brokers: BrokerSet::parse(brokers)?,
            });
        }

        Ok(SessionPlan {
            source: if tutorial {
                Source::Tutorial
            } else {
                Source::Brokers(specs)
            },
            rules: self.rules,
            fsm_id: non_empty(&self.fsm_id).map(str::to_string),
            heartbeat_token: non_empty(&self.heartbeat_uuid).map(str::to_string),
            count_only,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(json: &str) -> Result<SessionPlan, ConfigError> {
        SessionDocument::from_json(json).unwrap().resolve(None)
    }

    #[test]
    fn test_full_document() {
        let plan = plan(
            r#"{
                "brokers": "kafka2:9092,kafka1:9092",
                "offset": "oldest",
                "consumers": [
                    {"topic": "orders"},
                    {"topic": "payments", "partition": 2, "offset": "-10", "brokers": "other:9092"},
                    {"topic": "audit", "countOnly": true}
                ],
                "rules": [{"patterns": [], "events": []}],
                "fsmId": "fsm-1",
                "heartbeatUUID": "abc"
            }"#,
        )
        .unwrap();

        let Source::Brokers(specs) = plan.source else {
            panic!("expected brokers");
        };
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].brokers.key(), "kafka1:9092,kafka2:9092");
        assert_eq!(specs[0].partition, None);
        assert_eq!(specs[0].offset, OffsetDescriptor::Oldest);
        assert_eq!(specs[1].partition, Some(2));
        assert_eq!(specs[1].offset, OffsetDescriptor::RelativeFromNewest(-10));
        assert_eq!(specs[1].brokers.key(), "other:9092");
        assert_eq!(plan.count_only, vec!["audit".to_string()]);
        assert_eq!(plan.rules.len(), 1);
        assert_eq!(plan.fsm_id.as_deref(), Some("fsm-1"));
        assert_eq!(plan.heartbeat_token.as_deref(), Some("abc"));
    }

    #[test]
    fn test_defaults() {
        let plan = plan(r#"{"brokers": "k:9092", "consumers": [{"topic": "t", "offset": "", "partition": -1}]}"#).unwrap();
        let Source::Brokers(specs) = plan.source else {
            panic!("expected brokers");
        };
        assert_eq!(specs[0].offset, OffsetDescriptor::Newest);
        assert_eq!(specs[0].partition, None);
        assert!(plan.fsm_id.is_none());
        assert!(plan.heartbeat_token.is_none());
    }

    #[test]
    fn test_no_brokers_means_tutorial() {
        let plan = plan(r#"{"consumers": [{"topic": "t"}]}"#).unwrap();
        assert_eq!(plan.source, Source::Tutorial);
    }

    #[test]
    fn test_count_only_topics_are_not_a_tutorial() {
        let planned = plan(r#"{"fsmId": "f", "consumers": [{"topic": "audit", "countOnly": true}]}"#).unwrap();
        assert_eq!(planned.source, Source::Brokers(Vec::new()));
        assert_eq!(planned.count_only, vec!["audit".to_string()]);

        let err = plan(r#"{"consumers": [{"topic": "audit", "countOnly": true}, {"topic": "t"}]}"#)
            .unwrap_err();
        assert_eq!(err, ConfigError::missing("brokers for topic t"));
    }

    #[test]
    fn test_server_default_brokers() {
        let plan = SessionDocument::from_json(r#"{"consumers": [{"topic": "t"}]}"#)
            .unwrap()
            .resolve(Some("fallback:9092"))
            .unwrap();
        let Source::Brokers(specs) = plan.source else {
            panic!("expected brokers");
        };
        assert_eq!(specs[0].brokers.key(), "fallback:9092");
    }

    #[test]
    fn test_explicit_tutorial() {
        let plan = plan(r#"{"brokers": "k:9092", "tutorial": true, "consumers": [{"topic": "t"}]}"#).unwrap();
        assert_eq!(plan.source, Source::Tutorial);
    }

    #[test]
    fn test_partial_brokers_rejected() {
        let err = plan(r#"{"consumers": [{"topic": "a", "brokers": "k:9092"}, {"topic": "b"}]}"#).unwrap_err();
        assert_eq!(err, ConfigError::missing("brokers for topic b"));
    }

    #[test]
    fn test_missing_topic_rejected() {
        assert!(plan(r#"{"brokers": "k:9092", "consumers": [{"partition": 1}]}"#).is_err());
    }

    #[test]
    fn test_invalid_offset_rejected() {
        assert!(SessionDocument::from_json(r#"{"offset": "yesterday"}"#).is_err());
        let doc = SessionDocument::from_json(r#"{"consumers": [{"topic": "t", "offset": -5}]}"#).unwrap();
        assert_eq!(
            doc.consumers[0].offset,
            Some(OffsetDescriptor::RelativeFromNewest(-5))
        );
    }
}
