//! Events sent to the visualization client

use serde::{Deserialize, Serialize};

/// Reserved event type announcing a new fsmId/fsmIdAlias binding
pub const ALIAS_EVENT: &str = "alias";

/// Reserved event type carrying operator-visible diagnostics
pub const LOG_EVENT: &str = "log";

/// Color of a `"log"` event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    Happy,
    Error,
}

impl Color {
    pub fn as_str(&self) -> &'static str {
        match self {
            Color::Happy => "happy",
            Color::Error => "error",
        }
    }
}

/// A derived event. Empty fields are omitted on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub event_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub fsm_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub fsm_id_alias: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub target_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub json: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub count: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub color: String,
    /// Whether this event collapses into an earlier one with the same route
    #[serde(skip)]
    pub aggregate: bool,
}

fn is_zero(n: &u64) -> bool {
    *n == 0
}

impl Event {
    /// A `"log"` event with the given color
    pub fn log(text: impl Into<String>, color: Color) -> Self {
        Self {
            event_type: LOG_EVENT.to_string(),
            text: text.into(),
            color: color.as_str().to_string(),
            ..Default::default()
        }
    }

    pub fn happy(text: impl Into<String>) -> Self {
        Self::log(text, Color::Happy)
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::log(text, Color::Error)
    }

    /// An `"alias"` event for a new binding
    pub fn alias(fsm_id: impl Into<String>, fsm_id_alias: impl Into<String>) -> Self {
        Self {
            event_type: ALIAS_EVENT.to_string(),
            fsm_id: fsm_id.into(),
            fsm_id_alias: fsm_id_alias.into(),
            ..Default::default()
        }
    }

    /// Reserved events are never aggregated or filtered by route
    pub fn is_reserved(&self) -> bool {
        self.event_type == ALIAS_EVENT || self.event_type == LOG_EVENT
    }

    /// Whether `other` travels the same `(fsmId, sourceId, targetId)` route
    pub fn same_route(&self, other: &Event) -> bool {
        self.fsm_id == other.fsm_id
            && self.source_id == other.source_id
            && self.target_id == other.target_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_event_serialization() {
        let json = serde_json::to_value(Event::error("boom")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"eventType": "log", "text": "boom", "color": "error"})
        );
    }

    #[test]
    fn test_alias_event_serialization() {
        let json = serde_json::to_value(Event::alias("666", "777")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"eventType": "alias", "fsmId": "666", "fsmIdAlias": "777"})
        );
    }

    #[test]
    fn test_message_event_serialization() {
        let event = Event {
            event_type: "message".into(),
            fsm_id: "456".into(),
            source_id: "A".into(),
            target_id: "B".into(),
            text: "Hi!".into(),
            json: vec![serde_json::json!({})],
            count: 1,
            aggregate: true,
            ..Default::default()
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "eventType": "message",
                "fsmId": "456",
                "sourceId": "A",
                "targetId": "B",
                "text": "Hi!",
                "json": [{}],
                "count": 1
            })
        );
    }

    #[test]
    fn test_reserved() {
        assert!(Event::happy("ok").is_reserved());
        assert!(Event::alias("a", "b").is_reserved());
        assert!(!Event::default().is_reserved());
    }
}
