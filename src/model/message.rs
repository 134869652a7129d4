//! Normalized broker record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A broker record normalized into the envelope rules are evaluated against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Record key, decoded as UTF-8 (lossy)
    pub key: String,
    /// Record value parsed as JSON; non-JSON payloads are kept as a string
    pub value: serde_json::Value,
    /// Source topic
    pub topic: String,
    /// Source partition
    pub partition: i32,
    /// Offset within the partition
    pub offset: i64,
    /// Source timestamp; `None` until stamped with ingestion time
    pub timestamp: Option<DateTime<Utc>>,
}

impl Message {
    /// Build a message from raw record parts
    pub fn from_record(
        topic: impl Into<String>,
        partition: i32,
        offset: i64,
        key: Option<&[u8]>,
        payload: Option<&[u8]>,
        timestamp: Option<DateTime<Utc>>,
    ) -> Self {
        let key = key
            .map(|k| String::from_utf8_lossy(k).into_owned())
            .unwrap_or_default();
        let value = match payload {
            Some(bytes) => match serde_json::from_slice(bytes) {
                Ok(v) => v,
                Err(_) => serde_json::Value::String(String::from_utf8_lossy(bytes).into_owned()),
            },
            None => serde_json::Value::Null,
        };

        Self {
            key,
            value,
            topic: topic.into(),
            partition,
            offset,
            timestamp,
        }
    }

    /// Set the timestamp to `now` if the source did not carry one
    pub fn stamp_if_missing(&mut self, now: DateTime<Utc>) {
        if self.timestamp.is_none() {
            self.timestamp = Some(now);
        }
    }

    /// Timestamp used for ordering; unstamped messages sort first
    pub fn order_key(&self) -> i64 {
        self.timestamp.map_or(i64::MIN, |ts| ts.timestamp_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_json_payload_parsed() {
        let msg = Message::from_record("t", 0, 1, Some(b"k"), Some(br#"{"a":1}"#), None);
        assert_eq!(msg.key, "k");
        assert_eq!(msg.value, serde_json::json!({"a": 1}));
    }

    #[test]
    fn test_non_json_payload_kept_as_string() {
        let msg = Message::from_record("t", 0, 1, None, Some(b"plain text"), None);
        assert_eq!(msg.key, "");
        assert_eq!(msg.value, serde_json::Value::String("plain text".into()));
    }

    #[test]
    fn test_missing_payload_is_null() {
        let msg = Message::from_record("t", 0, 1, None, None, None);
        assert!(msg.value.is_null());
    }

    #[test]
    fn test_stamp_only_when_missing() {
        let source = Utc.timestamp_millis_opt(1_000).unwrap();
        let now = Utc.timestamp_millis_opt(5_000).unwrap();

        let mut stamped = Message::from_record("t", 0, 0, None, None, Some(source));
        stamped.stamp_if_missing(now);
        assert_eq!(stamped.timestamp, Some(source));

        let mut bare = Message::from_record("t", 0, 0, None, None, None);
        bare.stamp_if_missing(now);
        assert_eq!(bare.timestamp, Some(now));
        assert_eq!(bare.order_key(), 5_000);
    }
}
