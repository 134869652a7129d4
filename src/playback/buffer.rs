use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use crate::model::Message;

/// Messages kept in ascending timestamp order.
///
/// Equal timestamps keep their arrival order.
#[derive(Debug, Default)]
pub struct ReorderBuffer {
    messages: VecDeque<Message>,
}

impl ReorderBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Insert by scanning back from the tail; arrivals are mostly in order,
    /// so this is usually a push.
    pub fn insert(&mut self, msg: Message) {
        let key = msg.order_key();
        let mut pos = self.messages.len();
        while pos > 0 && self.messages[pos - 1].order_key() > key {
            pos -= 1;
        }
        self.messages.insert(pos, msg);
    }

    pub fn earliest(&self) -> Option<DateTime<Utc>> {
        self.messages.front().and_then(|m| m.timestamp)
    }

    /// Pop up to `max` head messages stamped at or before `until`
    pub fn drain_until(&mut self, until: DateTime<Utc>, max: usize) -> Vec<Message> {
        let limit = until.timestamp_millis();
        let mut due = Vec::new();
        while due.len() < max {
            match self.messages.front() {
                Some(head) if head.order_key() <= limit => {}
                _ => break,
            }
            if let Some(msg) = self.messages.pop_front() {
                due.push(msg);
            }
        }
        due
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn msg(ts: i64, offset: i64) -> Message {
        let ts = Utc.timestamp_millis_opt(ts).unwrap();
        Message::from_record("t", 0, offset, None, None, Some(ts))
    }

    #[test]
    fn test_insert_keeps_order_and_stability() {
        let mut buffer = ReorderBuffer::new();
        for (ts, offset) in [(30, 0), (10, 1), (20, 2), (10, 3), (40, 4)] {
            buffer.insert(msg(ts, offset));
        }
        let offsets: Vec<i64> = buffer.iter().map(|m| m.offset).collect();
        assert_eq!(offsets, vec![1, 3, 2, 0, 4]);
    }

    #[test]
    fn test_drain_until_respects_limit_and_cap() {
        let mut buffer = ReorderBuffer::new();
        for (ts, offset) in [(10, 0), (20, 1), (30, 2)] {
            buffer.insert(msg(ts, offset));
        }
        let until = Utc.timestamp_millis_opt(25).unwrap();
        assert_eq!(buffer.drain_until(until, 1).len(), 1);
        assert_eq!(buffer.drain_until(until, 10).len(), 1);
        assert!(buffer.drain_until(until, 10).is_empty());
        assert_eq!(buffer.len(), 1);
    }
}
