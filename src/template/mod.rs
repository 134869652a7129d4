//! Rule templates
//!
//! A template is literal text interleaved with `{{ ... }}` actions that pull
//! fields out of a [`Message`]. Templates are compiled once into a list of
//! literals and field paths, so evaluation is a deterministic walk over the
//! message with no general-purpose interpreter involved.
//!
//! Supported actions:
//!
//! | Action | Renders |
//! |--------|---------|
//! | `.Topic`, `.Key` | the string as-is |
//! | `.Partition`, `.Offset` | the integer |
//! | `.Timestamp` | RFC 3339 timestamp, empty when unset |
//! | `.Value` | the whole value |
//! | `.Value.a.b` | object path lookup |
//! | `index .Value "a" 0` | object keys (quoted) and array indices (integers) |
//!
//! Strings render raw, numbers and booleans in canonical form, objects and
//! arrays as compact JSON, and `null` or missing paths as empty text.

mod parse;

use crate::error::TemplateError;
use crate::model::Message;
use chrono::SecondsFormat;
use serde_json::Value;

/// Message field an action starts from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Root {
    Topic,
    Key,
    Partition,
    Offset,
    Timestamp,
    Value,
}

impl Root {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "Topic" => Some(Root::Topic),
            "Key" => Some(Root::Key),
            "Partition" => Some(Root::Partition),
            "Offset" => Some(Root::Offset),
            "Timestamp" => Some(Root::Timestamp),
            "Value" => Some(Root::Value),
            _ => None,
        }
    }
}

/// One step of a lookup inside the message value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// A field reference: a root plus a path into the value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    pub root: Root,
    pub path: Vec<PathSegment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Literal(String),
    Field(FieldPath),
}

/// A compiled template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    parts: Vec<Part>,
}

impl Template {
    /// Compile a template string
    pub fn compile(source: &str) -> Result<Self, TemplateError> {
        let parts = parse::parse_parts(source)?;
        Ok(Self {
            source: source.to_string(),
            parts,
        })
    }

    /// The template as written
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether the template has no actions
    pub fn is_literal(&self) -> bool {
        self.parts.iter().all(|p| matches!(p, Part::Literal(_)))
    }

    /// Evaluate against a message
    pub fn render(&self, msg: &Message) -> String {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                Part::Literal(text) => out.push_str(text),
                Part::Field(field) => render_field(field, msg, &mut out),
            }
        }
        out
    }
}

fn render_field(field: &FieldPath, msg: &Message, out: &mut String) {
    match field.root {
        Root::Topic => out.push_str(&msg.topic),
        Root::Key => out.push_str(&msg.key),
        Root::Partition => out.push_str(&msg.partition.to_string()),
        Root::Offset => out.push_str(&msg.offset.to_string()),
        Root::Timestamp => {
            if let Some(ts) = msg.timestamp {
                out.push_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true));
            }
        }
        Root::Value => {
            if let Some(value) = lookup(&msg.value, &field.path) {
                render_value(value, out);
            }
        }
    }
}

/// Walk `path` into `value`
pub fn lookup<'a>(value: &'a Value, path: &[PathSegment]) -> Option<&'a Value> {
    path.iter().try_fold(value, |current, segment| match segment {
        PathSegment::Key(key) => current.as_object()?.get(key),
        PathSegment::Index(idx) => current.as_array()?.get(*idx),
    })
}

fn render_value(value: &Value, out: &mut String) {
    match value {
        Value::Null => {}
        Value::String(s) => out.push_str(s),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::Array(_) | Value::Object(_) => out.push_str(&value.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn message(value: &str) -> Message {
        Message {
            key: "123".to_string(),
            value: serde_json::from_str(value).unwrap(),
            topic: "topic".to_string(),
            partition: 2,
            offset: 213,
            timestamp: Some(Utc.timestamp_millis_opt(1_500).unwrap()),
        }
    }

    fn render(template: &str, value: &str) -> String {
        Template::compile(template).unwrap().render(&message(value))
    }

    #[test]
    fn test_literal() {
        let t = Template::compile("Hi!").unwrap();
        assert!(t.is_literal());
        assert_eq!(t.render(&message("{}")), "Hi!");
    }

    #[test]
    fn test_envelope_fields() {
        assert_eq!(render("{{.Topic}}", "{}"), "topic");
        assert_eq!(render("{{ .Key }}", "{}"), "123");
        assert_eq!(render("{{.Partition}}/{{.Offset}}", "{}"), "2/213");
        assert_eq!(render("{{.Timestamp}}", "{}"), "1970-01-01T00:00:01.500Z");
    }

    #[test]
    fn test_index_lookup() {
        assert_eq!(render(r#"{{index .Value "value"}}"#, r#"{"value":666}"#), "666");
        assert_eq!(
            render(r#"{{index .Value "name"}}"#, r#"{"name":"relevant"}"#),
            "relevant"
        );
        assert_eq!(
            render(r#"{{index .Value "a" "b" 1}}"#, r#"{"a":{"b":[10,20]}}"#),
            "20"
        );
    }

    #[test]
    fn test_dotted_path() {
        assert_eq!(render("{{.Value.a.b}}", r#"{"a":{"b":true}}"#), "true");
        assert_eq!(render("{{.Value.a}}", r#"{"a":{"b":1}}"#), r#"{"b":1}"#);
    }

    #[test]
    fn test_missing_and_null_render_empty() {
        assert_eq!(render(r#"{{index .Value "nope"}}"#, "{}"), "");
        assert_eq!(render(r#"x{{index .Value "n"}}y"#, r#"{"n":null}"#), "xy");
        assert_eq!(render(r#"{{index .Value 0}}"#, r#"{"a":1}"#), "");
    }

    #[test]
    fn test_mixed_literals_and_actions() {
        assert_eq!(
            render(r#"order {{index .Value "id"}} on {{.Topic}}"#, r#"{"id":"o-1"}"#),
            "order o-1 on topic"
        );
    }

    #[test]
    fn test_compile_errors() {
        assert!(matches!(
            Template::compile("{{.Topic"),
            Err(TemplateError::Unterminated { .. })
        ));
        assert!(matches!(
            Template::compile("{{.Nope}}"),
            Err(TemplateError::UnsupportedAction { .. })
        ));
        assert!(matches!(
            Template::compile("{{.Topic.x}}"),
            Err(TemplateError::UnsupportedAction { .. })
        ));
        assert!(matches!(
            Template::compile(r#"{{index .Value "unterminated}}"#),
            Err(TemplateError::MalformedIndex { .. })
        ));
        assert!(matches!(
            Template::compile("{{index}}"),
            Err(TemplateError::MalformedIndex { .. })
        ));
    }
}
