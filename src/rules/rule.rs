//! Declarative rule definitions and their compiled form

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::TemplateError;
use crate::model::Message;
use crate::template::Template;

/// A rule as written in the session document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    /// All patterns must match for the events to fire
    #[serde(default)]
    pub patterns: Vec<Pattern>,
    /// Events derived from a matching message, in order
    #[serde(default)]
    pub events: Vec<EventTemplate>,
}

/// A templated field matched against a regular expression
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub field: String,
    pub pattern: String,
}

/// Blueprint of an event; every string field is a template
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventTemplate {
    #[serde(default)]
    pub event_type: String,
    #[serde(default)]
    pub fsm_id: String,
    #[serde(default)]
    pub fsm_id_alias: String,
    #[serde(default)]
    pub source_id: String,
    #[serde(default)]
    pub target_id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub aggregate: bool,
    #[serde(default, rename = "noJSON")]
    pub no_json: bool,
}

type Compiled<T> = Result<T, TemplateError>;

fn compile_template(source: &str) -> Compiled<Template> {
    Template::compile(source)
}

fn render(template: &Compiled<Template>, msg: &Message) -> Result<String, TemplateError> {
    template
        .as_ref()
        .map(|t| t.render(msg))
        .map_err(Clone::clone)
}

/// Pattern with its template and regex compiled.
///
/// Compile failures are kept and reported each time a message reaches the
/// pattern, so a broken rule never prevents the session from starting.
#[derive(Debug)]
pub(crate) struct CompiledPattern {
    field: Compiled<Template>,
    regex: Compiled<Regex>,
}

impl CompiledPattern {
    fn new(pattern: &Pattern) -> Self {
        Self {
            field: compile_template(&pattern.field),
            regex: Regex::new(&pattern.pattern)
                .map_err(|e| TemplateError::invalid_pattern(&pattern.pattern, e.to_string())),
        }
    }

    pub(crate) fn matches(&self, msg: &Message) -> Result<bool, TemplateError> {
        let text = render(&self.field, msg)?;
        let regex = self.regex.as_ref().map_err(Clone::clone)?;
        Ok(regex.is_match(&text))
    }
}

/// Expanded event template fields for one message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ExpandedEvent {
    pub event_type: String,
    pub fsm_id: String,
    pub fsm_id_alias: String,
    pub source_id: String,
    pub target_id: String,
    pub text: String,
}

#[derive(Debug)]
pub(crate) struct CompiledEventTemplate {
    event_type: Compiled<Template>,
    fsm_id: Compiled<Template>,
    fsm_id_alias: Compiled<Template>,
    source_id: Compiled<Template>,
    target_id: Compiled<Template>,
    text: Compiled<Template>,
    pub aggregate: bool,
    pub no_json: bool,
}

impl CompiledEventTemplate {
    fn new(template: &EventTemplate) -> Self {
        Self {
            event_type: compile_template(&template.event_type),
            fsm_id: compile_template(&template.fsm_id),
            fsm_id_alias: compile_template(&template.fsm_id_alias),
            source_id: compile_template(&template.source_id),
            target_id: compile_template(&template.target_id),
            text: compile_template(&template.text),
            aggregate: template.aggregate,
            no_json: template.no_json,
        }
    }

    pub(crate) fn expand(&self, msg: &Message) -> Result<ExpandedEvent, TemplateError> {
        Ok(ExpandedEvent {
            event_type: render(&self.event_type, msg)?,
            fsm_id: render(&self.fsm_id, msg)?,
            fsm_id_alias: render(&self.fsm_id_alias, msg)?,
            source_id: render(&self.source_id, msg)?,
            target_id: render(&self.target_id, msg)?,
            text: render(&self.text, msg)?,
        })
    }
}

#[derive(Debug)]
pub(crate) struct CompiledRule {
    pub patterns: Vec<CompiledPattern>,
    pub events: Vec<CompiledEventTemplate>,
}

impl CompiledRule {
    pub(crate) fn new(rule: &Rule) -> Self {
        Self {
            patterns: rule.patterns.iter().map(CompiledPattern::new).collect(),
            events: rule.events.iter().map(CompiledEventTemplate::new).collect(),
        }
    }

    /// AND over all patterns, stopping at the first miss
    pub(crate) fn matches(&self, msg: &Message) -> Result<bool, TemplateError> {
        for pattern in &self.patterns {
            if !pattern.matches(msg)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}
