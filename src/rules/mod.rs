//! Rule engine
//!
//! Turns dispatched messages into events. The engine owns the session's
//! [`AliasMap`] and [`IncompleteQueue`] and is driven by a single task, so
//! neither needs a lock.
//!
//! For every rule whose patterns all match a message, each event template
//! is expanded and its fsmId resolved through the alias map. A template
//! that names both an fsmId and a new alias binds the pair and emits an
//! `"alias"` event. Events that only know their alias wait in the
//! incomplete queue until a binding shows up; [`RuleEngine::process_tick`]
//! flushes them once they are resolved.

mod alias;
mod rule;

pub use alias::{AliasMap, IncompleteQueue};
pub use rule::{EventTemplate, Pattern, Rule};

use rule::{CompiledEventTemplate, CompiledRule};
use tracing::{debug, warn};

use crate::error::{FlowError, TemplateError};
use crate::model::{Event, Message};

/// Evaluates a rule set against an ordered stream of messages
#[derive(Debug)]
pub struct RuleEngine {
    rules: Vec<CompiledRule>,
    filter: Option<String>,
    aliases: AliasMap,
    incomplete: IncompleteQueue,
}

impl RuleEngine {
    /// Compile `rules`. Only events whose resolved fsmId equals `filter`
    /// are emitted when a filter is given.
    pub fn new(rules: &[Rule], filter: Option<String>) -> Self {
        Self {
            rules: rules.iter().map(CompiledRule::new).collect(),
            filter: filter.filter(|f| !f.is_empty()),
            aliases: AliasMap::new(),
            incomplete: IncompleteQueue::new(),
        }
    }

    pub fn aliases(&self) -> &AliasMap {
        &self.aliases
    }

    pub fn incomplete(&self) -> &IncompleteQueue {
        &self.incomplete
    }

    pub fn filter(&self) -> Option<&str> {
        self.filter.as_deref()
    }

    fn passes_filter(&self, fsm_id: &str) -> bool {
        self.filter.as_deref().map_or(true, |f| f == fsm_id)
    }

    /// Evaluate one message, appending derived events to `events`.
    ///
    /// On error, evaluation of this message stops; events it already
    /// appended are kept.
    pub fn process_message(
        &mut self,
        msg: &Message,
        events: &mut Vec<Event>,
    ) -> Result<(), TemplateError> {
        // Split borrows: rules are read while alias state is mutated.
        let Self {
            rules,
            filter,
            aliases,
            incomplete,
        } = self;
        let filter = filter.as_deref();

        for rule in rules.iter() {
            if !rule.matches(msg)? {
                continue;
            }
            for template in &rule.events {
                apply_template(template, msg, filter, aliases, incomplete, events)?;
            }
        }
        Ok(())
    }

    /// Move resolved incomplete events into `events`, once each
    pub fn flush_resolved(&mut self, events: &mut Vec<Event>) {
        for event in self.incomplete.take_resolved() {
            if self.passes_filter(&event.fsm_id) {
                aggregate(events, event);
            } else {
                debug!(fsm_id = %event.fsm_id, "dropping resolved event outside filter");
            }
        }
    }

    /// Evaluate one tick's messages in order and return the batch to send.
    ///
    /// Template failures become error `"log"` events in the batch and the
    /// tick carries on with the next message.
    pub fn process_tick<I>(&mut self, messages: I) -> Vec<Event>
    where
        I: IntoIterator<Item = Message>,
    {
        let mut events = Vec::new();
        for msg in messages {
            if let Err(err) = self.process_message(&msg, &mut events) {
                warn!(
                    topic = %msg.topic,
                    partition = msg.partition,
                    offset = msg.offset,
                    error = %err,
                    "rule evaluation failed"
                );
                let err = FlowError::from(err);
                events.push(Event::error(format!("{}: {}", err.classifier(), err)));
            }
        }
        self.flush_resolved(&mut events);
        events
    }
}

fn apply_template(
    template: &CompiledEventTemplate,
    msg: &Message,
    filter: Option<&str>,
    aliases: &mut AliasMap,
    incomplete: &mut IncompleteQueue,
    events: &mut Vec<Event>,
) -> Result<(), TemplateError> {
    let expanded = template.expand(msg)?;
    let fsm_id = aliases.resolve(&expanded.fsm_id).to_string();
    let alias = expanded.fsm_id_alias;

    if !alias.is_empty() && !fsm_id.is_empty() && !aliases.is_bound(&alias) {
        aliases.bind(&alias, &fsm_id);
        let patched = incomplete.patch(&alias, &fsm_id);
        debug!(%alias, %fsm_id, patched, "bound alias");
        if filter.map_or(true, |f| f == fsm_id) {
            events.push(Event::alias(fsm_id.as_str(), alias.as_str()));
        }
    }

    let json = if template.no_json {
        Vec::new()
    } else {
        vec![msg.value.clone()]
    };

    if fsm_id.is_empty() && !alias.is_empty() {
        incomplete.push(Event {
            event_type: expanded.event_type,
            fsm_id_alias: alias,
            source_id: expanded.source_id,
            target_id: expanded.target_id,
            text: expanded.text,
            json,
            count: 1,
            aggregate: template.aggregate,
            ..Default::default()
        });
        return Ok(());
    }

    if filter.map_or(false, |f| f != fsm_id) {
        return Ok(());
    }

    aggregate(
        events,
        Event {
            event_type: expanded.event_type,
            fsm_id,
            source_id: expanded.source_id,
            target_id: expanded.target_id,
            text: expanded.text,
            json,
            count: 1,
            aggregate: template.aggregate,
            ..Default::default()
        },
    );
    Ok(())
}

/// Append `event` to `events`, folding it into an earlier event on the same
/// `(fsmId, sourceId, targetId)` route when it is marked `aggregate`.
pub fn aggregate(events: &mut Vec<Event>, event: Event) {
    if event.aggregate {
        if let Some(existing) = events
            .iter_mut()
            .find(|e| !e.is_reserved() && e.same_route(&event))
        {
            existing.count += event.count.max(1);
            existing.json.extend(event.json);
            return;
        }
    }
    events.push(event);
}
