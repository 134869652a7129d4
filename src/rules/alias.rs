//! Session-scoped alias state

use std::collections::HashMap;

use crate::model::Event;

/// `fsmIdAlias -> fsmId` bindings. Entries are write-once.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AliasMap {
    bindings: HashMap<String, String>,
}

impl AliasMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `alias` to `fsm_id`. Returns `false` if the alias was already bound,
    /// in which case the existing binding is kept.
    pub fn bind(&mut self, alias: &str, fsm_id: &str) -> bool {
        if self.bindings.contains_key(alias) {
            return false;
        }
        self.bindings.insert(alias.to_string(), fsm_id.to_string());
        true
    }

    pub fn is_bound(&self, alias: &str) -> bool {
        self.bindings.contains_key(alias)
    }

    /// The fsmId an identifier stands for: its binding if it is a known
    /// alias, otherwise the identifier itself.
    pub fn resolve<'a>(&'a self, id: &'a str) -> &'a str {
        match self.bindings.get(id) {
            Some(fsm_id) if !fsm_id.is_empty() => fsm_id,
            _ => id,
        }
    }

    pub fn get(&self, alias: &str) -> Option<&str> {
        self.bindings.get(alias).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// Events waiting for their alias to be bound
#[derive(Debug, Default, Clone, PartialEq)]
pub struct IncompleteQueue {
    entries: Vec<Event>,
}

impl IncompleteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: Event) {
        self.entries.push(event);
    }

    /// Fill in `fsm_id` on every entry waiting for `alias`. Patched entries
    /// lose their alias, so a later call never touches them again.
    pub fn patch(&mut self, alias: &str, fsm_id: &str) -> usize {
        let mut patched = 0;
        for entry in self
            .entries
            .iter_mut()
            .filter(|e| e.fsm_id.is_empty() && e.fsm_id_alias == alias)
        {
            entry.fsm_id = fsm_id.to_string();
            entry.fsm_id_alias.clear();
            patched += 1;
        }
        patched
    }

    /// Remove and return every entry that has acquired an fsmId, in queue order
    pub fn take_resolved(&mut self) -> Vec<Event> {
        let (resolved, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|e| !e.fsm_id.is_empty());
        self.entries = pending;
        resolved
    }

    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
