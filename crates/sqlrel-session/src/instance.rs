//! Entity instances held by a session.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use sqlrel_core::Value;

use crate::pending::RelationChange;

/// Handle of an instance inside one [`Session`](crate::Session).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(usize);

impl InstanceId {
    pub(crate) const fn from_index(index: usize) -> Self {
        Self(index)
    }

    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Cached contents of a loaded relation. An absent entry means not loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationCache {
    One(Option<InstanceId>),
    Many(Vec<InstanceId>),
}

/// In-memory record of one entity row.
///
/// Related instances are referenced by id; the session arena owns them all.
#[derive(Debug, Clone)]
pub struct Instance {
    id: InstanceId,
    entity: String,
    values: BTreeMap<String, Value>,
    persisted: bool,
    dirty: BTreeSet<String>,
    relations: HashMap<String, RelationCache>,
    pending: BTreeMap<String, RelationChange>,
}

impl Instance {
    pub(crate) fn new(id: InstanceId, entity: &str, persisted: bool) -> Self {
        Self {
            id,
            entity: entity.to_string(),
            values: BTreeMap::new(),
            persisted,
            dirty: BTreeSet::new(),
            relations: HashMap::new(),
            pending: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn get(&self, attr: &str) -> Option<&Value> {
        self.values.get(attr)
    }

    /// Attribute value, NULL when unset.
    pub fn value(&self, attr: &str) -> Value {
        self.values.get(attr).cloned().unwrap_or(Value::Null)
    }

    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    pub fn dirty_fields(&self) -> impl Iterator<Item = &str> {
        self.dirty.iter().map(String::as_str)
    }

    pub fn is_loaded(&self, relation: &str) -> bool {
        self.relations.contains_key(relation)
    }

    pub fn cache(&self, relation: &str) -> Option<&RelationCache> {
        self.relations.get(relation)
    }

    /// Unflushed changes recorded for `relation`.
    pub fn pending_change(&self, relation: &str) -> Option<&RelationChange> {
        self.pending.get(relation)
    }

    pub fn has_pending_changes(&self) -> bool {
        self.pending.values().any(|c| !c.is_empty())
    }

    pub(crate) fn set_value(&mut self, attr: &str, value: Value, mark_dirty: bool) {
        if mark_dirty && self.values.get(attr) != Some(&value) {
            self.dirty.insert(attr.to_string());
        }
        self.values.insert(attr.to_string(), value);
    }

    /// Overwrite clean attributes with freshly fetched values.
    pub(crate) fn refresh(&mut self, values: BTreeMap<String, Value>) {
        for (attr, value) in values {
            if !self.dirty.contains(&attr) {
                self.values.insert(attr, value);
            }
        }
    }

    pub(crate) fn mark_persisted(&mut self) {
        self.persisted = true;
        self.dirty.clear();
    }

    pub(crate) fn dirty_set(&self) -> &BTreeSet<String> {
        &self.dirty
    }

    pub(crate) fn set_cache(&mut self, relation: &str, cache: RelationCache) {
        self.relations.insert(relation.to_string(), cache);
    }

    pub(crate) fn cache_mut(&mut self, relation: &str) -> Option<&mut RelationCache> {
        self.relations.get_mut(relation)
    }

    pub(crate) fn change_mut(&mut self, relation: &str) -> &mut RelationChange {
        self.pending.entry(relation.to_string()).or_default()
    }

    pub(crate) fn pending_relations(&self) -> Vec<String> {
        self.pending.keys().cloned().collect()
    }

    pub(crate) fn finish_change(&mut self, relation: &str) {
        self.pending.remove(relation);
    }
}

impl RelationCache {
    /// Add `id` to a collection cache, keeping order and uniqueness.
    pub(crate) fn push(&mut self, id: InstanceId) {
        match self {
            RelationCache::Many(ids) => {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
            RelationCache::One(slot) => *slot = Some(id),
        }
    }

    pub(crate) fn remove(&mut self, id: InstanceId) {
        match self {
            RelationCache::Many(ids) => ids.retain(|i| *i != id),
            RelationCache::One(slot) => {
                if *slot == Some(id) {
                    *slot = None;
                }
            }
        }
    }
}
