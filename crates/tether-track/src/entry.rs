//! Tracked entries: the per-entity bookkeeping of a context.

use crate::identity_map::EntryId;
use crate::state::EntityState;
use serde::Serialize;
use std::any::TypeId;
use std::collections::BTreeSet;
use tether_core::{FieldInfo, Record, RelationshipInfo, Value};

/// Internal bookkeeping for one tracked entity.
///
/// The `current` record is the authoritative value store; typed accessors
/// materialize concrete instances from it on demand. `original` is `None`
/// while the entry is Added.
#[derive(Debug)]
pub(crate) struct TrackedEntry {
    pub(crate) id: EntryId,
    pub(crate) type_id: TypeId,
    pub(crate) type_name: &'static str,
    pub(crate) set_name: &'static str,
    pub(crate) key_columns: &'static [&'static str],
    pub(crate) discriminator: Option<&'static str>,
    pub(crate) fields: &'static [FieldInfo],
    pub(crate) relationships: &'static [RelationshipInfo],
    pub(crate) state: EntityState,
    pub(crate) key: Vec<Value>,
    pub(crate) current: Record,
    pub(crate) original: Option<Record>,
    pub(crate) modified: BTreeSet<String>,
}

impl TrackedEntry {
    /// Re-derive the key tuple from the current record.
    pub(crate) fn recompute_key(&mut self) {
        self.key = self
            .key_columns
            .iter()
            .map(|col| self.current.get(col).cloned().unwrap_or(Value::Null))
            .collect();
    }

    /// Record a write to a property path, promoting Unchanged to Modified.
    pub(crate) fn note_write(&mut self, path: &str) {
        self.modified.insert(path.to_string());
        if self.state == EntityState::Unchanged {
            self.state = EntityState::Modified;
        }
    }

    /// Transition to Unchanged, snapshotting current as the new original.
    pub(crate) fn accept(&mut self) {
        self.state = EntityState::Unchanged;
        self.original = Some(self.current.clone());
        self.modified.clear();
    }
}

/// Public, read-only summary of one tracked entry. Serializes for
/// diagnostics dumps.
#[derive(Debug, Clone, Serialize)]
pub struct EntityEntry {
    /// Entity-set name of the entry.
    pub entity_set: &'static str,
    /// Key tuple (components may be null/default while Added).
    pub key: Vec<Value>,
    /// Lifecycle state.
    pub state: EntityState,
    /// Property paths currently considered modified.
    pub modified: Vec<String>,
}

impl TrackedEntry {
    pub(crate) fn summary(&self) -> EntityEntry {
        EntityEntry {
            entity_set: self.set_name,
            key: self.key.clone(),
            state: self.state,
            modified: self.modified.iter().cloned().collect(),
        }
    }
}
