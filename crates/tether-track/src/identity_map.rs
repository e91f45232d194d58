//! Identity map keyed by (entity set, key hash).
//!
//! Key uniqueness is per entity set, so concrete subtypes sharing one set
//! also share one key space. Entries store the full key tuple; the map only
//! holds the hash, and lookups verify the tuple against the entry.

use std::collections::HashMap;
use tether_core::Value;

/// Handle to a tracked entry inside a context.
pub(crate) type EntryId = usize;

/// Stable hash over an ordered key tuple.
#[must_use]
pub(crate) fn hash_key(values: &[Value]) -> u64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::Hasher;

    let mut hasher = DefaultHasher::new();
    for value in values {
        hash_single_value(value, &mut hasher);
    }
    hasher.finish()
}

/// Hash one value with a variant tag so tuples of different shapes never
/// collide structurally.
fn hash_single_value(v: &Value, hasher: &mut impl std::hash::Hasher) {
    use std::hash::Hash;

    match v {
        Value::Null => 0u8.hash(hasher),
        Value::Bool(b) => {
            1u8.hash(hasher);
            b.hash(hasher);
        }
        Value::Int(i) => {
            2u8.hash(hasher);
            i.hash(hasher);
        }
        Value::BigInt(i) => {
            3u8.hash(hasher);
            i.hash(hasher);
        }
        Value::Double(f) => {
            4u8.hash(hasher);
            f.to_bits().hash(hasher);
        }
        Value::Decimal(s) => {
            5u8.hash(hasher);
            s.hash(hasher);
        }
        Value::Text(s) => {
            6u8.hash(hasher);
            s.hash(hasher);
        }
        Value::Bytes(b) => {
            7u8.hash(hasher);
            b.hash(hasher);
        }
        Value::Date(d) => {
            8u8.hash(hasher);
            d.hash(hasher);
        }
        Value::Timestamp(t) => {
            9u8.hash(hasher);
            t.hash(hasher);
        }
        Value::Uuid(u) => {
            10u8.hash(hasher);
            u.hash(hasher);
        }
    }
}

/// One tracked entry per (entity set, key) pair.
#[derive(Debug, Default)]
pub(crate) struct IdentityMap {
    by_key: HashMap<(&'static str, u64), EntryId>,
}

impl IdentityMap {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get(&self, set: &'static str, key_hash: u64) -> Option<EntryId> {
        self.by_key.get(&(set, key_hash)).copied()
    }

    /// Insert, returning the occupant when the slot is taken.
    pub(crate) fn insert(
        &mut self,
        set: &'static str,
        key_hash: u64,
        id: EntryId,
    ) -> Option<EntryId> {
        match self.by_key.get(&(set, key_hash)) {
            Some(existing) => Some(*existing),
            None => {
                self.by_key.insert((set, key_hash), id);
                None
            }
        }
    }

    pub(crate) fn remove(&mut self, set: &'static str, key_hash: u64) {
        self.by_key.remove(&(set, key_hash));
    }

    /// Move an entry to a new key slot. Fails (and leaves the map untouched)
    /// when the new slot is already occupied by a different entry.
    pub(crate) fn rekey(
        &mut self,
        set: &'static str,
        old_hash: u64,
        new_hash: u64,
        id: EntryId,
    ) -> bool {
        if old_hash == new_hash {
            return true;
        }
        if self
            .by_key
            .get(&(set, new_hash))
            .is_some_and(|occupant| *occupant != id)
        {
            return false;
        }
        self.by_key.remove(&(set, old_hash));
        self.by_key.insert((set, new_hash), id);
        true
    }

    pub(crate) fn len(&self) -> usize {
        self.by_key.len()
    }
}
