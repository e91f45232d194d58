//! Backing-store abstraction and the in-memory reference backend.
//!
//! The engine itself never talks to a store except through [`Backend`]:
//! point lookups by key (sync and async) and batched application of the
//! pending change set. Store-snapshot retrieval is the only operation in the
//! engine expected to suspend, so `fetch_async` integrates with asupersync's
//! `Cx`/`Outcome` structured concurrency while everything else stays
//! synchronous.

use crate::identity_map::hash_key;
use asupersync::{Cx, Outcome};
use std::collections::HashMap;
use std::future::Future;
use tether_core::{Entity, Error, Record, Result, StoreErrorKind, Value};

/// One pending write produced by a save pass.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOp {
    /// Insert a new row.
    Insert {
        set: String,
        key: Vec<Value>,
        record: Record,
    },
    /// Overwrite an existing row.
    Update {
        set: String,
        key: Vec<Value>,
        record: Record,
    },
    /// Delete a row.
    Delete { set: String, key: Vec<Value> },
}

/// A backing store the context can read snapshots from and flush changes to.
pub trait Backend: Send + Sync {
    /// Point lookup of one row by key. `Ok(None)` when the row is absent.
    fn fetch(&self, set: &str, key: &[Value]) -> Result<Option<Record>>;

    /// Async variant of [`Backend::fetch`].
    ///
    /// The default delegates to the synchronous lookup; backends with real
    /// I/O override this.
    fn fetch_async(
        &self,
        _cx: &Cx,
        set: &str,
        key: &[Value],
    ) -> impl Future<Output = Outcome<Option<Record>, Error>> + Send {
        let result = self.fetch(set, key);
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }

    /// Apply a batch of writes. Backends are not required to be atomic
    /// across the batch; the context reports partial failures to the caller.
    fn apply(&mut self, ops: Vec<StoreOp>) -> Result<()>;
}

/// In-memory backend keyed by (set name, key hash).
#[derive(Debug, Default)]
pub struct MemoryBackend {
    sets: HashMap<String, HashMap<u64, Record>>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed one row from a typed entity, stamping its discriminator when the
    /// type declares one.
    pub fn seed<E: Entity>(&mut self, entity: &E) {
        let mut record = entity.to_record();
        if let Some(disc) = E::DISCRIMINATOR {
            record.set(tether_core::DISCRIMINATOR_COLUMN, Value::Text(disc.into()));
        }
        self.seed_record(E::SET_NAME, &entity.key_value(), record);
    }

    /// Seed one raw row.
    pub fn seed_record(&mut self, set: &str, key: &[Value], record: Record) {
        self.sets
            .entry(set.to_string())
            .or_default()
            .insert(hash_key(key), record);
    }

    /// Number of rows currently held for a set.
    #[must_use]
    pub fn row_count(&self, set: &str) -> usize {
        self.sets.get(set).map_or(0, HashMap::len)
    }

    /// Direct row access, for assertions.
    #[must_use]
    pub fn row(&self, set: &str, key: &[Value]) -> Option<&Record> {
        self.sets.get(set)?.get(&hash_key(key))
    }
}

impl Backend for MemoryBackend {
    fn fetch(&self, set: &str, key: &[Value]) -> Result<Option<Record>> {
        Ok(self.sets.get(set).and_then(|rows| rows.get(&hash_key(key)).cloned()))
    }

    #[tracing::instrument(level = "debug", skip(self, ops))]
    fn apply(&mut self, ops: Vec<StoreOp>) -> Result<()> {
        for op in ops {
            match op {
                StoreOp::Insert { set, key, record } => {
                    let rows = self.sets.entry(set.clone()).or_default();
                    let hash = hash_key(&key);
                    if rows.contains_key(&hash) {
                        return Err(Error::store(
                            StoreErrorKind::Conflict,
                            format!("insert into '{set}' conflicts with an existing row"),
                        ));
                    }
                    rows.insert(hash, record);
                }
                StoreOp::Update { set, key, record } => {
                    let rows = self.sets.get_mut(&set).ok_or_else(|| {
                        Error::store(StoreErrorKind::UnknownSet, format!("unknown set '{set}'"))
                    })?;
                    let hash = hash_key(&key);
                    if !rows.contains_key(&hash) {
                        return Err(Error::store(
                            StoreErrorKind::Conflict,
                            format!("update of a missing row in '{set}'"),
                        ));
                    }
                    rows.insert(hash, record);
                }
                StoreOp::Delete { set, key } => {
                    let rows = self.sets.get_mut(&set).ok_or_else(|| {
                        Error::store(StoreErrorKind::UnknownSet, format!("unknown set '{set}'"))
                    })?;
                    if rows.remove(&hash_key(&key)).is_none() {
                        return Err(Error::store(
                            StoreErrorKind::Conflict,
                            format!("delete of a missing row in '{set}'"),
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Whether a fetched row's discriminator admits materialization as a type
/// declaring `discriminator`.
#[must_use]
pub(crate) fn discriminator_matches(record: &Record, discriminator: Option<&'static str>) -> bool {
    match discriminator {
        None => true,
        Some(expected) => match record.get(tether_core::DISCRIMINATOR_COLUMN) {
            // Rows without a stamp predate subtype mapping; accept them.
            None | Some(Value::Null) => true,
            Some(Value::Text(actual)) => actual == expected,
            Some(_) => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: i32, name: &str) -> Record {
        Record::from_pairs(vec![
            ("Id".into(), Value::Int(id)),
            ("Name".into(), Value::Text(name.into())),
        ])
    }

    #[test]
    fn test_fetch_round_trip() {
        let mut backend = MemoryBackend::new();
        backend.seed_record("Offices", &[Value::Int(1)], row(1, "HQ"));
        let fetched = backend.fetch("Offices", &[Value::Int(1)]).unwrap().unwrap();
        assert_eq!(fetched.get("Name"), Some(&Value::Text("HQ".into())));
        assert!(backend.fetch("Offices", &[Value::Int(2)]).unwrap().is_none());
        assert!(backend.fetch("Nowhere", &[Value::Int(1)]).unwrap().is_none());
    }

    #[test]
    fn test_apply_insert_update_delete() {
        let mut backend = MemoryBackend::new();
        backend
            .apply(vec![StoreOp::Insert {
                set: "Offices".into(),
                key: vec![Value::Int(1)],
                record: row(1, "HQ"),
            }])
            .unwrap();
        assert_eq!(backend.row_count("Offices"), 1);

        backend
            .apply(vec![StoreOp::Update {
                set: "Offices".into(),
                key: vec![Value::Int(1)],
                record: row(1, "Annex"),
            }])
            .unwrap();
        assert_eq!(
            backend.row("Offices", &[Value::Int(1)]).unwrap().get("Name"),
            Some(&Value::Text("Annex".into()))
        );

        backend
            .apply(vec![StoreOp::Delete {
                set: "Offices".into(),
                key: vec![Value::Int(1)],
            }])
            .unwrap();
        assert_eq!(backend.row_count("Offices"), 0);
    }

    #[test]
    fn test_duplicate_insert_conflicts() {
        let mut backend = MemoryBackend::new();
        backend.seed_record("Offices", &[Value::Int(1)], row(1, "HQ"));
        let err = backend
            .apply(vec![StoreOp::Insert {
                set: "Offices".into(),
                key: vec![Value::Int(1)],
                record: row(1, "HQ"),
            }])
            .unwrap_err();
        match err {
            Error::Store(e) => assert_eq!(e.kind, StoreErrorKind::Conflict),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_discriminator_matching() {
        let mut stamped = row(1, "HQ");
        stamped.set(
            tether_core::DISCRIMINATOR_COLUMN,
            Value::Text("Branch".into()),
        );
        assert!(discriminator_matches(&stamped, None));
        assert!(discriminator_matches(&stamped, Some("Branch")));
        assert!(!discriminator_matches(&stamped, Some("Warehouse")));
        // Unstamped rows are accepted by any subtype.
        assert!(discriminator_matches(&row(1, "HQ"), Some("Branch")));
    }
}
