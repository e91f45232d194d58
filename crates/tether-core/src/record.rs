//! Flat, ordered records at the store boundary.
//!
//! A `Record` is the wire representation of one entity instance: an ordered
//! list of (column path, value) pairs. Complex properties flatten to dotted
//! paths, so an `Address` complex property with a `City` field appears as the
//! column path `"Address.City"`.

use crate::value::Value;
use serde::{Deserialize, Serialize};

/// One flattened entity row.
///
/// Paths preserve declaration order. Lookup is linear; records are small
/// (one entity's scalar leaves) so this beats carrying an index map around.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    columns: Vec<(String, Value)>,
}

impl Record {
    /// Create an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self {
            columns: Vec::new(),
        }
    }

    /// Create a record from ordered (path, value) pairs.
    #[must_use]
    pub fn from_pairs(pairs: Vec<(String, Value)>) -> Self {
        Self { columns: pairs }
    }

    /// Number of columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Check if the record has no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Get a value by column path.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, v)| v)
    }

    /// Check if a column path exists.
    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.columns.iter().any(|(p, _)| p == path)
    }

    /// Set a value, appending the column if the path is new.
    pub fn set(&mut self, path: impl Into<String>, value: Value) {
        let path = path.into();
        if let Some(slot) = self.columns.iter_mut().find(|(p, _)| *p == path) {
            slot.1 = value;
        } else {
            self.columns.push((path, value));
        }
    }

    /// Push a column without checking for duplicates.
    ///
    /// Callers building a record from field metadata in declaration order
    /// use this to avoid the lookup in `set`.
    pub fn push(&mut self, path: impl Into<String>, value: Value) {
        self.columns.push((path.into(), value));
    }

    /// Ordered column paths.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(p, _)| p.as_str())
    }

    /// Ordered (path, value) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(|(p, v)| (p.as_str(), v))
    }

    /// Extract the sub-record under a complex-property prefix.
    ///
    /// For prefix `"Address"`, returns the columns `"Address.*"` with the
    /// prefix stripped. Empty when no column carries the prefix.
    #[must_use]
    pub fn sub_record(&self, prefix: &str) -> Record {
        let dotted = format!("{prefix}.");
        let columns = self
            .columns
            .iter()
            .filter_map(|(p, v)| {
                p.strip_prefix(&dotted)
                    .map(|rest| (rest.to_string(), v.clone()))
            })
            .collect();
        Self { columns }
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            columns: iter.into_iter().collect(),
        }
    }
}
