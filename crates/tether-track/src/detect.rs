//! Snapshot-based change detection and the validation pass.
//!
//! Detection recomputes each entry's modified set from scratch by diffing
//! current against original, so it is idempotent and self-correcting: a
//! property written back to its original value drops out of the modified set
//! and an entry with an empty diff returns to Unchanged.

use crate::context::{Context, ValidationInput};
use crate::identity_map::EntryId;
use crate::state::EntityState;
use crate::store::Backend;
use std::collections::BTreeSet;
use tether_core::{EntityValidationResult, ValidationReport, validate_record};

impl<B: Backend> Context<B> {
    /// Recompute the modified set of every tracked entry.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn detect_changes(&mut self) {
        self.detection_pass += 1;
        let mut promoted = 0usize;
        for entry in self.entries.values_mut() {
            if !matches!(entry.state, EntityState::Unchanged | EntityState::Modified) {
                continue;
            }
            let Some(original) = entry.original.as_ref() else {
                continue;
            };
            let modified = diff(&entry.current, original);
            let next = if modified.is_empty() {
                EntityState::Unchanged
            } else {
                EntityState::Modified
            };
            if next == EntityState::Modified && entry.state == EntityState::Unchanged {
                promoted += 1;
            }
            entry.state = next;
            entry.modified = modified;
        }
        tracing::trace!(pass = self.detection_pass, promoted, "change detection complete");
    }

    /// Recompute one entry's modified set after a direct values refresh.
    pub(crate) fn detect_entry(&mut self, id: EntryId) {
        let Some(entry) = self.entries.get_mut(&id) else {
            return;
        };
        if !matches!(entry.state, EntityState::Unchanged | EntityState::Modified) {
            return;
        }
        let Some(original) = entry.original.as_ref() else {
            return;
        };
        let modified = diff(&entry.current, original);
        entry.state = if modified.is_empty() {
            EntityState::Unchanged
        } else {
            EntityState::Modified
        };
        entry.modified = modified;
    }

    /// Detect changes (per configuration) and validate every Added or
    /// Modified entry.
    pub fn validate_all(&mut self) -> ValidationReport {
        if self.config.auto_detect_changes {
            self.detect_changes();
        }
        self.run_validation()
    }

    pub(crate) fn run_validation(&self) -> ValidationReport {
        let mut report = ValidationReport::new();
        for entry in self.entries.values() {
            if !matches!(entry.state, EntityState::Added | EntityState::Modified) {
                continue;
            }
            let mut errors = validate_record(entry.fields, &entry.current);
            if let Some(validators) = self.validators.get(entry.set_name) {
                let input = ValidationInput {
                    entity_set: entry.set_name,
                    key: &entry.key,
                    state: entry.state,
                    values: &entry.current,
                    fields: entry.fields,
                };
                for validator in validators {
                    errors.extend(validator(&input));
                }
            }
            report.push(EntityValidationResult {
                entity_set: entry.set_name,
                key: entry.key.clone(),
                errors,
            });
        }
        report
    }
}

fn diff(current: &tether_core::Record, original: &tether_core::Record) -> BTreeSet<String> {
    let mut modified = BTreeSet::new();
    for (path, value) in current.iter() {
        if original.get(path) != Some(value) {
            modified.insert(path.to_string());
        }
    }
    for (path, _) in original.iter() {
        if current.get(path).is_none() {
            modified.insert(path.to_string());
        }
    }
    modified
}
