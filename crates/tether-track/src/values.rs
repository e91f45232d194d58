//! Property value dictionaries over tracked entries.
//!
//! Three views exist per tracked entity: current values (read/write, drives
//! the Modified state), original values (the snapshot taken when tracking
//! began), and store values (fetched on demand, owned). Writes are checked
//! against field metadata before anything mutates, so a failed assignment
//! leaves the entry untouched.
//!
//! The null checks are deliberately asymmetric: assigning null into a
//! non-nullable current slot is a constraint violation, while the same write
//! through original values is an invalid operation on the view.

use crate::entry::TrackedEntry;
use crate::identity_map::{IdentityMap, hash_key};
use crate::state::EntityState;
use std::any::TypeId;
use tether_core::{
    Entity, Error, FieldInfo, KeyErrorKind, Record, Result, StateErrorKind, Value, find_field,
};

static NULL: Value = Value::Null;

/// Resolve a dotted property path to its field metadata.
pub(crate) fn resolve_field(
    fields: &'static [FieldInfo],
    path: &str,
) -> Option<&'static FieldInfo> {
    match path.split_once('.') {
        None => find_field(fields, path),
        Some((head, rest)) => resolve_field(find_field(fields, head)?.complex?.fields, rest),
    }
}

/// Collect the dotted scalar-leaf paths of a metadata level, in declaration
/// order.
pub(crate) fn scalar_paths(fields: &'static [FieldInfo], prefix: &str, out: &mut Vec<String>) {
    for field in fields {
        let path = if prefix.is_empty() {
            field.name.to_string()
        } else {
            format!("{prefix}.{}", field.name)
        };
        match field.complex {
            Some(complex) => scalar_paths(complex.fields, &path, out),
            None => out.push(path),
        }
    }
}

fn unknown_property(owner: &str, path: &str) -> Error {
    Error::state(
        StateErrorKind::InvalidOperation,
        owner,
        format!("property '{path}' is not declared"),
    )
}

fn complex_property_write(owner: &str, path: &str) -> Error {
    Error::state(
        StateErrorKind::InvalidOperation,
        owner,
        format!("property '{path}' is complex-typed; assign its nested scalars instead"),
    )
}

fn check_scalar_type(field: &FieldInfo, path: &str, value: &Value) -> Result<()> {
    if field.scalar_type.accepts(value) {
        Ok(())
    } else {
        Err(Error::wrong_type(
            field.scalar_type.name(),
            value.type_name(),
            path,
        ))
    }
}

/// An owned, detached bag of property values.
///
/// Produced by cloning a live view or fetching a store snapshot. Mutations
/// never touch the tracked entry the bag came from.
#[derive(Debug, Clone)]
pub struct PropertyValues {
    type_name: &'static str,
    fields: &'static [FieldInfo],
    record: Record,
}

impl PropertyValues {
    pub(crate) fn new(type_name: &'static str, fields: &'static [FieldInfo], record: Record) -> Self {
        Self {
            type_name,
            fields,
            record,
        }
    }

    /// Name of the entity or complex type this bag describes.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Declared top-level property names, including complex ones.
    #[must_use]
    pub fn property_names(&self) -> Vec<&'static str> {
        self.fields.iter().map(|f| f.name).collect()
    }

    /// Read a scalar by dotted path.
    pub fn get(&self, path: &str) -> Result<&Value> {
        let field =
            resolve_field(self.fields, path).ok_or_else(|| unknown_property(self.type_name, path))?;
        if field.is_complex() {
            return Err(complex_property_write(self.type_name, path));
        }
        Ok(self.record.get(path).unwrap_or(&NULL))
    }

    /// Write a scalar by dotted path, with type and nullability checks.
    pub fn set(&mut self, path: &str, value: Value) -> Result<()> {
        let field =
            resolve_field(self.fields, path).ok_or_else(|| unknown_property(self.type_name, path))?;
        if field.is_complex() {
            return Err(complex_property_write(self.type_name, path));
        }
        check_scalar_type(field, path, &value)?;
        if value.is_null() && !field.nullable {
            return Err(Error::constraint(
                path,
                format!("cannot assign null to non-nullable property '{path}'"),
            ));
        }
        self.record.set(path, value);
        Ok(())
    }

    /// Nested bag for one complex property.
    pub fn complex(&self, name: &str) -> Result<PropertyValues> {
        let field =
            find_field(self.fields, name).ok_or_else(|| unknown_property(self.type_name, name))?;
        let info = field.complex.ok_or_else(|| {
            Error::state(
                StateErrorKind::InvalidOperation,
                self.type_name,
                format!("property '{name}' is not complex-typed"),
            )
        })?;
        Ok(PropertyValues::new(
            info.type_name,
            info.fields,
            self.record.sub_record(name),
        ))
    }

    /// Copy every same-named scalar from `other` into this bag.
    pub fn set_values(&mut self, other: &PropertyValues) -> Result<()> {
        let mut paths = Vec::new();
        scalar_paths(self.fields, "", &mut paths);
        for path in paths {
            if let Some(value) = other.record.get(&path) {
                self.set(&path, value.clone())?;
            }
        }
        Ok(())
    }

    /// Materialize a concrete entity from this bag.
    pub fn to_entity<E: Entity>(&self) -> Result<E> {
        E::from_record(&self.record)
    }

    /// The flattened record behind this bag.
    #[must_use]
    pub fn record(&self) -> &Record {
        &self.record
    }
}

/// Writable view over a tracked entry's current values.
#[derive(Debug)]
pub struct CurrentValues<'a> {
    pub(crate) entry: &'a mut TrackedEntry,
    pub(crate) ids: &'a mut IdentityMap,
    /// Key writes are refused once the entry participates in fixed-up
    /// relationships, even while Added.
    pub(crate) key_locked: bool,
}

impl CurrentValues<'_> {
    /// Read a scalar by dotted path.
    pub fn get(&self, path: &str) -> Result<&Value> {
        let field = resolve_field(self.entry.fields, path)
            .ok_or_else(|| unknown_property(self.entry.set_name, path))?;
        if field.is_complex() {
            return Err(complex_property_write(self.entry.set_name, path));
        }
        Ok(self.entry.current.get(path).unwrap_or(&NULL))
    }

    /// Write a scalar by dotted path.
    ///
    /// All checks run before the record mutates; identical values are
    /// accepted without marking the property modified.
    pub fn set(&mut self, path: &str, value: Value) -> Result<()> {
        let field = resolve_field(self.entry.fields, path)
            .ok_or_else(|| unknown_property(self.entry.set_name, path))?;
        if field.is_complex() {
            return Err(complex_property_write(self.entry.set_name, path));
        }
        check_scalar_type(field, path, &value)?;
        if value.is_null() && !field.nullable {
            return Err(Error::constraint(
                path,
                format!("cannot assign null to non-nullable property '{path}'"),
            ));
        }
        if self.entry.current.get(path) == Some(&value) {
            return Ok(());
        }
        if field.key {
            return self.set_key_component(path, value);
        }
        self.entry.current.set(path, value);
        self.entry.note_write(path);
        Ok(())
    }

    fn set_key_component(&mut self, path: &str, value: Value) -> Result<()> {
        if self.entry.state != EntityState::Added {
            return Err(Error::key(
                KeyErrorKind::KeyMutation,
                self.entry.set_name,
                format!("the key property '{path}' cannot change once the entity is tracked"),
            ));
        }
        if self.key_locked {
            return Err(Error::key(
                KeyErrorKind::KeyMutation,
                self.entry.set_name,
                format!(
                    "the key property '{path}' cannot change while relationships reference it"
                ),
            ));
        }
        // Probe the new identity slot before mutating anything.
        let old_hash = hash_key(&self.entry.key);
        let mut probe = self.entry.current.clone();
        probe.set(path, value.clone());
        let new_key: Vec<Value> = self
            .entry
            .key_columns
            .iter()
            .map(|col| probe.get(col).cloned().unwrap_or(Value::Null))
            .collect();
        let new_hash = hash_key(&new_key);
        if !self.ids.rekey(self.entry.set_name, old_hash, new_hash, self.entry.id) {
            return Err(Error::key(
                KeyErrorKind::DuplicateAddedKey,
                self.entry.set_name,
                format!("another tracked entity already uses the key {new_key:?}"),
            ));
        }
        self.entry.current.set(path, value);
        self.entry.key = new_key;
        self.entry.note_write(path);
        Ok(())
    }

    /// Copy every same-named scalar from a detached bag.
    ///
    /// Key properties may be copied only when the values already agree.
    pub fn set_values(&mut self, source: &PropertyValues) -> Result<()> {
        let mut paths = Vec::new();
        scalar_paths(self.entry.fields, "", &mut paths);
        for path in paths {
            if let Some(value) = source.record().get(&path) {
                self.set(&path, value.clone())?;
            }
        }
        Ok(())
    }

    /// Copy every same-named scalar from a detached entity instance.
    pub fn set_entity<E: Entity>(&mut self, source: &E) -> Result<()> {
        let record = source.to_record();
        let mut paths = Vec::new();
        scalar_paths(self.entry.fields, "", &mut paths);
        for path in paths {
            if let Some(value) = record.get(&path) {
                self.set(&path, value.clone())?;
            }
        }
        Ok(())
    }

    /// Clone into a standalone bag; later writes to either side are
    /// invisible to the other.
    #[must_use]
    pub fn to_owned_values(&self) -> PropertyValues {
        PropertyValues::new(
            self.entry.type_name,
            self.entry.fields,
            self.entry.current.clone(),
        )
    }

    /// Nested bag for one complex property (a snapshot, not a live view).
    pub fn complex(&self, name: &str) -> Result<PropertyValues> {
        self.to_owned_values().complex(name)
    }

    /// Materialize a fresh instance carrying the current values.
    pub fn to_entity<E: Entity>(&self) -> Result<E> {
        if TypeId::of::<E>() != self.entry.type_id {
            return Err(Error::Type(tether_core::TypeError {
                expected: self.entry.type_name,
                actual: std::any::type_name::<E>().to_string(),
                property: None,
            }));
        }
        E::from_record(&self.entry.current)
    }

    /// Declared top-level property names.
    #[must_use]
    pub fn property_names(&self) -> Vec<&'static str> {
        self.entry.fields.iter().map(|f| f.name).collect()
    }

    /// The flattened current record.
    #[must_use]
    pub fn record(&self) -> &Record {
        &self.entry.current
    }
}

/// Writable view over a tracked entry's original snapshot.
///
/// Only exists for states carrying an original (never Added). Writes do not
/// affect the entry's state or modified set; change detection picks up the
/// new baseline on its next pass.
pub struct OriginalValues<'a> {
    pub(crate) entry: &'a mut TrackedEntry,
}

impl OriginalValues<'_> {
    fn snapshot(&self) -> &Record {
        // Construction is gated on the state carrying an original.
        self.entry.original.as_ref().unwrap_or(&self.entry.current)
    }

    /// Read a scalar by dotted path.
    pub fn get(&self, path: &str) -> Result<&Value> {
        let field = resolve_field(self.entry.fields, path)
            .ok_or_else(|| unknown_property(self.entry.set_name, path))?;
        if field.is_complex() {
            return Err(complex_property_write(self.entry.set_name, path));
        }
        Ok(self.snapshot().get(path).unwrap_or(&NULL))
    }

    /// Rewrite the original snapshot for one scalar.
    pub fn set(&mut self, path: &str, value: Value) -> Result<()> {
        let field = resolve_field(self.entry.fields, path)
            .ok_or_else(|| unknown_property(self.entry.set_name, path))?;
        if field.is_complex() {
            return Err(complex_property_write(self.entry.set_name, path));
        }
        check_scalar_type(field, path, &value)?;
        if value.is_null() && !field.nullable {
            return Err(Error::state(
                StateErrorKind::InvalidOperation,
                self.entry.set_name,
                format!("the original value of non-nullable property '{path}' cannot be null"),
            ));
        }
        if field.key {
            return Err(Error::key(
                KeyErrorKind::KeyMutation,
                self.entry.set_name,
                format!("the key property '{path}' cannot change once the entity is tracked"),
            ));
        }
        if let Some(original) = self.entry.original.as_mut() {
            original.set(path, value);
        }
        Ok(())
    }

    /// Copy every same-named scalar from a detached bag into the snapshot.
    pub fn set_values(&mut self, source: &PropertyValues) -> Result<()> {
        let mut paths = Vec::new();
        scalar_paths(self.entry.fields, "", &mut paths);
        for path in paths {
            if let Some(value) = source.record().get(&path) {
                if resolve_field(self.entry.fields, &path).is_some_and(|f| f.key) {
                    continue;
                }
                self.set(&path, value.clone())?;
            }
        }
        Ok(())
    }

    /// Clone into a standalone bag.
    #[must_use]
    pub fn to_owned_values(&self) -> PropertyValues {
        PropertyValues::new(self.entry.type_name, self.entry.fields, self.snapshot().clone())
    }

    /// Nested bag for one complex property.
    pub fn complex(&self, name: &str) -> Result<PropertyValues> {
        self.to_owned_values().complex(name)
    }

    /// Materialize a fresh instance carrying the original values.
    pub fn to_entity<E: Entity>(&self) -> Result<E> {
        if TypeId::of::<E>() != self.entry.type_id {
            return Err(Error::Type(tether_core::TypeError {
                expected: self.entry.type_name,
                actual: std::any::type_name::<E>().to_string(),
                property: None,
            }));
        }
        E::from_record(self.snapshot())
    }

    /// Declared top-level property names.
    #[must_use]
    pub fn property_names(&self) -> Vec<&'static str> {
        self.entry.fields.iter().map(|f| f.name).collect()
    }
}
