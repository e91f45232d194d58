//! The `Entity` trait and its type-erased adapter.
//!
//! `Entity` is the contract between user types and the tracking engine:
//! static metadata (set name, ordered key columns, fields, relationships)
//! plus record conversion. Metadata is written as static tables; there is no
//! runtime reflection or proxy generation.

use crate::error::Result;
use crate::field::FieldInfo;
use crate::record::Record;
use crate::relationship::RelationshipInfo;
use crate::value::Value;
use std::any::TypeId;

/// Column path carrying the concrete-type discriminator in store records.
pub const DISCRIMINATOR_COLUMN: &str = "$type";

/// Trait for types tracked by a `Context`.
///
/// # Example
///
/// ```ignore
/// #[derive(Debug, Clone, PartialEq)]
/// struct Product {
///     id: i32,
///     name: String,
///     category_id: Option<String>,
/// }
///
/// impl Entity for Product {
///     const SET_NAME: &'static str = "Products";
///     const KEY: &'static [&'static str] = &["Id"];
///
///     fn fields() -> &'static [FieldInfo] { /* static table */ }
///     fn to_record(&self) -> Record { /* flatten */ }
///     fn from_record(record: &Record) -> Result<Self> { /* materialize */ }
/// }
/// ```
pub trait Entity: Sized + Clone + Send + Sync + 'static {
    /// Name of the entity set this type belongs to.
    const SET_NAME: &'static str;

    /// Ordered primary-key column paths.
    const KEY: &'static [&'static str];

    /// Discriminator value for stores holding multiple concrete types in one
    /// set. `None` for sets with a single concrete type.
    const DISCRIMINATOR: Option<&'static str> = None;

    /// Relationship metadata for this entity type.
    const RELATIONSHIPS: &'static [RelationshipInfo] = &[];

    /// Get field metadata for all declared properties.
    fn fields() -> &'static [FieldInfo];

    /// Flatten this instance into a record (complex properties dotted).
    fn to_record(&self) -> Record;

    /// Materialize an instance from a record.
    fn from_record(record: &Record) -> Result<Self>;

    /// Extract the ordered key tuple.
    fn key_value(&self) -> Vec<Value> {
        let record = self.to_record();
        Self::KEY
            .iter()
            .map(|col| record.get(col).cloned().unwrap_or(Value::Null))
            .collect()
    }

    /// Whether this instance still carries a null/default key.
    fn has_default_key(&self) -> bool {
        self.key_value().iter().any(default_key_component)
    }
}

/// A key component counts as "unset" when null, zero, or empty.
fn default_key_component(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::Int(i) => *i == 0,
        Value::BigInt(i) => *i == 0,
        Value::Text(s) => s.is_empty(),
        _ => false,
    }
}

/// Object-safe adapter over `Entity` for type-erased graph composition.
///
/// The engine itself is record-authoritative and never boxes instances;
/// this trait lets callers holding heterogeneous entities behind
/// `&dyn AnyEntity` capture them into an entity graph without naming the
/// concrete type.
pub trait AnyEntity: Send + Sync {
    /// Entity-set name.
    fn set_name(&self) -> &'static str;

    /// Concrete Rust type name, for diagnostics and type errors.
    fn type_name(&self) -> &'static str;

    /// Ordered key column paths.
    fn key_columns(&self) -> &'static [&'static str];

    /// Discriminator value, when declared.
    fn discriminator(&self) -> Option<&'static str>;

    /// Field metadata.
    fn entity_fields(&self) -> &'static [FieldInfo];

    /// Relationship metadata.
    fn entity_relationships(&self) -> &'static [RelationshipInfo];

    /// Flattened record of this instance.
    fn record(&self) -> Record;

    /// Ordered key tuple.
    fn key(&self) -> Vec<Value>;

    /// Whether the instance still carries a null/default key.
    fn default_key(&self) -> bool;

    /// Concrete type identity.
    fn entity_type_id(&self) -> TypeId;
}

impl<E: Entity> AnyEntity for E {
    fn set_name(&self) -> &'static str {
        E::SET_NAME
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<E>()
    }

    fn key_columns(&self) -> &'static [&'static str] {
        E::KEY
    }

    fn discriminator(&self) -> Option<&'static str> {
        E::DISCRIMINATOR
    }

    fn entity_fields(&self) -> &'static [FieldInfo] {
        E::fields()
    }

    fn entity_relationships(&self) -> &'static [RelationshipInfo] {
        E::RELATIONSHIPS
    }

    fn record(&self) -> Record {
        self.to_record()
    }

    fn key(&self) -> Vec<Value> {
        self.key_value()
    }

    fn default_key(&self) -> bool {
        self.has_default_key()
    }

    fn entity_type_id(&self) -> TypeId {
        TypeId::of::<E>()
    }
}
