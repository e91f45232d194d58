//! Core types and traits for Tether.
//!
//! This crate provides the foundational abstractions for entity change
//! tracking:
//!
//! - `Entity` trait for mapping structs to tracked entity sets
//! - `FieldInfo` metadata for key ordering, nullability, and constraints
//! - `Value` and `Record` for dynamically-typed property values
//! - `RelationshipInfo` for principal/dependent edges
//! - Error taxonomy shared by the tracking engine
//! - Declarative validation and per-entity result aggregation

pub mod entity;
pub mod error;
pub mod field;
pub mod record;
pub mod relationship;
pub mod validate;
pub mod value;

// Re-export asupersync primitives for structured concurrency
pub use asupersync::{Cx, Outcome};

pub use entity::{AnyEntity, DISCRIMINATOR_COLUMN, Entity};
pub use error::{
    ConstraintError, Error, KeyError, KeyErrorKind, RelationshipError, RelationshipErrorKind,
    Result, StateError, StateErrorKind, StoreError, StoreErrorKind, TypeError,
};
pub use field::{ComplexTypeInfo, Constraint, FieldInfo, ScalarType, find_field};
pub use record::Record;
pub use relationship::{
    RelationshipInfo, RelationshipKind, find_inverse_relationship, find_relationship,
};
pub use validate::{
    EntityValidationResult, PropertyError, ValidationReport, validate_fields, validate_record,
};
pub use value::Value;
