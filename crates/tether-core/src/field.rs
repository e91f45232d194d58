//! Field metadata and declarative constraints.
//!
//! `FieldInfo` is the metadata-provider surface of the engine: it carries key
//! membership and ordering, nullability, store-generation, and the declarative
//! constraints the validator evaluates. Complex-typed properties reference a
//! static `ComplexTypeInfo` describing their nested fields.

use crate::value::Value;

/// The declared scalar type of a property slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    Bool,
    Int,
    BigInt,
    Double,
    Decimal,
    Text,
    Bytes,
    Date,
    Timestamp,
    Uuid,
}

impl ScalarType {
    /// Type name used in error messages.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            ScalarType::Bool => "BOOLEAN",
            ScalarType::Int => "INTEGER",
            ScalarType::BigInt => "BIGINT",
            ScalarType::Double => "DOUBLE",
            ScalarType::Decimal => "DECIMAL",
            ScalarType::Text => "TEXT",
            ScalarType::Bytes => "BYTES",
            ScalarType::Date => "DATE",
            ScalarType::Timestamp => "TIMESTAMP",
            ScalarType::Uuid => "UUID",
        }
    }

    /// Check whether a value is assignable to a slot of this type.
    ///
    /// `Value::Null` is always type-compatible; nullability is enforced
    /// separately against `FieldInfo::nullable`.
    #[must_use]
    pub const fn accepts(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (_, Value::Null)
                | (ScalarType::Bool, Value::Bool(_))
                | (ScalarType::Int, Value::Int(_))
                | (ScalarType::BigInt, Value::BigInt(_))
                | (ScalarType::Double, Value::Double(_))
                | (ScalarType::Decimal, Value::Decimal(_))
                | (ScalarType::Text, Value::Text(_))
                | (ScalarType::Bytes, Value::Bytes(_))
                | (ScalarType::Date, Value::Date(_))
                | (ScalarType::Timestamp, Value::Timestamp(_))
                | (ScalarType::Uuid, Value::Uuid(_))
        )
    }
}

/// A declarative validation constraint attached to a field.
///
/// Constraints are evaluated by `validate::validate_record`; they never fail
/// an assignment, only contribute to validation reports.
#[derive(Debug, Clone, Copy)]
pub enum Constraint {
    /// Value must be non-null and, for text, non-empty.
    Required,
    /// Text length must not exceed the limit.
    MaxLength(usize),
    /// Text length must be at least the limit.
    MinLength(usize),
    /// Text must match the regular expression.
    Pattern(&'static str),
    /// Numeric value must lie within the inclusive range.
    Range(f64, f64),
}

/// Static metadata for a complex (nested, non-entity) property type.
#[derive(Debug)]
pub struct ComplexTypeInfo {
    /// Name of the complex type (for diagnostics and store snapshots).
    pub type_name: &'static str,
    /// Ordered nested fields; may themselves be complex.
    pub fields: &'static [FieldInfo],
}

/// Metadata about a declared entity property.
#[derive(Debug)]
pub struct FieldInfo {
    /// Property name
    pub name: &'static str,
    /// Declared scalar type (ignored when `complex` is set)
    pub scalar_type: ScalarType,
    /// Whether this property accepts NULL
    pub nullable: bool,
    /// Whether this property is part of the primary key
    pub key: bool,
    /// Whether the store assigns this property's value on insert
    pub store_generated: bool,
    /// Nested complex type, when this is a complex-typed property
    pub complex: Option<&'static ComplexTypeInfo>,
    /// Declarative validation constraints
    pub constraints: &'static [Constraint],
}

impl FieldInfo {
    /// Create a new scalar field with minimal required data.
    #[must_use]
    pub const fn new(name: &'static str, scalar_type: ScalarType) -> Self {
        Self {
            name,
            scalar_type,
            nullable: false,
            key: false,
            store_generated: false,
            complex: None,
            constraints: &[],
        }
    }

    /// Create a complex-typed field.
    #[must_use]
    pub const fn complex(name: &'static str, info: &'static ComplexTypeInfo) -> Self {
        Self {
            name,
            scalar_type: ScalarType::Text,
            nullable: false,
            key: false,
            store_generated: false,
            complex: Some(info),
            constraints: &[],
        }
    }

    /// Set nullable flag.
    #[must_use]
    pub const fn nullable(mut self, value: bool) -> Self {
        self.nullable = value;
        self
    }

    /// Mark this field as part of the primary key.
    #[must_use]
    pub const fn key(mut self, value: bool) -> Self {
        self.key = value;
        self
    }

    /// Mark this field as store-generated.
    #[must_use]
    pub const fn store_generated(mut self, value: bool) -> Self {
        self.store_generated = value;
        self
    }

    /// Attach declarative constraints.
    #[must_use]
    pub const fn constraints(mut self, constraints: &'static [Constraint]) -> Self {
        self.constraints = constraints;
        self
    }

    /// Whether this field is complex-typed.
    #[must_use]
    pub const fn is_complex(&self) -> bool {
        self.complex.is_some()
    }
}

/// Find a field by name in a metadata slice.
#[must_use]
pub fn find_field<'a>(fields: &'a [FieldInfo], name: &str) -> Option<&'a FieldInfo> {
    fields.iter().find(|f| f.name == name)
}
