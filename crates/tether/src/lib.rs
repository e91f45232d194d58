//! Tether - entity change tracking, identity resolution, and relationship
//! fixup in Rust.
//!
//! Tether tracks plain Rust structs through the Detached, Unchanged, Added,
//! Modified, and Deleted lifecycle over a pluggable backing store:
//!
//! - `Entity` trait mapping structs to entity sets with static metadata
//! - A per-context identity map: one tracked entry per (set, key)
//! - Relationship fixup between references, collections, and FK scalars
//! - Current/original/store property-value dictionaries
//! - Snapshot-based change detection and declarative validation
//!
//! # Quick Start
//!
//! ```ignore
//! use tether::prelude::*;
//!
//! let mut ctx = Context::new(MemoryBackend::new());
//!
//! let category = Category { id: "Beverages".into(), name: "Beverages".into() };
//! let product = Product { id: 1, name: "Chai".into(), category_id: Some("Beverages".into()) };
//!
//! ctx.attach(&category)?;
//! ctx.add(&product)?;
//!
//! // Fixup derived the edge from the FK scalar.
//! let members: Vec<Product> = ctx.collection_of(&category, "Products")?;
//! assert_eq!(members.len(), 1);
//!
//! let saved = ctx.save_changes()?;
//! assert_eq!(saved.inserted, 1);
//! ```

// Re-export all public types from sub-crates
pub use tether_core::{
    // Metadata
    AnyEntity,
    ComplexTypeInfo,
    Constraint,
    ConstraintError,
    // asupersync re-exports
    Cx,
    DISCRIMINATOR_COLUMN,
    Entity,
    EntityValidationResult,
    // Errors
    Error,
    FieldInfo,
    KeyError,
    KeyErrorKind,
    Outcome,
    PropertyError,
    Record,
    RelationshipError,
    RelationshipErrorKind,
    RelationshipInfo,
    RelationshipKind,
    Result,
    ScalarType,
    StateError,
    StateErrorKind,
    StoreError,
    StoreErrorKind,
    TypeError,
    ValidationReport,
    Value,
    find_field,
    find_inverse_relationship,
    find_relationship,
    validate_record,
};

pub use tether_track::{
    AnySet, Backend, Context, ContextConfig, CurrentValues, EntityEntry, EntityGraph, EntityState,
    MemoryBackend, NodeId, OriginalValues, PropertyValues, SaveResult, Set, StoreOp,
    ValidationInput,
};

/// Convenience glob import for applications.
///
/// ```ignore
/// use tether::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        Backend, ComplexTypeInfo, Context, ContextConfig, Cx, Entity, EntityGraph, EntityState,
        Error, FieldInfo, MemoryBackend, Outcome, Record, RelationshipInfo, Result, ScalarType,
        Value,
    };
}
