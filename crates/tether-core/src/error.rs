//! Error types for tracking operations.
//!
//! Every failure is a synchronous, typed error raised at the offending call.
//! Async store retrieval surfaces the same values through `Outcome::Err`
//! without additional wrapping. Validation problems are never errors; they
//! are aggregated as data in `validate::ValidationReport`.

use std::fmt;

/// The primary error type for all tracking operations.
#[derive(Debug)]
pub enum Error {
    /// Identity and key errors
    Key(KeyError),
    /// Entity-state and lifecycle errors
    State(StateError),
    /// Property-slot type mismatches
    Type(TypeError),
    /// Relationship consistency errors
    Relationship(RelationshipError),
    /// Hard constraint violations at assignment time
    Constraint(ConstraintError),
    /// Backing-store faults
    Store(StoreError),
    /// Custom error with message
    Custom(String),
}

/// Result alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub struct KeyError {
    pub kind: KeyErrorKind,
    /// Entity-set name the key belongs to
    pub entity_set: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyErrorKind {
    /// Null or default key where a durable key is required
    NullKey,
    /// Wrong number of key values supplied (names the `key_values` argument)
    WrongValueCount,
    /// Key value of the wrong type for its declared slot
    WrongValueType,
    /// Attempt to mutate a key property after tracking began
    KeyMutation,
    /// Two Added entities of incompatible types share a key
    DuplicateAddedKey,
    /// Added entity cannot be attached with its current key
    InvalidKeyForAttach,
}

#[derive(Debug)]
pub struct StateError {
    pub kind: StateErrorKind,
    pub entity_set: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateErrorKind {
    /// Entity is not tracked by this context
    NotTracked,
    /// Operation is not legal for the entity's current state
    InvalidForState,
    /// Operation is not legal on this values view
    InvalidOperation,
}

#[derive(Debug)]
pub struct TypeError {
    /// Declared/expected type name
    pub expected: &'static str,
    /// Actual type or value description
    pub actual: String,
    /// Property name, when the mismatch is on a property slot
    pub property: Option<String>,
}

#[derive(Debug)]
pub struct RelationshipError {
    pub kind: RelationshipErrorKind,
    /// Navigation name or FK column involved
    pub navigation: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationshipErrorKind {
    /// A dependent's FK scalar disagrees with an explicitly linked
    /// principal's key
    InconsistentReferentialConstraint,
    /// Adding an entity related to a Deleted entity
    ReferencesDeleted,
    /// Navigation name not declared on the entity
    UnknownNavigation,
    /// The two ends named in the operation are not related
    NotRelated,
}

/// Hard constraint violation during a value assignment.
///
/// Distinct from declarative validation: this is raised at assignment time
/// (null into a non-nullable current-values slot) and fails the operation.
#[derive(Debug)]
pub struct ConstraintError {
    pub property: String,
    pub message: String,
}

#[derive(Debug)]
pub struct StoreError {
    pub kind: StoreErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    /// Entity set unknown to the backend
    UnknownSet,
    /// Write conflicted with existing store contents
    Conflict,
    /// Backend is unavailable
    Unavailable,
    /// Other backend fault
    Backend,
}

impl Error {
    /// Build a key error.
    pub fn key(kind: KeyErrorKind, entity_set: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Key(KeyError {
            kind,
            entity_set: entity_set.into(),
            message: message.into(),
        })
    }

    /// Build a state error.
    pub fn state(
        kind: StateErrorKind,
        entity_set: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Error::State(StateError {
            kind,
            entity_set: entity_set.into(),
            message: message.into(),
        })
    }

    /// Build a property type error.
    pub fn wrong_type(
        expected: &'static str,
        actual: impl Into<String>,
        property: impl Into<String>,
    ) -> Self {
        Error::Type(TypeError {
            expected,
            actual: actual.into(),
            property: Some(property.into()),
        })
    }

    /// Build a relationship error.
    pub fn relationship(
        kind: RelationshipErrorKind,
        navigation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Error::Relationship(RelationshipError {
            kind,
            navigation: navigation.into(),
            message: message.into(),
        })
    }

    /// Build an assignment-time constraint error.
    pub fn constraint(property: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Constraint(ConstraintError {
            property: property.into(),
            message: message.into(),
        })
    }

    /// Build a store error.
    pub fn store(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        Error::Store(StoreError {
            kind,
            message: message.into(),
            source: None,
        })
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Key(e) => write!(f, "key error ({:?}) on '{}': {}", e.kind, e.entity_set, e.message),
            Error::State(e) => {
                write!(f, "state error ({:?}) on '{}': {}", e.kind, e.entity_set, e.message)
            }
            Error::Type(e) => match &e.property {
                Some(prop) => write!(
                    f,
                    "type mismatch on property '{}': expected {}, got {}",
                    prop, e.expected, e.actual
                ),
                None => write!(f, "type mismatch: expected {}, got {}", e.expected, e.actual),
            },
            Error::Relationship(e) => write!(
                f,
                "relationship error ({:?}) on '{}': {}",
                e.kind, e.navigation, e.message
            ),
            Error::Constraint(e) => {
                write!(f, "constraint violation on property '{}': {}", e.property, e.message)
            }
            Error::Store(e) => write!(f, "store error ({:?}): {}", e.kind, e.message),
            Error::Custom(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Store(e) => e
                .source
                .as_ref()
                .map(|s| s.as_ref() as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}
