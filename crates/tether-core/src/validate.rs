//! Declarative validation and per-entity result aggregation.
//!
//! Validation problems are reported as data, never raised as errors: the
//! engine gathers `(property, current value)` tuples for each candidate
//! entry, evaluates the declarative constraints on its field metadata plus
//! any custom callbacks, and aggregates the outcome per entity.

use crate::field::{Constraint, FieldInfo};
use crate::record::Record;
use crate::value::Value;

/// A single validation problem.
///
/// `property` is `None` for entity-level problems reported by custom
/// validators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyError {
    /// The property path that failed validation, when property-scoped.
    pub property: Option<String>,
    /// Human-readable error message.
    pub message: String,
}

impl PropertyError {
    /// Property-scoped validation problem.
    pub fn property(property: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            property: Some(property.into()),
            message: message.into(),
        }
    }

    /// Entity-level validation problem.
    pub fn entity(message: impl Into<String>) -> Self {
        Self {
            property: None,
            message: message.into(),
        }
    }
}

/// Aggregated validation outcome for one tracked entity.
#[derive(Debug, Clone)]
pub struct EntityValidationResult {
    /// Entity-set name of the validated entry.
    pub entity_set: &'static str,
    /// Key tuple of the validated entry.
    pub key: Vec<Value>,
    /// The problems found; empty means valid.
    pub errors: Vec<PropertyError>,
}

impl EntityValidationResult {
    /// Whether the entity passed validation.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Errors scoped to one property path.
    pub fn errors_for(&self, property: &str) -> impl Iterator<Item = &PropertyError> {
        self.errors
            .iter()
            .filter(move |e| e.property.as_deref() == Some(property))
    }
}

/// Validation outcome across every candidate entry of one pass.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    /// Per-entity results, in entry-visit order. Only invalid entities are
    /// recorded.
    pub results: Vec<EntityValidationResult>,
}

impl ValidationReport {
    /// Create an empty report.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether every validated entity passed.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.results.iter().all(EntityValidationResult::is_valid)
    }

    /// Record a result, dropping valid ones.
    pub fn push(&mut self, result: EntityValidationResult) {
        if !result.is_valid() {
            self.results.push(result);
        }
    }
}

/// Evaluate one constraint against a property value.
fn check(constraint: &Constraint, path: &str, value: &Value) -> Option<PropertyError> {
    match constraint {
        Constraint::Required => {
            let missing = match value {
                Value::Null => true,
                Value::Text(s) => s.is_empty(),
                _ => false,
            };
            missing.then(|| PropertyError::property(path, format!("The {path} field is required.")))
        }
        Constraint::MaxLength(limit) => match value {
            Value::Text(s) if s.chars().count() > *limit => Some(PropertyError::property(
                path,
                format!("The field {path} must be a string with a maximum length of {limit}."),
            )),
            _ => None,
        },
        Constraint::MinLength(limit) => match value {
            Value::Text(s) if s.chars().count() < *limit => Some(PropertyError::property(
                path,
                format!("The field {path} must be a string with a minimum length of {limit}."),
            )),
            _ => None,
        },
        Constraint::Pattern(pattern) => match value {
            Value::Text(s) => {
                let Ok(re) = regex::Regex::new(pattern) else {
                    tracing::warn!(pattern, "Invalid validation pattern; skipping");
                    return None;
                };
                (!re.is_match(s)).then(|| {
                    PropertyError::property(
                        path,
                        format!("The field {path} must match the pattern '{pattern}'."),
                    )
                })
            }
            _ => None,
        },
        Constraint::Range(min, max) => match value.as_f64() {
            Some(n) if n < *min || n > *max => Some(PropertyError::property(
                path,
                format!("The field {path} must be between {min} and {max}."),
            )),
            _ => None,
        },
    }
}

/// Validate a flattened record against field metadata, recursing into
/// complex properties.
#[must_use]
pub fn validate_record(fields: &[FieldInfo], record: &Record) -> Vec<PropertyError> {
    let mut errors = Vec::new();
    validate_fields(fields, record, "", &mut errors);
    errors
}

/// Validate one metadata level, accumulating into `errors`.
///
/// `prefix` is the dotted path of the enclosing complex property, or empty
/// at the entity level.
pub fn validate_fields(
    fields: &[FieldInfo],
    record: &Record,
    prefix: &str,
    errors: &mut Vec<PropertyError>,
) {
    for field in fields {
        let path = if prefix.is_empty() {
            field.name.to_string()
        } else {
            format!("{prefix}.{}", field.name)
        };

        if let Some(complex) = field.complex {
            let sub = record.sub_record(&path);
            if sub.is_empty() {
                if !field.nullable {
                    errors.push(PropertyError::property(
                        &path,
                        format!("The {path} field is required."),
                    ));
                }
                continue;
            }
            validate_fields(complex.fields, record, &path, errors);
            continue;
        }

        let value = record.get(&path).unwrap_or(&Value::Null);
        if value.is_null() && !field.nullable {
            errors.push(PropertyError::property(
                &path,
                format!("The {path} field is required."),
            ));
        }
        for constraint in field.constraints {
            if let Some(err) = check(constraint, &path, value) {
                errors.push(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{ComplexTypeInfo, ScalarType};

    static ADDRESS: ComplexTypeInfo = ComplexTypeInfo {
        type_name: "Address",
        fields: &[
            FieldInfo::new("Street", ScalarType::Text)
                .constraints(&[Constraint::Required, Constraint::MaxLength(64)]),
            FieldInfo::new("City", ScalarType::Text).nullable(true),
        ],
    };

    fn fields() -> &'static [FieldInfo] {
        static FIELDS: &[FieldInfo] = &[
            FieldInfo::new("Id", ScalarType::Int).key(true),
            FieldInfo::new("Name", ScalarType::Text)
                .constraints(&[Constraint::Required, Constraint::MaxLength(10)]),
            FieldInfo::new("Code", ScalarType::Text)
                .nullable(true)
                .constraints(&[Constraint::Pattern("^[A-Z]{2}[0-9]+$")]),
            FieldInfo::complex("Address", &ADDRESS),
        ];
        FIELDS
    }

    fn valid_record() -> Record {
        Record::from_pairs(vec![
            ("Id".into(), Value::Int(1)),
            ("Name".into(), Value::Text("Depot".into())),
            ("Code".into(), Value::Text("AB12".into())),
            ("Address.Street".into(), Value::Text("Main".into())),
            ("Address.City".into(), Value::Null),
        ])
    }

    #[test]
    fn test_valid_record_has_no_errors() {
        assert!(validate_record(fields(), &valid_record()).is_empty());
    }

    #[test]
    fn test_required_and_max_length() {
        let mut r = valid_record();
        r.set("Name", Value::Text("a name that is far too long".into()));
        let errors = validate_record(fields(), &r);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].property.as_deref(), Some("Name"));

        r.set("Name", Value::Text(String::new()));
        let errors = validate_record(fields(), &r);
        assert!(errors[0].message.contains("required"));
    }

    #[test]
    fn test_pattern_constraint() {
        let mut r = valid_record();
        r.set("Code", Value::Text("12ab".into()));
        let errors = validate_record(fields(), &r);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("pattern"));

        // Null is allowed for a nullable pattern field.
        r.set("Code", Value::Null);
        assert!(validate_record(fields(), &r).is_empty());
    }

    #[test]
    fn test_nested_complex_errors_use_dotted_paths() {
        let mut r = valid_record();
        r.set("Address.Street", Value::Text(String::new()));
        let errors = validate_record(fields(), &r);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].property.as_deref(), Some("Address.Street"));
    }

    #[test]
    fn test_report_keeps_only_invalid() {
        let mut report = ValidationReport::new();
        report.push(EntityValidationResult {
            entity_set: "Offices",
            key: vec![Value::Int(1)],
            errors: vec![],
        });
        report.push(EntityValidationResult {
            entity_set: "Offices",
            key: vec![Value::Int(2)],
            errors: vec![PropertyError::property("Name", "The Name field is required.")],
        });
        assert!(!report.is_valid());
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].key, vec![Value::Int(2)]);
    }

    #[test]
    fn test_entity_level_error() {
        let err = PropertyError::entity("Office is not operational");
        assert!(err.property.is_none());
    }
}
