//! Relationship metadata.
//!
//! Relationships are declared as static metadata on each `Entity`, always
//! from the dependent or principal side that owns the navigation name. The
//! fixup engine uses this metadata to maintain bidirectional consistency
//! between references, collections, and foreign-key scalars without runtime
//! reflection.

use crate::field::FieldInfo;

/// The shape of a navigation between two entity types.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RelationshipKind {
    /// Dependent holds a reference to one principal (`Product.Category`).
    #[default]
    ManyToOne,
    /// Dependent holds a reference to one principal, principal holds a
    /// reference back (`Driver.License`).
    OneToOne,
    /// Principal holds a collection of dependents (`Category.Products`).
    OneToMany,
}

/// Static metadata for one navigation property.
///
/// FK-based relationships name the dependent's foreign-key columns in
/// principal-key order. Independent associations leave `fk_columns` empty
/// and are tracked purely as engine edges.
#[derive(Debug, Clone, Copy)]
pub struct RelationshipInfo {
    /// Navigation property name on the declaring entity.
    pub name: &'static str,
    /// Shape of the navigation as seen from the declaring entity.
    pub kind: RelationshipKind,
    /// Entity-set name of the other end.
    pub target: &'static str,
    /// Foreign-key columns on the dependent, in principal-key order.
    /// Empty for independent associations.
    pub fk_columns: &'static [&'static str],
    /// Whether the FK columns are nullable (severing nulls instead of
    /// cascading).
    pub fk_nullable: bool,
    /// Whether deleting the principal deletes dependents even when the FK
    /// would be nullable.
    pub cascade_delete: bool,
    /// Inverse navigation name on the target, when declared.
    pub inverse: Option<&'static str>,
}

impl RelationshipInfo {
    /// Declare a many-to-one navigation from the dependent side.
    #[must_use]
    pub const fn many_to_one(
        name: &'static str,
        target: &'static str,
        fk_columns: &'static [&'static str],
    ) -> Self {
        Self {
            name,
            kind: RelationshipKind::ManyToOne,
            target,
            fk_columns,
            fk_nullable: false,
            cascade_delete: false,
            inverse: None,
        }
    }

    /// Declare a one-to-many navigation from the principal side.
    #[must_use]
    pub const fn one_to_many(name: &'static str, target: &'static str) -> Self {
        Self {
            name,
            kind: RelationshipKind::OneToMany,
            target,
            fk_columns: &[],
            fk_nullable: false,
            cascade_delete: false,
            inverse: None,
        }
    }

    /// Declare a one-to-one navigation from the dependent side.
    #[must_use]
    pub const fn one_to_one(
        name: &'static str,
        target: &'static str,
        fk_columns: &'static [&'static str],
    ) -> Self {
        Self {
            name,
            kind: RelationshipKind::OneToOne,
            target,
            fk_columns,
            fk_nullable: false,
            cascade_delete: false,
            inverse: None,
        }
    }

    /// Set FK nullability.
    #[must_use]
    pub const fn fk_nullable(mut self, value: bool) -> Self {
        self.fk_nullable = value;
        self
    }

    /// Set cascade-delete behavior.
    #[must_use]
    pub const fn cascade_delete(mut self, value: bool) -> Self {
        self.cascade_delete = value;
        self
    }

    /// Name the inverse navigation on the target entity.
    #[must_use]
    pub const fn inverse(mut self, name: &'static str) -> Self {
        self.inverse = Some(name);
        self
    }

    /// Whether this relationship is tracked through FK scalars.
    #[must_use]
    pub const fn is_fk_based(&self) -> bool {
        !self.fk_columns.is_empty()
    }

    /// Whether the declaring side is the dependent.
    #[must_use]
    pub const fn declares_dependent(&self) -> bool {
        matches!(
            self.kind,
            RelationshipKind::ManyToOne | RelationshipKind::OneToOne
        )
    }

    /// Check that the declared FK columns exist and agree on nullability.
    ///
    /// Metadata bugs are programmer errors; this is exercised by tests, not
    /// at runtime hot paths.
    #[must_use]
    pub fn fk_columns_consistent(&self, fields: &[FieldInfo]) -> bool {
        self.fk_columns.iter().all(|col| {
            fields
                .iter()
                .any(|f| f.name == *col && f.nullable == self.fk_nullable)
        })
    }
}

/// Find a relationship by navigation name.
#[must_use]
pub fn find_relationship<'a>(
    relationships: &'a [RelationshipInfo],
    name: &str,
) -> Option<&'a RelationshipInfo> {
    relationships.iter().find(|r| r.name == name)
}

/// Find the inverse of a relationship among the target's declarations.
///
/// Prefers an explicit `inverse` name; falls back to the unique
/// relationship on the target pointing back at `source_set`.
#[must_use]
pub fn find_inverse_relationship<'a>(
    rel: &RelationshipInfo,
    target_relationships: &'a [RelationshipInfo],
    source_set: &str,
) -> Option<&'a RelationshipInfo> {
    if let Some(inverse) = rel.inverse {
        return find_relationship(target_relationships, inverse);
    }
    let mut candidates = target_relationships.iter().filter(|r| {
        r.target == source_set && r.declares_dependent() != rel.declares_dependent()
    });
    let first = candidates.next()?;
    if candidates.next().is_some() {
        // Ambiguous without an explicit inverse name.
        return None;
    }
    Some(first)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::ScalarType;

    static PRODUCT_RELS: &[RelationshipInfo] = &[RelationshipInfo::many_to_one(
        "Category",
        "Categories",
        &["CategoryId"],
    )
    .fk_nullable(true)
    .inverse("Products")];

    static CATEGORY_RELS: &[RelationshipInfo] =
        &[RelationshipInfo::one_to_many("Products", "Products").inverse("Category")];

    #[test]
    fn test_find_relationship() {
        assert!(find_relationship(PRODUCT_RELS, "Category").is_some());
        assert!(find_relationship(PRODUCT_RELS, "Supplier").is_none());
    }

    #[test]
    fn test_fk_based_and_dependent_side() {
        let rel = &PRODUCT_RELS[0];
        assert!(rel.is_fk_based());
        assert!(rel.declares_dependent());
        assert!(!CATEGORY_RELS[0].declares_dependent());
        assert!(!CATEGORY_RELS[0].is_fk_based());
    }

    #[test]
    fn test_explicit_inverse_resolution() {
        let inv = find_inverse_relationship(&PRODUCT_RELS[0], CATEGORY_RELS, "Products");
        assert_eq!(inv.unwrap().name, "Products");
    }

    #[test]
    fn test_implicit_inverse_falls_back_to_unique_candidate() {
        static BARE: &[RelationshipInfo] =
            &[RelationshipInfo::one_to_many("Products", "Products")];
        let rel = RelationshipInfo::many_to_one("Category", "Categories", &["CategoryId"]);
        let inv = find_inverse_relationship(&rel, BARE, "Products");
        assert_eq!(inv.unwrap().name, "Products");
    }

    #[test]
    fn test_fk_columns_consistent() {
        let fields = [
            FieldInfo::new("Id", ScalarType::Int).key(true),
            FieldInfo::new("CategoryId", ScalarType::Text).nullable(true),
        ];
        assert!(PRODUCT_RELS[0].fk_columns_consistent(&fields));

        let wrong = [FieldInfo::new("CategoryId", ScalarType::Text)];
        assert!(!PRODUCT_RELS[0].fk_columns_consistent(&wrong));
    }
}
