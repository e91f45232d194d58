//! Relationship fixup: engine-owned edges between tracked entries.
//!
//! Navigations are never stored on entity instances. The context derives
//! edges from FK scalars and explicit graph links, and keeps references,
//! collections, and FK columns mutually consistent as entries change state.
//! An edge whose principal is still Added defers FK propagation until the
//! changes are accepted or saved.

use crate::context::Context;
use crate::identity_map::EntryId;
use crate::state::EntityState;
use crate::store::Backend;
use std::any::TypeId;
use tether_core::{
    Entity, Error, RelationshipErrorKind, RelationshipInfo, RelationshipKind, Result, TypeError,
    Value, find_inverse_relationship, find_relationship,
};

/// One tracked relationship instance between two entries.
#[derive(Debug, Clone)]
pub(crate) struct Edge {
    pub(crate) principal: EntryId,
    pub(crate) dependent: EntryId,
    /// Reference navigation on the dependent, when declared.
    pub(crate) dep_nav: Option<&'static str>,
    /// Collection (or inverse reference) navigation on the principal, when
    /// declared.
    pub(crate) prin_nav: Option<&'static str>,
    pub(crate) fk_columns: &'static [&'static str],
    pub(crate) fk_nullable: bool,
    pub(crate) cascade_delete: bool,
    /// FK values not yet written because the principal is still Added.
    pub(crate) fk_pending: bool,
}

impl Edge {
    pub(crate) fn is_fk_based(&self) -> bool {
        !self.fk_columns.is_empty()
    }
}

/// A graph link resolved against the metadata of both ends.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LinkSpec {
    /// Whether the link's `from` node is the dependent end.
    pub(crate) from_is_dependent: bool,
    pub(crate) dep_nav: Option<&'static str>,
    pub(crate) prin_nav: Option<&'static str>,
    pub(crate) fk_columns: &'static [&'static str],
    pub(crate) fk_nullable: bool,
    pub(crate) cascade_delete: bool,
}

/// Resolve a navigation declared on the `from` side of a link against both
/// ends' relationship metadata.
pub(crate) fn resolve_link(
    from_rels: &'static [RelationshipInfo],
    from_set: &'static str,
    navigation: &str,
    to_rels: &'static [RelationshipInfo],
    to_set: &'static str,
) -> Result<LinkSpec> {
    let rel = find_relationship(from_rels, navigation).ok_or_else(|| {
        Error::relationship(
            RelationshipErrorKind::UnknownNavigation,
            navigation,
            format!("navigation '{navigation}' is not declared on '{from_set}'"),
        )
    })?;
    if rel.target != to_set {
        return Err(Error::relationship(
            RelationshipErrorKind::NotRelated,
            navigation,
            format!("navigation '{navigation}' targets '{}', not '{to_set}'", rel.target),
        ));
    }
    let inverse = find_inverse_relationship(rel, to_rels, from_set);
    let cascade = rel.cascade_delete || inverse.is_some_and(|r| r.cascade_delete);
    if rel.declares_dependent() {
        Ok(LinkSpec {
            from_is_dependent: true,
            dep_nav: Some(rel.name),
            prin_nav: inverse.map(|r| r.name),
            fk_columns: rel.fk_columns,
            fk_nullable: rel.fk_nullable,
            cascade_delete: cascade,
        })
    } else {
        // Declared from the principal; FK shape lives on the dependent's
        // inverse, when it has one.
        let (fk_columns, fk_nullable) =
            inverse.map_or((&[][..], false), |r| (r.fk_columns, r.fk_nullable));
        Ok(LinkSpec {
            from_is_dependent: false,
            dep_nav: inverse.map(|r| r.name),
            prin_nav: Some(rel.name),
            fk_columns,
            fk_nullable,
            cascade_delete: cascade,
        })
    }
}

impl<B: Backend> Context<B> {
    /// Recompute the FK-derived edges touching one entry from its current
    /// scalar values. Independent-association and deferred edges survive.
    pub(crate) fn fixup_entry(&mut self, id: EntryId) {
        self.edges.retain(|e| {
            e.fk_pending || !e.is_fk_based() || (e.principal != id && e.dependent != id)
        });

        let mut discovered = Vec::new();
        {
            let Some(entry) = self.entries.get(&id) else {
                return;
            };
            if entry.state == EntityState::Deleted {
                return;
            }

            // This entry as the dependent: follow its FK scalars.
            for rel in entry
                .relationships
                .iter()
                .filter(|r| r.declares_dependent() && r.is_fk_based())
            {
                let fk: Vec<Value> = rel
                    .fk_columns
                    .iter()
                    .map(|c| entry.current.get(c).cloned().unwrap_or(Value::Null))
                    .collect();
                if fk.iter().any(Value::is_null) {
                    continue;
                }
                let Some(pid) = self.occupant(rel.target, &fk) else {
                    continue;
                };
                let Some(principal) = self.entries.get(&pid) else {
                    continue;
                };
                if principal.state == EntityState::Deleted {
                    continue;
                }
                let inverse =
                    find_inverse_relationship(rel, principal.relationships, entry.set_name);
                discovered.push(Edge {
                    principal: pid,
                    dependent: id,
                    dep_nav: Some(rel.name),
                    prin_nav: inverse.map(|r| r.name),
                    fk_columns: rel.fk_columns,
                    fk_nullable: rel.fk_nullable,
                    cascade_delete: rel.cascade_delete || inverse.is_some_and(|r| r.cascade_delete),
                    fk_pending: false,
                });
            }

            // This entry as the principal: scan other entries' FK scalars.
            for other in self.entries.values() {
                if other.id == id || other.state == EntityState::Deleted {
                    continue;
                }
                for rel in other.relationships.iter().filter(|r| {
                    r.declares_dependent() && r.is_fk_based() && r.target == entry.set_name
                }) {
                    let fk: Vec<Value> = rel
                        .fk_columns
                        .iter()
                        .map(|c| other.current.get(c).cloned().unwrap_or(Value::Null))
                        .collect();
                    if fk.iter().any(Value::is_null) || fk != entry.key {
                        continue;
                    }
                    let inverse =
                        find_inverse_relationship(rel, entry.relationships, other.set_name);
                    discovered.push(Edge {
                        principal: id,
                        dependent: other.id,
                        dep_nav: Some(rel.name),
                        prin_nav: inverse.map(|r| r.name),
                        fk_columns: rel.fk_columns,
                        fk_nullable: rel.fk_nullable,
                        cascade_delete: rel.cascade_delete
                            || inverse.is_some_and(|r| r.cascade_delete),
                        fk_pending: false,
                    });
                }
            }
        }
        for edge in discovered {
            self.push_edge(edge);
        }
    }

    fn push_edge(&mut self, edge: Edge) {
        let duplicate = self.edges.iter().any(|e| {
            e.principal == edge.principal
                && e.dependent == edge.dependent
                && e.dep_nav == edge.dep_nav
                && e.prin_nav == edge.prin_nav
        });
        if !duplicate {
            self.edges.push(edge);
        }
    }

    /// Establish an edge and synchronize the dependent's FK scalars. When
    /// the principal is still Added, FK writes are deferred.
    pub(crate) fn connect(&mut self, prin_id: EntryId, dep_id: EntryId, spec: &LinkSpec) {
        let mut edge = Edge {
            principal: prin_id,
            dependent: dep_id,
            dep_nav: spec.dep_nav,
            prin_nav: spec.prin_nav,
            fk_columns: spec.fk_columns,
            fk_nullable: spec.fk_nullable,
            cascade_delete: spec.cascade_delete,
            fk_pending: false,
        };
        if edge.is_fk_based() {
            let principal_added = self
                .entries
                .get(&prin_id)
                .is_some_and(|e| e.state == EntityState::Added);
            if principal_added {
                edge.fk_pending = true;
            } else if let Some(pkey) = self.entries.get(&prin_id).map(|e| e.key.clone()) {
                if let Some(dep) = self.entries.get_mut(&dep_id) {
                    for (col, value) in spec.fk_columns.iter().zip(pkey) {
                        if dep.current.get(col) != Some(&value) {
                            dep.current.set(*col, value);
                            dep.note_write(col);
                        }
                    }
                }
            }
        }
        self.push_edge(edge);
    }

    /// Propagate deferred FK values once their principals have durable keys.
    pub(crate) fn propagate_pending_fk(&mut self) {
        for i in 0..self.edges.len() {
            if !self.edges[i].fk_pending {
                continue;
            }
            let (prin_id, dep_id, cols) = (
                self.edges[i].principal,
                self.edges[i].dependent,
                self.edges[i].fk_columns,
            );
            let Some(pkey) = self.entries.get(&prin_id).map(|e| e.key.clone()) else {
                continue;
            };
            if pkey.iter().any(Value::is_null) {
                continue;
            }
            if let Some(dep) = self.entries.get_mut(&dep_id) {
                for (col, value) in cols.iter().zip(pkey) {
                    if dep.current.get(col) != Some(&value) {
                        dep.current.set(*col, value);
                        dep.note_write(col);
                    }
                }
            }
            self.edges[i].fk_pending = false;
        }
    }

    /// Sever or cascade the relationships of a newly Deleted entry.
    ///
    /// Non-nullable FK dependents (and cascade-marked ones) delete with the
    /// principal; nullable FK dependents get their FK columns nulled and
    /// move to Modified.
    pub(crate) fn sever_for_delete(&mut self, id: EntryId) {
        let mut stack = vec![id];
        while let Some(pid) = stack.pop() {
            let outgoing: Vec<Edge> = self
                .edges
                .iter()
                .filter(|e| e.principal == pid)
                .cloned()
                .collect();
            for edge in outgoing {
                let dep_id = edge.dependent;
                let Some(dep_state) = self.entries.get(&dep_id).map(|e| e.state) else {
                    continue;
                };
                if dep_state == EntityState::Deleted {
                    continue;
                }
                let cascades = edge.cascade_delete || (edge.is_fk_based() && !edge.fk_nullable);
                if cascades {
                    if dep_state == EntityState::Added {
                        // Pending inserts vanish instead of becoming Deleted.
                        self.remove_entry(dep_id);
                    } else {
                        if let Some(dep) = self.entries.get_mut(&dep_id) {
                            dep.state = EntityState::Deleted;
                        }
                        stack.push(dep_id);
                    }
                } else {
                    if edge.is_fk_based() {
                        if let Some(dep) = self.entries.get_mut(&dep_id) {
                            for col in edge.fk_columns {
                                if dep.current.get(col) != Some(&Value::Null) {
                                    dep.current.set(*col, Value::Null);
                                    dep.note_write(col);
                                }
                            }
                        }
                    }
                    self.edges.retain(|e| {
                        !(e.principal == pid && e.dependent == dep_id && e.dep_nav == edge.dep_nav)
                    });
                }
            }
        }
    }

    /// Point a dependent's reference navigation at a principal, or sever it
    /// with `None`.
    #[tracing::instrument(level = "debug", skip(self, dependent, principal))]
    pub fn set_reference<D: Entity, P: Entity>(
        &mut self,
        dependent: &D,
        navigation: &str,
        principal: Option<&P>,
    ) -> Result<()> {
        let dep_id = self.require_entry(dependent)?;
        let rel = find_relationship(D::RELATIONSHIPS, navigation).ok_or_else(|| {
            Error::relationship(
                RelationshipErrorKind::UnknownNavigation,
                navigation,
                format!("navigation '{navigation}' is not declared on '{}'", D::SET_NAME),
            )
        })?;
        if rel.kind == RelationshipKind::OneToMany {
            return Err(Error::relationship(
                RelationshipErrorKind::NotRelated,
                navigation,
                format!("'{navigation}' is collection-valued; collections follow from their dependents"),
            ));
        }
        if rel.target != P::SET_NAME {
            return Err(Error::relationship(
                RelationshipErrorKind::NotRelated,
                navigation,
                format!(
                    "navigation '{navigation}' targets '{}', not '{}'",
                    rel.target,
                    P::SET_NAME
                ),
            ));
        }
        let dep_state = self
            .entries
            .get(&dep_id)
            .map_or(EntityState::Detached, |e| e.state);
        if !dep_state.allows_current_values() {
            return Err(Error::state(
                tether_core::StateErrorKind::InvalidForState,
                D::SET_NAME,
                format!("cannot change references while {dep_state}"),
            ));
        }

        self.edges
            .retain(|e| !(e.dependent == dep_id && e.dep_nav == Some(rel.name)));

        match principal {
            Some(p) => {
                let prin_id = self.require_entry(p)?;
                if self
                    .entries
                    .get(&prin_id)
                    .is_some_and(|e| e.state == EntityState::Deleted)
                {
                    return Err(Error::relationship(
                        RelationshipErrorKind::ReferencesDeleted,
                        navigation,
                        "cannot reference a Deleted entity",
                    ));
                }
                let inverse = find_inverse_relationship(rel, P::RELATIONSHIPS, D::SET_NAME);
                let spec = LinkSpec {
                    from_is_dependent: true,
                    dep_nav: Some(rel.name),
                    prin_nav: inverse.map(|r| r.name),
                    fk_columns: rel.fk_columns,
                    fk_nullable: rel.fk_nullable,
                    cascade_delete: rel.cascade_delete || inverse.is_some_and(|r| r.cascade_delete),
                };
                self.connect(prin_id, dep_id, &spec);
            }
            None => {
                if rel.is_fk_based() {
                    if !rel.fk_nullable {
                        return Err(Error::constraint(
                            rel.fk_columns.first().copied().unwrap_or(rel.name),
                            format!("severing '{navigation}' would null a non-nullable foreign key"),
                        ));
                    }
                    if let Some(dep) = self.entries.get_mut(&dep_id) {
                        for col in rel.fk_columns {
                            if dep.current.get(col) != Some(&Value::Null) {
                                dep.current.set(*col, Value::Null);
                                dep.note_write(col);
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Resolve a single-valued navigation to the entity on its other end.
    pub fn reference_of<D: Entity, P: Entity>(
        &self,
        entity: &D,
        navigation: &str,
    ) -> Result<Option<P>> {
        let id = self.require_entry(entity)?;
        let rel = find_relationship(D::RELATIONSHIPS, navigation).ok_or_else(|| {
            Error::relationship(
                RelationshipErrorKind::UnknownNavigation,
                navigation,
                format!("navigation '{navigation}' is not declared on '{}'", D::SET_NAME),
            )
        })?;
        if rel.kind == RelationshipKind::OneToMany {
            return Err(Error::relationship(
                RelationshipErrorKind::NotRelated,
                navigation,
                format!("'{navigation}' is collection-valued; use collection_of"),
            ));
        }
        let other_id = self.edges.iter().find_map(|e| {
            if e.dependent == id && e.dep_nav == Some(rel.name) {
                Some(e.principal)
            } else if e.principal == id && e.prin_nav == Some(rel.name) {
                Some(e.dependent)
            } else {
                None
            }
        });
        let Some(other_id) = other_id else {
            return Ok(None);
        };
        let Some(other) = self.entries.get(&other_id) else {
            return Ok(None);
        };
        if other.state == EntityState::Deleted {
            return Ok(None);
        }
        if other.type_id != TypeId::of::<P>() {
            return Err(Error::Type(TypeError {
                expected: std::any::type_name::<P>(),
                actual: other.type_name.to_string(),
                property: Some(navigation.to_string()),
            }));
        }
        P::from_record(&other.current).map(Some)
    }

    /// Resolve a collection navigation to its tracked, non-Deleted members.
    pub fn collection_of<P: Entity, D: Entity>(
        &self,
        principal: &P,
        navigation: &str,
    ) -> Result<Vec<D>> {
        let rel = find_relationship(P::RELATIONSHIPS, navigation).ok_or_else(|| {
            Error::relationship(
                RelationshipErrorKind::UnknownNavigation,
                navigation,
                format!("navigation '{navigation}' is not declared on '{}'", P::SET_NAME),
            )
        })?;
        if rel.kind != RelationshipKind::OneToMany {
            return Err(Error::relationship(
                RelationshipErrorKind::NotRelated,
                navigation,
                format!("'{navigation}' is single-valued; use reference_of"),
            ));
        }
        let id = self.require_entry(principal)?;
        let mut dep_ids: Vec<EntryId> = self
            .edges
            .iter()
            .filter(|e| e.principal == id && e.prin_nav == Some(rel.name))
            .map(|e| e.dependent)
            .collect();
        dep_ids.sort_unstable();
        dep_ids.dedup();
        dep_ids
            .iter()
            .filter_map(|did| self.entries.get(did))
            .filter(|e| e.state != EntityState::Deleted && e.type_id == TypeId::of::<D>())
            .map(|e| D::from_record(&e.current))
            .collect()
    }
}
