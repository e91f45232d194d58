//! The tracking context: identity map, entry set, and lifecycle operations.
//!
//! A `Context` owns a [`Backend`] and tracks entities through the
//! Detached/Unchanged/Added/Modified/Deleted lifecycle. It is built for one
//! logical thread of control: no internal locking, and the async store
//! fetch is the only suspending operation.

use crate::entry::{EntityEntry, TrackedEntry};
use crate::graph::EntityGraph;
use crate::identity_map::{EntryId, IdentityMap, hash_key};
use crate::state::EntityState;
use crate::store::{Backend, StoreOp, discriminator_matches};
use crate::values::{CurrentValues, OriginalValues, PropertyValues, scalar_paths};
use asupersync::{Cx, Outcome};
use std::any::TypeId;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::marker::PhantomData;
use tether_core::{
    DISCRIMINATOR_COLUMN, Entity, Error, FieldInfo, KeyErrorKind, PropertyError, Record, Result,
    StateErrorKind, TypeError, Value, find_field,
};

/// Explicit configuration for a context (no ambient global state).
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Run change detection automatically at the start of `validate_all`
    /// and `save_changes`.
    pub auto_detect_changes: bool,
    /// Validate Added/Modified entries before flushing; a failed report
    /// aborts the save.
    pub validate_on_save: bool,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            auto_detect_changes: true,
            validate_on_save: true,
        }
    }
}

/// Counts of rows flushed by one `save_changes` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct SaveResult {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl SaveResult {
    /// Total rows written.
    #[must_use]
    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.deleted
    }
}

/// What a custom validator sees for one candidate entry.
pub struct ValidationInput<'a> {
    pub entity_set: &'static str,
    pub key: &'a [Value],
    pub state: EntityState,
    /// Flattened current values; pair each path with its value for the
    /// property tuples.
    pub values: &'a Record,
    pub fields: &'static [FieldInfo],
}

pub(crate) type Validator = Box<dyn Fn(&ValidationInput<'_>) -> Vec<PropertyError> + Send + Sync>;

#[derive(Debug, Clone, Copy)]
pub(crate) struct SetMeta {
    pub(crate) set_name: &'static str,
    pub(crate) type_id: TypeId,
    pub(crate) type_name: &'static str,
    pub(crate) key_columns: &'static [&'static str],
    pub(crate) discriminator: Option<&'static str>,
    pub(crate) fields: &'static [FieldInfo],
}

/// The tracking context.
pub struct Context<B: Backend> {
    pub(crate) backend: B,
    pub(crate) config: ContextConfig,
    pub(crate) entries: BTreeMap<EntryId, TrackedEntry>,
    pub(crate) ids: IdentityMap,
    pub(crate) edges: Vec<crate::fixup::Edge>,
    pub(crate) validators: HashMap<&'static str, Vec<Validator>>,
    pub(crate) registry: HashMap<&'static str, SetMeta>,
    pub(crate) next_id: EntryId,
    /// Detection pass number, stamped into trace output only.
    pub(crate) detection_pass: u64,
}

impl<B: Backend> Context<B> {
    /// Create a context with default configuration.
    pub fn new(backend: B) -> Self {
        Self::with_config(backend, ContextConfig::default())
    }

    /// Create a context with explicit configuration.
    pub fn with_config(backend: B, config: ContextConfig) -> Self {
        Self {
            backend,
            config,
            entries: BTreeMap::new(),
            ids: IdentityMap::new(),
            edges: Vec::new(),
            validators: HashMap::new(),
            registry: HashMap::new(),
            next_id: 0,
            detection_pass: 0,
        }
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Borrow the backing store.
    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Mutably borrow the backing store.
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Drop every tracked entry, edge, and identity.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.ids = IdentityMap::new();
        self.edges.clear();
    }

    /// Register an entity type so its set is reachable by name.
    pub fn register<E: Entity>(&mut self) {
        self.registry.entry(E::SET_NAME).or_insert(SetMeta {
            set_name: E::SET_NAME,
            type_id: TypeId::of::<E>(),
            type_name: std::any::type_name::<E>(),
            key_columns: E::KEY,
            discriminator: E::DISCRIMINATOR,
            fields: E::fields(),
        });
    }

    // ---- identity -------------------------------------------------------

    pub(crate) fn occupant(&self, set: &'static str, key: &[Value]) -> Option<EntryId> {
        let id = self.ids.get(set, hash_key(key))?;
        let entry = self.entries.get(&id)?;
        (entry.key == key).then_some(id)
    }

    pub(crate) fn tracked_id<E: Entity>(&self, key: &[Value]) -> Option<EntryId> {
        let id = self.occupant(E::SET_NAME, key)?;
        (self.entries.get(&id)?.type_id == TypeId::of::<E>()).then_some(id)
    }

    pub(crate) fn require_entry<E: Entity>(&self, entity: &E) -> Result<EntryId> {
        let key = entity.key_value();
        self.tracked_id::<E>(&key).ok_or_else(|| {
            Error::state(
                StateErrorKind::NotTracked,
                E::SET_NAME,
                format!("the entity with key {key:?} is not tracked by this context"),
            )
        })
    }

    /// The lifecycle state of an entity, `Detached` when untracked.
    pub fn state_of<E: Entity>(&self, entity: &E) -> EntityState {
        self.tracked_id::<E>(&entity.key_value())
            .and_then(|id| self.entries.get(&id))
            .map_or(EntityState::Detached, |e| e.state)
    }

    /// Whether this context tracks the entity.
    pub fn is_tracked<E: Entity>(&self, entity: &E) -> bool {
        self.state_of(entity).is_tracked()
    }

    // ---- lifecycle ------------------------------------------------------

    /// Track an entity as Added (pending insert).
    #[tracing::instrument(level = "debug", skip(self, entity), fields(set = E::SET_NAME))]
    pub fn add<E: Entity>(&mut self, entity: &E) -> Result<()> {
        self.register::<E>();
        let mut graph = EntityGraph::new();
        graph.node(entity);
        self.track_graph(&graph, EntityState::Added)
    }

    /// Track an entity as Unchanged (already persisted).
    #[tracing::instrument(level = "debug", skip(self, entity), fields(set = E::SET_NAME))]
    pub fn attach<E: Entity>(&mut self, entity: &E) -> Result<()> {
        self.register::<E>();
        let mut graph = EntityGraph::new();
        graph.node(entity);
        self.track_graph(&graph, EntityState::Unchanged)
    }

    /// Track a whole graph as Added; each node's state resolves
    /// independently per the transition rules.
    #[tracing::instrument(level = "debug", skip(self, graph), fields(nodes = graph.len()))]
    pub fn add_graph(&mut self, graph: &EntityGraph) -> Result<()> {
        self.track_graph(graph, EntityState::Added)
    }

    /// Track a whole graph as Unchanged; consistent reachable nodes are
    /// always forced to Unchanged.
    #[tracing::instrument(level = "debug", skip(self, graph), fields(nodes = graph.len()))]
    pub fn attach_graph(&mut self, graph: &EntityGraph) -> Result<()> {
        self.track_graph(graph, EntityState::Unchanged)
    }

    fn track_graph(&mut self, graph: &EntityGraph, target: EntityState) -> Result<()> {
        // Validate the whole graph before any state mutates.
        for (i, node) in graph.nodes.iter().enumerate() {
            for other in &graph.nodes[..i] {
                if other.set_name == node.set_name && other.key == node.key {
                    return Err(Error::key(
                        KeyErrorKind::DuplicateAddedKey,
                        node.set_name,
                        format!("the graph names the key {:?} more than once", node.key),
                    ));
                }
            }
            let occupant = self.occupant(node.set_name, &node.key);
            if let Some(entry) = occupant.and_then(|id| self.entries.get(&id)) {
                if entry.type_id != node.type_id {
                    return Err(Error::key(
                        KeyErrorKind::DuplicateAddedKey,
                        node.set_name,
                        format!(
                            "the key {:?} is already tracked by '{}'",
                            node.key, entry.type_name
                        ),
                    ));
                }
            }
            if node.default_key && target == EntityState::Unchanged {
                let added_already = occupant
                    .and_then(|id| self.entries.get(&id))
                    .is_some_and(|e| e.state == EntityState::Added);
                if !added_already {
                    return Err(Error::key(
                        KeyErrorKind::InvalidKeyForAttach,
                        node.set_name,
                        "an entity with a null or default key can only be attached while Added",
                    ));
                }
            }
        }

        let specs = self.validate_links(graph)?;

        if target == EntityState::Added {
            for node in &graph.nodes {
                self.assert_not_referencing_deleted(node)?;
            }
        }

        // Resolve each node independently.
        let mut node_ids = Vec::with_capacity(graph.nodes.len());
        for node in &graph.nodes {
            let id = match self.occupant(node.set_name, &node.key) {
                Some(id) => {
                    self.apply_transition(id, &node.record, target);
                    id
                }
                None => self.insert_node(node, target),
            };
            node_ids.push(id);
        }

        // FK-scalar edge discovery, then the explicit links.
        for &id in &node_ids {
            self.fixup_entry(id);
        }
        for (link, spec) in graph.links.iter().zip(&specs) {
            let (prin_id, dep_id) = if spec.from_is_dependent {
                (node_ids[link.to.0], node_ids[link.from.0])
            } else {
                (node_ids[link.from.0], node_ids[link.to.0])
            };
            self.connect(prin_id, dep_id, spec);
        }

        // Snapshot originals only after FK sync, so attached entries read
        // store-consistent.
        if target == EntityState::Unchanged {
            for &id in &node_ids {
                if let Some(entry) = self.entries.get_mut(&id) {
                    entry.accept();
                }
            }
        }
        Ok(())
    }

    fn validate_links(&self, graph: &EntityGraph) -> Result<Vec<crate::fixup::LinkSpec>> {
        let mut specs = Vec::with_capacity(graph.links.len());
        for link in &graph.links {
            let from = &graph.nodes[link.from.0];
            let to = &graph.nodes[link.to.0];
            let spec = crate::fixup::resolve_link(
                from.relationships,
                from.set_name,
                link.navigation,
                to.relationships,
                to.set_name,
            )?;
            let (dep, prin) = if spec.from_is_dependent {
                (from, to)
            } else {
                (to, from)
            };
            if !spec.fk_columns.is_empty() {
                let fk: Vec<Value> = spec
                    .fk_columns
                    .iter()
                    .map(|c| dep.record.get(c).cloned().unwrap_or(Value::Null))
                    .collect();
                if fk.iter().all(|v| !v.is_null()) && fk != prin.key {
                    return Err(Error::relationship(
                        tether_core::RelationshipErrorKind::InconsistentReferentialConstraint,
                        link.navigation,
                        format!(
                            "the dependent's foreign key {fk:?} disagrees with the principal key {:?}",
                            prin.key
                        ),
                    ));
                }
            }
            specs.push(spec);
        }
        Ok(specs)
    }

    fn apply_transition(&mut self, id: EntryId, record: &Record, target: EntityState) {
        let Some(entry) = self.entries.get_mut(&id) else {
            return;
        };
        match target {
            EntityState::Unchanged => {
                // Attach forces Unchanged for everything reachable. The state
                // must flip here, before the fixup phase, so edge discovery
                // sees re-attached entries as live; the accept in the final
                // phase snapshots the original.
                entry.current = record.clone();
                entry.state = EntityState::Unchanged;
                entry.modified.clear();
                entry.recompute_key();
            }
            EntityState::Added => match entry.state {
                EntityState::Added => {}
                EntityState::Unchanged | EntityState::Modified => {
                    entry.current = record.clone();
                    entry.original = None;
                    entry.modified.clear();
                    entry.state = EntityState::Added;
                }
                EntityState::Deleted => {
                    // Re-add after delete: optional non-key scalars reset to
                    // their unset representation; key and required scalars
                    // keep their pre-delete values.
                    let mut paths = Vec::new();
                    scalar_paths(entry.fields, "", &mut paths);
                    for path in paths {
                        let resettable = crate::values::resolve_field(entry.fields, &path)
                            .is_some_and(|f| f.nullable && !f.key);
                        if resettable {
                            entry.current.set(path, Value::Null);
                        }
                    }
                    entry.original = None;
                    entry.modified.clear();
                    entry.state = EntityState::Added;
                }
                EntityState::Detached => {}
            },
            _ => {}
        }
    }

    fn insert_node(&mut self, node: &crate::graph::GraphNode, state: EntityState) -> EntryId {
        let id = self.next_id;
        self.next_id += 1;
        let entry = TrackedEntry {
            id,
            type_id: node.type_id,
            type_name: node.type_name,
            set_name: node.set_name,
            key_columns: node.key_columns,
            discriminator: node.discriminator,
            fields: node.fields,
            relationships: node.relationships,
            state,
            key: node.key.clone(),
            current: node.record.clone(),
            original: None,
            modified: BTreeSet::new(),
        };
        self.ids.insert(node.set_name, hash_key(&entry.key), id);
        self.entries.insert(id, entry);
        id
    }

    /// Mark an entity for deletion (or drop it outright when Added).
    #[tracing::instrument(level = "debug", skip(self, entity), fields(set = E::SET_NAME))]
    pub fn remove<E: Entity>(&mut self, entity: &E) -> Result<()> {
        let id = self.require_entry(entity)?;
        self.remove_tracked(id)
    }

    pub(crate) fn remove_tracked(&mut self, id: EntryId) -> Result<()> {
        let Some(state) = self.entries.get(&id).map(|e| e.state) else {
            return Ok(());
        };
        match state {
            EntityState::Added => {
                // No Deleted phase for pending inserts.
                self.remove_entry(id);
            }
            EntityState::Unchanged | EntityState::Modified => {
                if let Some(entry) = self.entries.get_mut(&id) {
                    entry.state = EntityState::Deleted;
                }
                self.sever_for_delete(id);
            }
            EntityState::Deleted | EntityState::Detached => {}
        }
        Ok(())
    }

    /// Stop tracking an entity without scheduling any store change.
    #[tracing::instrument(level = "debug", skip(self, entity), fields(set = E::SET_NAME))]
    pub fn detach<E: Entity>(&mut self, entity: &E) -> Result<()> {
        let id = self.require_entry(entity)?;
        // Pending mutations must be observed before the entry disappears.
        self.detect_changes();
        self.remove_entry(id);
        Ok(())
    }

    pub(crate) fn remove_entry(&mut self, id: EntryId) {
        if let Some(entry) = self.entries.remove(&id) {
            self.ids.remove(entry.set_name, hash_key(&entry.key));
            self.edges
                .retain(|e| e.principal != id && e.dependent != id);
        }
    }

    /// Refresh a tracked entry's current values from a mutated instance.
    #[tracing::instrument(level = "trace", skip(self, entity), fields(set = E::SET_NAME))]
    pub fn update<E: Entity>(&mut self, entity: &E) -> Result<()> {
        let id = self.require_entry(entity)?;
        let state = self.entries.get(&id).map_or(EntityState::Detached, |e| e.state);
        if !state.allows_current_values() {
            return Err(Error::state(
                StateErrorKind::InvalidForState,
                E::SET_NAME,
                format!("cannot update values while {state}"),
            ));
        }
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.current = entity.to_record();
        }
        self.fixup_entry(id);
        self.detect_entry(id);
        Ok(())
    }

    fn assert_not_referencing_deleted(&self, node: &crate::graph::GraphNode) -> Result<()> {
        // Direct FK references plus anything transitively reachable through
        // tracked dependent-to-principal edges.
        let mut seeds: Vec<(EntryId, &'static str)> = Vec::new();
        for rel in node
            .relationships
            .iter()
            .filter(|r| r.declares_dependent() && r.is_fk_based())
        {
            let fk: Vec<Value> = rel
                .fk_columns
                .iter()
                .map(|c| node.record.get(c).cloned().unwrap_or(Value::Null))
                .collect();
            if fk.iter().any(Value::is_null) {
                continue;
            }
            if let Some(pid) = self.occupant(rel.target, &fk) {
                seeds.push((pid, rel.name));
            }
        }
        if let Some(id) = self.occupant(node.set_name, &node.key) {
            for edge in self.edges.iter().filter(|e| e.dependent == id) {
                seeds.push((edge.principal, edge.dep_nav.unwrap_or("")));
            }
        }

        let mut seen: BTreeSet<EntryId> = BTreeSet::new();
        let mut stack = seeds;
        while let Some((cur, nav)) = stack.pop() {
            if !seen.insert(cur) {
                continue;
            }
            if self
                .entries
                .get(&cur)
                .is_some_and(|e| e.state == EntityState::Deleted)
            {
                return Err(Error::relationship(
                    tether_core::RelationshipErrorKind::ReferencesDeleted,
                    nav,
                    "cannot add an entity that references a Deleted entity",
                ));
            }
            for edge in self.edges.iter().filter(|e| e.dependent == cur) {
                stack.push((edge.principal, nav));
            }
        }
        Ok(())
    }

    // ---- accept / save --------------------------------------------------

    /// Accept every pending change: Deleted entries vanish, deferred FK
    /// values propagate, everything else becomes Unchanged with a fresh
    /// original snapshot.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn accept_changes(&mut self) {
        let deleted: Vec<EntryId> = self
            .entries
            .values()
            .filter(|e| e.state == EntityState::Deleted)
            .map(|e| e.id)
            .collect();
        for id in deleted {
            self.remove_entry(id);
        }
        self.propagate_pending_fk();
        for entry in self.entries.values_mut() {
            entry.accept();
        }
    }

    /// Flush pending changes to the backend in delete, insert, update
    /// order, then accept.
    #[tracing::instrument(level = "info", skip(self))]
    pub fn save_changes(&mut self) -> Result<SaveResult> {
        if self.config.auto_detect_changes {
            self.detect_changes();
        }
        if self.config.validate_on_save {
            let report = self.run_validation();
            if !report.is_valid() {
                return Err(Error::Custom(format!(
                    "save aborted: {} entities failed validation",
                    report.results.len()
                )));
            }
        }
        self.propagate_pending_fk();

        let mut ops = Vec::new();
        let mut result = SaveResult::default();
        for entry in self.entries.values() {
            if entry.state == EntityState::Deleted {
                ops.push(StoreOp::Delete {
                    set: entry.set_name.to_string(),
                    key: entry.key.clone(),
                });
                result.deleted += 1;
            }
        }
        for entry in self.entries.values() {
            if entry.state == EntityState::Added {
                ops.push(StoreOp::Insert {
                    set: entry.set_name.to_string(),
                    key: entry.key.clone(),
                    record: stamped_record(entry),
                });
                result.inserted += 1;
            }
        }
        for entry in self.entries.values() {
            if entry.state == EntityState::Modified {
                ops.push(StoreOp::Update {
                    set: entry.set_name.to_string(),
                    key: entry.key.clone(),
                    record: stamped_record(entry),
                });
                result.updated += 1;
            }
        }

        if !ops.is_empty() {
            self.backend.apply(ops)?;
        }
        self.accept_changes();
        tracing::debug!(
            inserted = result.inserted,
            updated = result.updated,
            deleted = result.deleted,
            "changes saved"
        );
        Ok(result)
    }

    // ---- find -----------------------------------------------------------

    /// Find an entity by key: tracked entries first, then a store lookup
    /// that attaches the materialized row as Unchanged.
    #[tracing::instrument(level = "debug", skip(self, key_values), fields(set = E::SET_NAME))]
    pub fn find<E: Entity>(&mut self, key_values: &[Value]) -> Result<Option<E>> {
        match self.prepare_find::<E>(key_values)? {
            Some(record) => E::from_record(&record).map(Some),
            None => {
                let row = self.backend.fetch(E::SET_NAME, key_values)?;
                self.materialize_fetched::<E>(row)
            }
        }
    }

    /// Async [`Context::find`]; identical results via the async fetch path.
    pub fn find_async<E: Entity>(
        &mut self,
        cx: &Cx,
        key_values: &[Value],
    ) -> impl Future<Output = Outcome<Option<E>, Error>> + Send {
        let prepared = self.prepare_find::<E>(key_values);
        let key = key_values.to_vec();
        async move {
            match prepared {
                Err(e) => Outcome::Err(e),
                Ok(Some(record)) => E::from_record(&record)
                    .map(Some)
                    .map_or_else(Outcome::Err, Outcome::Ok),
                Ok(None) => {
                    let fetched = self.backend.fetch_async(cx, E::SET_NAME, &key).await;
                    match fetched {
                        Outcome::Ok(row) => self
                            .materialize_fetched::<E>(row)
                            .map_or_else(Outcome::Err, Outcome::Ok),
                        Outcome::Err(e) => Outcome::Err(e),
                        Outcome::Cancelled(r) => Outcome::Cancelled(r),
                        Outcome::Panicked(p) => Outcome::Panicked(p),
                    }
                }
            }
        }
    }

    /// Key validation and identity-map probe. `Ok(Some)` is a tracked hit,
    /// `Ok(None)` means the store must be consulted.
    fn prepare_find<E: Entity>(&mut self, key_values: &[Value]) -> Result<Option<Record>> {
        self.register::<E>();
        if key_values.len() != E::KEY.len() {
            return Err(Error::key(
                KeyErrorKind::WrongValueCount,
                E::SET_NAME,
                format!(
                    "key_values: expected {} values, got {}",
                    E::KEY.len(),
                    key_values.len()
                ),
            ));
        }
        for (i, (col, value)) in E::KEY.iter().zip(key_values).enumerate() {
            if value.is_null() {
                return Err(Error::key(
                    KeyErrorKind::NullKey,
                    E::SET_NAME,
                    format!("key_values[{i}] for '{col}' must not be null"),
                ));
            }
            if let Some(field) = find_field(E::fields(), col) {
                if !field.scalar_type.accepts(value) {
                    return Err(Error::key(
                        KeyErrorKind::WrongValueType,
                        E::SET_NAME,
                        format!(
                            "key_values[{i}] for '{col}': expected {}, got {}",
                            field.scalar_type.name(),
                            value.type_name()
                        ),
                    ));
                }
            }
        }
        if let Some(id) = self.occupant(E::SET_NAME, key_values) {
            let Some(entry) = self.entries.get(&id) else {
                return Ok(None);
            };
            if entry.type_id != TypeId::of::<E>() {
                return Err(Error::Type(TypeError {
                    expected: std::any::type_name::<E>(),
                    actual: entry.type_name.to_string(),
                    property: None,
                }));
            }
            return Ok(Some(entry.current.clone()));
        }
        Ok(None)
    }

    fn materialize_fetched<E: Entity>(&mut self, row: Option<Record>) -> Result<Option<E>> {
        let Some(record) = row else {
            return Ok(None);
        };
        // A row of a different concrete subtype reads as "not found".
        if !discriminator_matches(&record, E::DISCRIMINATOR) {
            return Ok(None);
        }
        let entity = E::from_record(&record)?;
        self.attach(&entity)?;
        Ok(Some(entity))
    }

    // ---- values views ---------------------------------------------------

    /// Writable current-values dictionary (Unchanged/Modified/Added only).
    pub fn current_values<E: Entity>(&mut self, entity: &E) -> Result<CurrentValues<'_>> {
        let id = self.require_entry(entity)?;
        let state = self.entries.get(&id).map_or(EntityState::Detached, |e| e.state);
        if !state.allows_current_values() {
            return Err(Error::state(
                StateErrorKind::InvalidForState,
                E::SET_NAME,
                format!("current values are not available while {state}"),
            ));
        }
        let key_locked = self
            .edges
            .iter()
            .any(|e| e.principal == id || e.dependent == id);
        let entry = self.entries.get_mut(&id).ok_or_else(|| {
            Error::state(StateErrorKind::NotTracked, E::SET_NAME, "entry vanished")
        })?;
        Ok(CurrentValues {
            entry,
            ids: &mut self.ids,
            key_locked,
        })
    }

    /// Writable original-snapshot dictionary (Unchanged/Modified/Deleted
    /// only; Added entities carry no original).
    pub fn original_values<E: Entity>(&mut self, entity: &E) -> Result<OriginalValues<'_>> {
        let id = self.require_entry(entity)?;
        let state = self.entries.get(&id).map_or(EntityState::Detached, |e| e.state);
        if !state.allows_original_values() {
            return Err(Error::state(
                StateErrorKind::InvalidForState,
                E::SET_NAME,
                format!("original values are not available while {state}"),
            ));
        }
        let entry = self.entries.get_mut(&id).ok_or_else(|| {
            Error::state(StateErrorKind::NotTracked, E::SET_NAME, "entry vanished")
        })?;
        Ok(OriginalValues { entry })
    }

    /// Fetch a point-in-time store snapshot for a tracked entity.
    ///
    /// `Ok(None)` when the row is gone or its discriminator names a
    /// different concrete type.
    pub fn store_values<E: Entity>(&mut self, entity: &E) -> Result<Option<PropertyValues>> {
        let key = self.prepare_store_values::<E>(entity)?;
        let row = self.backend.fetch(E::SET_NAME, &key)?;
        Ok(self.build_store_bag::<E>(row))
    }

    /// Async [`Context::store_values`]; identical results.
    pub fn store_values_async<E: Entity>(
        &mut self,
        cx: &Cx,
        entity: &E,
    ) -> impl Future<Output = Outcome<Option<PropertyValues>, Error>> + Send {
        let prepared = self.prepare_store_values::<E>(entity);
        async move {
            let key = match prepared {
                Ok(key) => key,
                Err(e) => return Outcome::Err(e),
            };
            let fetched = self.backend.fetch_async(cx, E::SET_NAME, &key).await;
            match fetched {
                Outcome::Ok(row) => Outcome::Ok(self.build_store_bag::<E>(row)),
                Outcome::Err(e) => Outcome::Err(e),
                Outcome::Cancelled(r) => Outcome::Cancelled(r),
                Outcome::Panicked(p) => Outcome::Panicked(p),
            }
        }
    }

    fn prepare_store_values<E: Entity>(&self, entity: &E) -> Result<Vec<Value>> {
        let id = self.require_entry(entity)?;
        let Some(entry) = self.entries.get(&id) else {
            return Err(Error::state(
                StateErrorKind::NotTracked,
                E::SET_NAME,
                "entry vanished",
            ));
        };
        if !entry.state.allows_store_values() {
            return Err(Error::state(
                StateErrorKind::InvalidForState,
                E::SET_NAME,
                format!("store values are not available while {}", entry.state),
            ));
        }
        // Snapshot reconstruction needs a non-null complex template.
        if let Some(original) = entry.original.as_ref() {
            for field in entry.fields.iter().filter(|f| f.is_complex()) {
                if original.sub_record(field.name).is_empty() {
                    return Err(Error::state(
                        StateErrorKind::InvalidOperation,
                        E::SET_NAME,
                        format!(
                            "the original value of complex property '{}' is null",
                            field.name
                        ),
                    ));
                }
            }
        }
        Ok(entry.key.clone())
    }

    fn build_store_bag<E: Entity>(&self, row: Option<Record>) -> Option<PropertyValues> {
        let record = row?;
        if !discriminator_matches(&record, E::DISCRIMINATOR) {
            return None;
        }
        let mut paths = Vec::new();
        scalar_paths(E::fields(), "", &mut paths);
        let mut filtered = Record::new();
        for path in paths {
            let value = record.get(&path).cloned().unwrap_or(Value::Null);
            filtered.push(path, value);
        }
        Some(PropertyValues::new(
            std::any::type_name::<E>(),
            E::fields(),
            filtered,
        ))
    }

    // ---- enumeration ----------------------------------------------------

    /// Summaries of every tracked entry, in tracking order.
    pub fn tracked_entries(&self) -> Vec<EntityEntry> {
        self.entries.values().map(TrackedEntry::summary).collect()
    }

    /// Summaries of tracked entries in one state.
    pub fn entries_in(&self, state: EntityState) -> Vec<EntityEntry> {
        self.entries
            .values()
            .filter(|e| e.state == state)
            .map(TrackedEntry::summary)
            .collect()
    }

    /// Summaries of tracked entries of one entity type.
    pub fn entries_of<E: Entity>(&self) -> Vec<EntityEntry> {
        self.entries
            .values()
            .filter(|e| e.type_id == TypeId::of::<E>())
            .map(TrackedEntry::summary)
            .collect()
    }

    /// Materialize every tracked, non-Deleted entity of a type.
    pub fn local<E: Entity>(&self) -> Result<Vec<E>> {
        self.entries
            .values()
            .filter(|e| {
                e.type_id == TypeId::of::<E>()
                    && e.set_name == E::SET_NAME
                    && e.state != EntityState::Deleted
            })
            .map(|e| E::from_record(&e.current))
            .collect()
    }

    // ---- validation -----------------------------------------------------

    /// Register a custom validator for one entity set.
    pub fn add_validator<E: Entity>(
        &mut self,
        validator: impl Fn(&ValidationInput<'_>) -> Vec<PropertyError> + Send + Sync + 'static,
    ) {
        self.register::<E>();
        self.validators
            .entry(E::SET_NAME)
            .or_default()
            .push(Box::new(validator));
    }

    // ---- set handles ----------------------------------------------------

    /// Typed handle to one entity set.
    pub fn set<E: Entity>(&mut self) -> Set<'_, E, B> {
        self.register::<E>();
        Set {
            ctx: self,
            marker: PhantomData,
        }
    }

    /// Type-erased, record-level handle to a registered set.
    pub fn set_by_name(&mut self, name: &str) -> Option<AnySet<'_, B>> {
        let meta = *self.registry.get(name)?;
        Some(AnySet { ctx: self, meta })
    }
}

fn stamped_record(entry: &TrackedEntry) -> Record {
    let mut record = entry.current.clone();
    if let Some(disc) = entry.discriminator {
        record.set(DISCRIMINATOR_COLUMN, Value::Text(disc.to_string()));
    }
    record
}

/// Typed handle to one entity set (the generic-first API surface).
pub struct Set<'c, E: Entity, B: Backend> {
    ctx: &'c mut Context<B>,
    marker: PhantomData<fn() -> E>,
}

impl<E: Entity, B: Backend> Set<'_, E, B> {
    pub fn add(&mut self, entity: &E) -> Result<()> {
        self.ctx.add(entity)
    }

    pub fn attach(&mut self, entity: &E) -> Result<()> {
        self.ctx.attach(entity)
    }

    pub fn remove(&mut self, entity: &E) -> Result<()> {
        self.ctx.remove(entity)
    }

    pub fn detach(&mut self, entity: &E) -> Result<()> {
        self.ctx.detach(entity)
    }

    pub fn update(&mut self, entity: &E) -> Result<()> {
        self.ctx.update(entity)
    }

    pub fn find(&mut self, key_values: &[Value]) -> Result<Option<E>> {
        self.ctx.find::<E>(key_values)
    }

    pub fn state_of(&self, entity: &E) -> EntityState {
        self.ctx.state_of(entity)
    }

    /// Tracked, non-Deleted entities of this set.
    pub fn local(&self) -> Result<Vec<E>> {
        self.ctx.local::<E>()
    }
}

/// Type-erased, record-level handle built atop the typed surface.
pub struct AnySet<'c, B: Backend> {
    ctx: &'c mut Context<B>,
    meta: SetMeta,
}

impl<B: Backend> AnySet<'_, B> {
    /// Entity-set name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.meta.set_name
    }

    /// State of the entry with this key, `Detached` when untracked.
    #[must_use]
    pub fn state_of(&self, key: &[Value]) -> EntityState {
        self.ctx
            .occupant(self.meta.set_name, key)
            .and_then(|id| self.ctx.entries.get(&id))
            .map_or(EntityState::Detached, |e| e.state)
    }

    /// Whether an entry with this key is tracked.
    #[must_use]
    pub fn contains(&self, key: &[Value]) -> bool {
        self.state_of(key).is_tracked()
    }

    /// Current record of a tracked entry.
    #[must_use]
    pub fn current_record(&self, key: &[Value]) -> Option<Record> {
        let id = self.ctx.occupant(self.meta.set_name, key)?;
        self.ctx.entries.get(&id).map(|e| e.current.clone())
    }

    /// Current records of every tracked, non-Deleted entry in this set.
    #[must_use]
    pub fn local_records(&self) -> Vec<Record> {
        self.ctx
            .entries
            .values()
            .filter(|e| e.set_name == self.meta.set_name && e.state != EntityState::Deleted)
            .map(|e| e.current.clone())
            .collect()
    }

    /// Fetch the store row for a key.
    ///
    /// Unlike the typed store-values path, a discriminator mismatch here is
    /// a type error rather than "not found".
    pub fn store_record(&self, key: &[Value]) -> Result<Option<Record>> {
        let row = self.ctx.backend.fetch(self.meta.set_name, key)?;
        let Some(record) = row else {
            return Ok(None);
        };
        if !discriminator_matches(&record, self.meta.discriminator) {
            let actual = record
                .get(DISCRIMINATOR_COLUMN)
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string();
            return Err(Error::Type(TypeError {
                expected: self.meta.type_name,
                actual,
                property: Some(DISCRIMINATOR_COLUMN.to_string()),
            }));
        }
        Ok(Some(record))
    }

    /// Mark the entry with this key for deletion.
    pub fn remove(&mut self, key: &[Value]) -> Result<()> {
        let id = self
            .ctx
            .occupant(self.meta.set_name, key)
            .ok_or_else(|| {
                Error::state(
                    StateErrorKind::NotTracked,
                    self.meta.set_name,
                    format!("no tracked entry with key {key:?}"),
                )
            })?;
        self.ctx.remove_tracked(id)
    }

    /// Stop tracking the entry with this key.
    pub fn detach(&mut self, key: &[Value]) -> Result<()> {
        let id = self
            .ctx
            .occupant(self.meta.set_name, key)
            .ok_or_else(|| {
                Error::state(
                    StateErrorKind::NotTracked,
                    self.meta.set_name,
                    format!("no tracked entry with key {key:?}"),
                )
            })?;
        self.ctx.detect_changes();
        self.ctx.remove_entry(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryBackend;
    use crate::testing::{Category, Product, beverages, building_one, chai};

    fn ctx() -> Context<MemoryBackend> {
        Context::new(MemoryBackend::new())
    }

    #[test]
    fn test_add_then_find_returns_tracked_values() {
        let mut ctx = ctx();
        // A conflicting store row must not shadow the tracked entry.
        ctx.backend_mut().seed(&Product {
            id: 1,
            name: "Stale".into(),
            category_id: None,
        });
        let p = chai(None);
        ctx.add(&p).unwrap();
        let found = ctx.find::<Product>(&[Value::Int(1)]).unwrap().unwrap();
        assert_eq!(found.name, "Chai");
        assert_eq!(ctx.state_of(&p), EntityState::Added);
    }

    #[test]
    fn test_find_fetches_and_attaches() {
        let mut ctx = ctx();
        ctx.backend_mut().seed(&building_one());
        let b = ctx
            .find::<crate::testing::Building>(&[Value::Int(1)])
            .unwrap()
            .unwrap();
        assert_eq!(b.name, "Building One");
        assert_eq!(ctx.state_of(&b), EntityState::Unchanged);
        // Second find hits the identity map, not the store.
        ctx.backend_mut()
            .apply(vec![StoreOp::Delete {
                set: "Buildings".into(),
                key: vec![Value::Int(1)],
            }])
            .unwrap();
        assert!(ctx.find::<crate::testing::Building>(&[Value::Int(1)]).unwrap().is_some());
    }

    #[test]
    fn test_find_key_shape_errors_name_key_values() {
        let mut ctx = ctx();
        let err = ctx
            .find::<Product>(&[Value::Int(1), Value::Int(2)])
            .unwrap_err();
        match err {
            Error::Key(k) => {
                assert_eq!(k.kind, KeyErrorKind::WrongValueCount);
                assert!(k.message.contains("key_values"));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let err = ctx.find::<Product>(&[Value::Text("1".into())]).unwrap_err();
        match err {
            Error::Key(k) => {
                assert_eq!(k.kind, KeyErrorKind::WrongValueType);
                assert!(k.message.contains("key_values"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_attach_is_idempotent() {
        let mut ctx = ctx();
        let c = beverages();
        ctx.attach(&c).unwrap();
        ctx.attach(&c).unwrap();
        assert_eq!(ctx.state_of(&c), EntityState::Unchanged);
        let entries = ctx.tracked_entries();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].modified.is_empty());
    }

    #[test]
    fn test_attach_with_default_key_requires_added() {
        let mut ctx = ctx();
        let p = Product {
            id: 0,
            name: "New".into(),
            category_id: None,
        };
        let err = ctx.attach(&p).unwrap_err();
        match err {
            Error::Key(k) => assert_eq!(k.kind, KeyErrorKind::InvalidKeyForAttach),
            other => panic!("unexpected error: {other:?}"),
        }

        ctx.add(&p).unwrap();
        ctx.attach(&p).unwrap();
        assert_eq!(ctx.state_of(&p), EntityState::Unchanged);
    }

    #[test]
    fn test_add_transitions_deleted_back_to_added_with_reset() {
        let mut ctx = ctx();
        let p = chai(Some("Beverages"));
        ctx.attach(&p).unwrap();
        ctx.remove(&p).unwrap();
        assert_eq!(ctx.state_of(&p), EntityState::Deleted);
        ctx.add(&p).unwrap();
        assert_eq!(ctx.state_of(&p), EntityState::Added);
        // The optional FK scalar reset to its unset representation.
        let locals = ctx.local::<Product>().unwrap();
        assert_eq!(locals.len(), 1);
        assert_eq!(locals[0].category_id, None);
        assert_eq!(locals[0].name, "Chai");
    }

    #[test]
    fn test_attach_transitions_deleted_back_to_unchanged() {
        let mut ctx = ctx();
        let p = chai(Some("Beverages"));
        ctx.attach(&p).unwrap();
        ctx.remove(&p).unwrap();
        assert_eq!(ctx.state_of(&p), EntityState::Deleted);
        ctx.attach(&p).unwrap();
        assert_eq!(ctx.state_of(&p), EntityState::Unchanged);
        let entries = ctx.tracked_entries();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].modified.is_empty());
        // The pending delete is gone; nothing flushes.
        assert_eq!(ctx.save_changes().unwrap().total(), 0);
    }

    #[test]
    fn test_attach_transitions_modified_back_to_unchanged() {
        let mut ctx = ctx();
        let mut p = chai(None);
        ctx.attach(&p).unwrap();
        p.name = "Chai Latte".into();
        ctx.update(&p).unwrap();
        assert_eq!(ctx.state_of(&p), EntityState::Modified);
        ctx.attach(&p).unwrap();
        assert_eq!(ctx.state_of(&p), EntityState::Unchanged);
        assert!(ctx.entries_in(EntityState::Modified).is_empty());
        // The re-attached values are the new baseline.
        assert_eq!(ctx.local::<Product>().unwrap()[0].name, "Chai Latte");
    }

    #[test]
    fn test_add_transitions_modified_to_added() {
        let mut ctx = ctx();
        let mut p = chai(None);
        ctx.attach(&p).unwrap();
        p.name = "Chai Latte".into();
        ctx.update(&p).unwrap();
        ctx.add(&p).unwrap();
        assert_eq!(ctx.state_of(&p), EntityState::Added);
        // The original snapshot is discarded; the entry reads clean.
        assert!(ctx.tracked_entries()[0].modified.is_empty());
        assert_eq!(ctx.save_changes().unwrap().inserted, 1);
    }

    #[test]
    fn test_remove_untracked_is_not_tracked_error() {
        let mut ctx = ctx();
        let err = ctx.remove(&chai(None)).unwrap_err();
        match err {
            Error::State(s) => assert_eq!(s.kind, StateErrorKind::NotTracked),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_remove_added_detaches_immediately() {
        let mut ctx = ctx();
        let p = chai(None);
        ctx.add(&p).unwrap();
        ctx.remove(&p).unwrap();
        assert_eq!(ctx.state_of(&p), EntityState::Detached);
        assert!(ctx.tracked_entries().is_empty());
    }

    #[test]
    fn test_duplicate_key_with_incompatible_type() {
        let mut ctx = ctx();
        ctx.attach(&crate::testing::Order { id: 7 }).unwrap();

        #[derive(Debug, Clone)]
        struct RogueOrder {
            id: i32,
        }
        impl Entity for RogueOrder {
            const SET_NAME: &'static str = "Orders";
            const KEY: &'static [&'static str] = &["Id"];
            fn fields() -> &'static [FieldInfo] {
                static FIELDS: &[FieldInfo] =
                    &[FieldInfo::new("Id", tether_core::ScalarType::Int).key(true)];
                FIELDS
            }
            fn to_record(&self) -> Record {
                let mut r = Record::new();
                r.push("Id", Value::Int(self.id));
                r
            }
            fn from_record(record: &Record) -> Result<Self> {
                Ok(Self {
                    id: record.get("Id").and_then(Value::as_i64).unwrap_or_default() as i32,
                })
            }
        }

        let err = ctx.add(&RogueOrder { id: 7 }).unwrap_err();
        match err {
            Error::Key(k) => assert_eq!(k.kind, KeyErrorKind::DuplicateAddedKey),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_save_changes_flushes_and_accepts() {
        let mut ctx = ctx();
        ctx.backend_mut().seed(&beverages());
        let c = ctx.find::<Category>(&[Value::Text("Beverages".into())]).unwrap().unwrap();
        let p = chai(Some("Beverages"));
        ctx.add(&p).unwrap();

        let mut values = ctx.current_values(&c).unwrap();
        values.set("Name", Value::Text("Drinks".into())).unwrap();

        let result = ctx.save_changes().unwrap();
        assert_eq!(
            result,
            SaveResult {
                inserted: 1,
                updated: 1,
                deleted: 0
            }
        );
        assert_eq!(ctx.state_of(&p), EntityState::Unchanged);
        assert_eq!(ctx.backend().row_count("Products"), 1);
        assert_eq!(
            ctx.backend()
                .row("Categories", &[Value::Text("Beverages".into())])
                .and_then(|r| r.get("Name")),
            Some(&Value::Text("Drinks".into()))
        );
    }

    #[test]
    fn test_save_changes_validates_first() {
        let mut ctx = ctx();
        ctx.add_validator::<Product>(|input| {
            if input.values.get("Name").and_then(Value::as_str) == Some("Chai") {
                vec![PropertyError::property("Name", "Chai is discontinued")]
            } else {
                Vec::new()
            }
        });
        ctx.add(&chai(None)).unwrap();
        let err = ctx.save_changes().unwrap_err();
        assert!(err.to_string().contains("failed validation"));
        // Nothing was flushed.
        assert_eq!(ctx.backend().row_count("Products"), 0);
        assert_eq!(ctx.state_of(&chai(None)), EntityState::Added);
    }

    #[test]
    fn test_set_handles() {
        let mut ctx = ctx();
        let p = chai(None);
        ctx.set::<Product>().add(&p).unwrap();
        assert_eq!(ctx.set::<Product>().local().unwrap().len(), 1);

        let erased = ctx.set_by_name("Products").unwrap();
        assert_eq!(erased.name(), "Products");
        assert_eq!(erased.state_of(&[Value::Int(1)]), EntityState::Added);
        assert!(erased.contains(&[Value::Int(1)]));
        assert_eq!(erased.local_records().len(), 1);
        assert!(ctx.set_by_name("Nowhere").is_none());
    }

    #[test]
    fn test_store_values_snapshot_and_asymmetry() {
        let mut ctx = ctx();
        let b = building_one();
        ctx.backend_mut().seed(&b);
        ctx.attach(&b).unwrap();

        // Mutate the store behind the context's back.
        let mut row = b.to_record();
        row.set("Name", Value::Text("Renamed".into()));
        ctx.backend_mut()
            .seed_record("Buildings", &[Value::Int(1)], row);

        let snapshot = ctx.store_values(&b).unwrap().unwrap();
        assert_eq!(
            snapshot.get("Name").unwrap(),
            &Value::Text("Renamed".into())
        );
        // Current values were not disturbed.
        let current = ctx.current_values(&b).unwrap();
        assert_eq!(
            current.get("Name").unwrap(),
            &Value::Text("Building One".into())
        );
    }

    #[test]
    fn test_store_values_missing_row_is_none() {
        let mut ctx = ctx();
        let b = building_one();
        ctx.attach(&b).unwrap();
        assert!(ctx.store_values(&b).unwrap().is_none());
    }

    #[test]
    fn test_store_values_illegal_while_added() {
        let mut ctx = ctx();
        let b = building_one();
        ctx.add(&b).unwrap();
        let err = ctx.store_values(&b).unwrap_err();
        match err {
            Error::State(s) => assert_eq!(s.kind, StateErrorKind::InvalidForState),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_update_refreshes_current_values() {
        let mut ctx = ctx();
        let mut p = chai(None);
        ctx.attach(&p).unwrap();
        p.name = "Chai Latte".into();
        ctx.update(&p).unwrap();
        assert_eq!(ctx.state_of(&p), EntityState::Modified);
        let entries = ctx.entries_in(EntityState::Modified);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].modified, vec!["Name".to_string()]);
        assert_eq!(ctx.entries_of::<Product>().len(), 1);
    }

    #[test]
    fn test_set_entity_copies_scalars_from_detached_instance() {
        let mut ctx = ctx();
        let p = chai(None);
        ctx.attach(&p).unwrap();
        let detached = Product {
            id: 1,
            name: "Masala Chai".into(),
            category_id: Some("Beverages".into()),
        };
        let mut values = ctx.current_values(&p).unwrap();
        values.set_entity(&detached).unwrap();
        assert_eq!(
            values.get("Name").unwrap(),
            &Value::Text("Masala Chai".into())
        );
        drop(values);
        assert_eq!(ctx.state_of(&p), EntityState::Modified);
    }

    #[test]
    fn test_entry_summaries_serialize() {
        let mut ctx = ctx();
        ctx.add(&chai(None)).unwrap();
        let json = serde_json::to_value(ctx.tracked_entries()).unwrap();
        assert_eq!(json[0]["entity_set"], "Products");
        assert_eq!(json[0]["state"], "Added");
    }

    #[test]
    fn test_detach_forgets_without_store_ops() {
        let mut ctx = ctx();
        let p = chai(None);
        ctx.attach(&p).unwrap();
        ctx.detach(&p).unwrap();
        assert_eq!(ctx.state_of(&p), EntityState::Detached);
        assert_eq!(ctx.save_changes().unwrap().total(), 0);
    }
}
