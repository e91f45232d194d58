//! Explicit entity graphs for multi-entity attach and add.
//!
//! A graph names its nodes and its navigation links up front; the context
//! resolves each node's state independently and uses the links (plus FK
//! scalar matching) for relationship fixup. Nothing is discovered by walking
//! object references.

use std::any::TypeId;
use tether_core::{AnyEntity, Entity, FieldInfo, Record, RelationshipInfo, Value};

/// Handle to a node within one [`EntityGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeId(pub(crate) usize);

#[derive(Debug)]
pub(crate) struct GraphNode {
    pub(crate) type_id: TypeId,
    pub(crate) type_name: &'static str,
    pub(crate) set_name: &'static str,
    pub(crate) key_columns: &'static [&'static str],
    pub(crate) discriminator: Option<&'static str>,
    pub(crate) fields: &'static [FieldInfo],
    pub(crate) relationships: &'static [RelationshipInfo],
    pub(crate) record: Record,
    pub(crate) key: Vec<Value>,
    pub(crate) default_key: bool,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct GraphLink {
    pub(crate) from: NodeId,
    pub(crate) navigation: &'static str,
    pub(crate) to: NodeId,
}

/// A set of entities and the navigation links between them, handed to
/// `Context::attach_graph` or `Context::add_graph` as one unit.
#[derive(Debug, Default)]
pub struct EntityGraph {
    pub(crate) nodes: Vec<GraphNode>,
    pub(crate) links: Vec<GraphLink>,
}

impl EntityGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entity as a graph node, capturing its values at call time.
    pub fn node<E: Entity>(&mut self, entity: &E) -> NodeId {
        self.node_any(entity)
    }

    /// Type-erased [`EntityGraph::node`], for callers holding
    /// `dyn AnyEntity`.
    pub fn node_any(&mut self, entity: &dyn AnyEntity) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(GraphNode {
            type_id: entity.entity_type_id(),
            type_name: entity.type_name(),
            set_name: entity.set_name(),
            key_columns: entity.key_columns(),
            discriminator: entity.discriminator(),
            fields: entity.entity_fields(),
            relationships: entity.entity_relationships(),
            record: entity.record(),
            key: entity.key(),
            default_key: entity.default_key(),
        });
        id
    }

    /// Link two nodes through a navigation declared on `from`'s type.
    ///
    /// Either side may declare the navigation: `link(product, "Category",
    /// category)` and `link(category, "Products", product)` describe the
    /// same edge.
    pub fn link(&mut self, from: NodeId, navigation: &'static str, to: NodeId) {
        self.links.push(GraphLink {
            from,
            navigation,
            to,
        });
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::{Result, ScalarType};

    #[derive(Debug, Clone)]
    struct Shelf {
        id: i32,
    }

    impl Entity for Shelf {
        const SET_NAME: &'static str = "Shelves";
        const KEY: &'static [&'static str] = &["Id"];

        fn fields() -> &'static [FieldInfo] {
            static FIELDS: &[FieldInfo] = &[FieldInfo::new("Id", ScalarType::Int).key(true)];
            FIELDS
        }

        fn to_record(&self) -> Record {
            let mut r = Record::new();
            r.push("Id", Value::Int(self.id));
            r
        }

        fn from_record(record: &Record) -> Result<Self> {
            Ok(Self {
                id: record
                    .get("Id")
                    .and_then(Value::as_i64)
                    .unwrap_or_default() as i32,
            })
        }
    }

    #[test]
    fn test_nodes_capture_values_at_call_time() {
        let mut shelf = Shelf { id: 3 };
        let mut graph = EntityGraph::new();
        let node = graph.node(&shelf);
        shelf.id = 9;
        assert_eq!(graph.nodes[node.0].key, vec![Value::Int(3)]);
        assert!(!graph.nodes[node.0].default_key);
    }

    #[test]
    fn test_links_are_recorded() {
        let mut graph = EntityGraph::new();
        let a = graph.node(&Shelf { id: 1 });
        let b = graph.node(&Shelf { id: 2 });
        graph.link(a, "Neighbor", b);
        assert_eq!(graph.len(), 2);
        assert_eq!(graph.links.len(), 1);
        assert_eq!(graph.links[0].navigation, "Neighbor");
    }
}
