//! The Tether change-tracking engine.
//!
//! A [`Context`] tracks entities through the Detached, Unchanged, Added,
//! Modified, and Deleted lifecycle over a pluggable [`Backend`]. Tracked
//! state is record-authoritative: each entry holds flattened current and
//! original records, and typed instances are materialized on demand.
//! Relationships live as engine-owned edges derived from FK scalars and
//! explicit [`EntityGraph`] links, never from object references.
//!
//! ```
//! use tether_track::{Context, MemoryBackend};
//! # use tether_core::{Entity, FieldInfo, Record, Result, ScalarType, Value};
//! # #[derive(Debug, Clone)]
//! # struct Office { id: i32, name: String }
//! # impl Entity for Office {
//! #     const SET_NAME: &'static str = "Offices";
//! #     const KEY: &'static [&'static str] = &["Id"];
//! #     fn fields() -> &'static [FieldInfo] {
//! #         static FIELDS: &[FieldInfo] = &[
//! #             FieldInfo::new("Id", ScalarType::Int).key(true),
//! #             FieldInfo::new("Name", ScalarType::Text),
//! #         ];
//! #         FIELDS
//! #     }
//! #     fn to_record(&self) -> Record {
//! #         let mut r = Record::new();
//! #         r.push("Id", Value::Int(self.id));
//! #         r.push("Name", Value::Text(self.name.clone()));
//! #         r
//! #     }
//! #     fn from_record(record: &Record) -> Result<Self> {
//! #         Ok(Self {
//! #             id: record.get("Id").and_then(Value::as_i64).unwrap_or_default() as i32,
//! #             name: record.get("Name").and_then(Value::as_str).unwrap_or_default().into(),
//! #         })
//! #     }
//! # }
//! # fn main() -> tether_core::Result<()> {
//! let mut ctx = Context::new(MemoryBackend::new());
//! let office = Office { id: 1, name: "HQ".into() };
//! ctx.add(&office)?;
//! let saved = ctx.save_changes()?;
//! assert_eq!(saved.inserted, 1);
//! # Ok(())
//! # }
//! ```

pub mod context;
pub mod detect;
pub mod entry;
pub mod fixup;
pub mod graph;
pub mod state;
pub mod store;
pub mod values;

mod identity_map;
#[cfg(test)]
mod testing;

pub use context::{AnySet, Context, ContextConfig, SaveResult, Set, ValidationInput};
pub use entry::EntityEntry;
pub use graph::{EntityGraph, NodeId};
pub use state::EntityState;
pub use store::{Backend, MemoryBackend, StoreOp};
pub use values::{CurrentValues, OriginalValues, PropertyValues};
