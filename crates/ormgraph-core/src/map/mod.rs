//! Mapping metadata.
//!
//! A [`DataMap`] describes tables and persistent entities. The
//! [`EntityResolver`] validates it once and serves lookups by entity name,
//! class name or Rust type; [`ClassDescriptor`]s flatten an entity's
//! inheritance chain for translation and materialization.

pub mod data_map;
pub mod db;
pub mod descriptor;
pub mod inheritance;
pub mod obj;
pub mod procedure;
pub mod resolver;

pub use data_map::DataMap;
pub use db::{DbAttribute, DbEntity, DbJoin, DbRelationship};
pub use descriptor::{AttributeDescriptor, ClassDescriptor, RelationshipDescriptor};
pub use inheritance::EntityInheritanceTree;
pub use obj::{Discriminator, ObjAttribute, ObjEntity, ObjRelationship};
pub use procedure::{ParameterDirection, Procedure, ProcedureParameter};
pub use resolver::{EntityResolver, MappingSnapshot};
