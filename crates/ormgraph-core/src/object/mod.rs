//! Persistent objects, identities and the object graph.

mod graph;
mod id;
mod persistent;

pub use graph::ObjectGraph;
pub use id::{DataRow, ObjectId};
pub use persistent::{
    set_property, GenericObject, GenericObjectFactory, ObjectFactory, ObjectRef, Persistent,
    PersistenceState, Property,
};
