//! ORMGraph Core - object-relational mapping over SQL databases.
//!
//! This crate maps persistent entities onto tables and turns queries over
//! those entities into SQL. Results are read back as typed data rows and
//! merged into an identity-mapped object graph, with relationships either
//! prefetched or left as faults. Changes to the graph are committed as
//! ordered batches of inserts, updates and deletes.
//!
//! Drivers plug in through [`access::Connection`]; see the `ormgraph-sqlite`
//! crate for SQLite.

pub mod access;
pub mod config;
pub mod error;
pub mod map;
pub mod object;
pub mod query;
pub mod translator;
pub mod types;

#[cfg(test)]
mod fixtures;

pub use access::{
    CommitReport, Connection, DataContext, IncrementalFaultList, LifecycleListener, QueryResponse, Runtime,
};
pub use config::{AdapterCapabilities, RuntimeConfig};
pub use error::{DriverError, Error, ErrorKind, Result};
pub use map::{ClassDescriptor, DataMap, EntityResolver};
pub use object::{DataRow, ObjectGraph, ObjectId, ObjectRef, Persistent, PersistenceState, Property};
pub use query::{
    BatchQuery, IncrementalQuery, ProcedureQuery, Query, QueryCacheStrategy, QueryRoot, RefreshQuery, SelectQuery,
    SqlTemplate,
};
pub use translator::{translate, SqlAction, SqlAdapter};

/// Re-export protocol types.
pub use ormgraph_proto as proto;
