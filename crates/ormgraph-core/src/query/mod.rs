//! Query types and their resolved metadata.
//!
//! Queries are built by the caller and not mutated afterwards. Each kind
//! resolves against an [`EntityResolver`] into a [`QueryMetadata`] snapshot
//! which the translator and the access layer consume.

pub mod batch;
pub mod cache;
pub mod incremental;
pub mod metadata;
pub mod procedure;
pub mod refresh;
pub mod select;
pub mod template;

use std::any::{type_name, TypeId};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::map::{ClassDescriptor, EntityResolver};

pub use batch::{BatchQuery, BatchQueryKind, BatchQueryRow, DeleteBatchQuery, InsertBatchQuery, UpdateBatchQuery};
pub use cache::{CacheStats, QueryCache};
pub use incremental::IncrementalQuery;
pub use metadata::QueryMetadata;
pub use procedure::ProcedureQuery;
pub use refresh::{RefreshQuery, RefreshTarget};
pub use select::SelectQuery;
pub use template::SqlTemplate;

/// What a query selects from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryRoot {
    /// Persistent entity by name.
    Entity(String),
    /// Persistent entity by class name.
    Class(String),
    /// Persistent entity registered for a Rust type.
    Type { id: TypeId, name: &'static str },
    /// Raw table; always fetches data rows.
    DbEntity(String),
}

impl QueryRoot {
    /// Root for the entity registered for `T`.
    pub fn of_type<T: 'static>() -> Self {
        QueryRoot::Type {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }

    /// Descriptor of the root entity, `None` for table roots.
    pub fn resolve(&self, resolver: &EntityResolver) -> Result<Option<Arc<ClassDescriptor>>> {
        let snapshot = resolver.snapshot()?;
        let name = match self {
            QueryRoot::Entity(name) => name.clone(),
            QueryRoot::Class(class) => snapshot.obj_entity_for_class(class)?.name.clone(),
            QueryRoot::Type { id, name } => {
                resolver
                    .entity_name_for_type_id(*id)
                    .ok_or_else(|| Error::UnknownType {
                        type_name: (*name).to_string(),
                    })?
            }
            QueryRoot::DbEntity(table) => {
                snapshot.db_entity(table)?;
                return Ok(None);
            }
        };
        snapshot.class_descriptor(&name).map(Some)
    }
}

impl fmt::Display for QueryRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryRoot::Entity(name) => f.write_str(name),
            QueryRoot::Class(class) => write!(f, "class {class}"),
            QueryRoot::Type { name, .. } => write!(f, "type {name}"),
            QueryRoot::DbEntity(table) => write!(f, "db:{table}"),
        }
    }
}

/// Result caching policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum QueryCacheStrategy {
    /// Always run the query.
    #[default]
    NoCache,
    /// Cache objects in the executing context.
    LocalCache,
    /// Run the query and replace the context's cached result.
    LocalCacheRefresh,
    /// Cache data rows in the runtime, shared by all contexts.
    SharedCache,
    /// Run the query and replace the runtime's cached result.
    SharedCacheRefresh,
}

impl QueryCacheStrategy {
    /// Whether results are stored at all.
    pub fn is_cached(&self) -> bool {
        !matches!(self, QueryCacheStrategy::NoCache)
    }

    /// Whether results are kept per context.
    pub fn is_local(&self) -> bool {
        matches!(self, QueryCacheStrategy::LocalCache | QueryCacheStrategy::LocalCacheRefresh)
    }

    /// Whether a cached result may be returned without running the query.
    pub fn reads_cache(&self) -> bool {
        matches!(self, QueryCacheStrategy::LocalCache | QueryCacheStrategy::SharedCache)
    }
}

/// Any query the access layer can run.
#[derive(Debug, Clone)]
pub enum Query {
    Select(SelectQuery),
    Incremental(IncrementalQuery),
    Template(SqlTemplate),
    Procedure(ProcedureQuery),
    Batch(BatchQuery),
    Refresh(RefreshQuery),
}

impl Query {
    /// Resolved metadata of the query.
    pub fn metadata(&self, resolver: &EntityResolver) -> Result<Arc<QueryMetadata>> {
        match self {
            Query::Select(q) => q.metadata(resolver),
            Query::Incremental(q) => q.metadata(resolver),
            Query::Template(q) => q.metadata(resolver),
            Query::Procedure(q) => q.metadata(resolver),
            Query::Batch(q) => q.metadata(resolver),
            Query::Refresh(q) => q.metadata(resolver),
        }
    }

    /// Short description used in error context and logs.
    pub fn description(&self) -> String {
        match self {
            Query::Select(q) => q.description(),
            Query::Incremental(q) => q.description(),
            Query::Template(q) => q.description(),
            Query::Procedure(q) => q.description(),
            Query::Batch(q) => q.description(),
            Query::Refresh(q) => q.description(),
        }
    }
}

impl From<SelectQuery> for Query {
    fn from(q: SelectQuery) -> Self {
        Query::Select(q)
    }
}

impl From<IncrementalQuery> for Query {
    fn from(q: IncrementalQuery) -> Self {
        Query::Incremental(q)
    }
}

impl From<RefreshQuery> for Query {
    fn from(q: RefreshQuery) -> Self {
        Query::Refresh(q)
    }
}

impl From<SqlTemplate> for Query {
    fn from(q: SqlTemplate) -> Self {
        Query::Template(q)
    }
}

impl From<ProcedureQuery> for Query {
    fn from(q: ProcedureQuery) -> Self {
        Query::Procedure(q)
    }
}

impl From<BatchQuery> for Query {
    fn from(q: BatchQuery) -> Self {
        Query::Batch(q)
    }
}

impl From<InsertBatchQuery> for Query {
    fn from(q: InsertBatchQuery) -> Self {
        Query::Batch(BatchQuery::Insert(q))
    }
}

impl From<UpdateBatchQuery> for Query {
    fn from(q: UpdateBatchQuery) -> Self {
        Query::Batch(BatchQuery::Update(q))
    }
}

impl From<DeleteBatchQuery> for Query {
    fn from(q: DeleteBatchQuery) -> Self {
        Query::Batch(BatchQuery::Delete(q))
    }
}
