//! Refreshing registered objects and cached results.

use std::sync::Arc;

use super::metadata::QueryMetadata;
use super::select::SelectQuery;
use crate::error::Result;
use crate::map::EntityResolver;
use crate::object::{ObjectId, ObjectRef};

/// What a [`RefreshQuery`] brings back in sync with the database.
#[derive(Debug, Clone)]
pub enum RefreshTarget {
    /// Every registered object and every cached result.
    All,
    /// Registered objects by identity.
    Objects(Vec<ObjectId>),
    /// Cached results of a select.
    Query(Box<SelectQuery>),
    /// Cached results in these cache groups.
    Groups(Vec<String>),
}

/// Drops stale state so that later access reads the database again.
///
/// Objects are re-read by primary key and keep their identity; to-many
/// relationships revert to faults. Locally changed objects are left as
/// they are. Cached results are dropped from both the context's and the
/// runtime's cache.
#[derive(Debug, Clone)]
pub struct RefreshQuery {
    target: RefreshTarget,
}

impl RefreshQuery {
    /// Refresh everything.
    pub fn all() -> Self {
        Self { target: RefreshTarget::All }
    }

    /// Refresh these objects. Objects without an identity are skipped.
    pub fn objects<'a>(objects: impl IntoIterator<Item = &'a ObjectRef>) -> Self {
        let ids = objects
            .into_iter()
            .filter_map(|o| o.read().object_id().cloned())
            .collect();
        Self {
            target: RefreshTarget::Objects(ids),
        }
    }

    /// Drop the cached results of `query`.
    pub fn query(query: SelectQuery) -> Self {
        Self {
            target: RefreshTarget::Query(Box::new(query)),
        }
    }

    /// Drop cached results in the given groups.
    pub fn groups<I, S>(groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            target: RefreshTarget::Groups(groups.into_iter().map(Into::into).collect()),
        }
    }

    pub fn target(&self) -> &RefreshTarget {
        &self.target
    }

    pub fn description(&self) -> String {
        match &self.target {
            RefreshTarget::All => "refresh all".to_string(),
            RefreshTarget::Objects(ids) => format!("refresh {} objects", ids.len()),
            RefreshTarget::Query(query) => format!("refresh {}", query.description()),
            RefreshTarget::Groups(groups) => format!("refresh groups {}", groups.join(", ")),
        }
    }

    /// Metadata of the refreshed select, or empty metadata.
    pub fn metadata(&self, resolver: &EntityResolver) -> Result<Arc<QueryMetadata>> {
        match &self.target {
            RefreshTarget::Query(query) => query.metadata(resolver),
            _ => Ok(Arc::new(QueryMetadata::new(resolver, None))),
        }
    }
}
