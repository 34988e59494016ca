//! Query metadata: a query resolved against one entity resolver.

use std::fmt;
use std::sync::Arc;

use ormgraph_proto::{path_segments, PrefetchTreeNode};
use parking_lot::Mutex;
use tracing::trace;

use super::QueryCacheStrategy;
use crate::error::{Error, Result};
use crate::map::{ClassDescriptor, EntityResolver, ObjEntity};

/// Read-only view binding a query to a resolver.
#[derive(Debug, Clone)]
pub struct QueryMetadata {
    pub(crate) resolver_id: u64,
    pub(crate) generation: u64,
    pub(crate) descriptor: Option<Arc<ClassDescriptor>>,
    pub(crate) db_entity: Option<String>,
    pub(crate) fetching_data_rows: bool,
    pub(crate) fetching_ids_only: bool,
    pub(crate) cache_strategy: QueryCacheStrategy,
    pub(crate) cache_key: Option<String>,
    pub(crate) cache_groups: Vec<String>,
    pub(crate) prefetch_tree: Option<PrefetchTreeNode>,
    pub(crate) page_size: usize,
    pub(crate) fetch_limit: usize,
    pub(crate) fetch_offset: usize,
    pub(crate) originating_query: Option<String>,
}

impl QueryMetadata {
    pub(crate) fn new(resolver: &EntityResolver, descriptor: Option<Arc<ClassDescriptor>>) -> Self {
        Self {
            resolver_id: resolver.id(),
            generation: resolver.generation(),
            db_entity: descriptor.as_ref().map(|d| d.db_entity_name().to_string()),
            fetching_data_rows: descriptor.is_none(),
            descriptor,
            fetching_ids_only: false,
            cache_strategy: QueryCacheStrategy::NoCache,
            cache_key: None,
            cache_groups: Vec::new(),
            prefetch_tree: None,
            page_size: 0,
            fetch_limit: 0,
            fetch_offset: 0,
            originating_query: None,
        }
    }

    /// Whether this metadata was resolved by the resolver in its current state.
    pub fn is_current_for(&self, resolver: &EntityResolver) -> bool {
        self.resolver_id == resolver.id() && self.generation == resolver.generation()
    }

    /// Root entity, absent for table and template queries without a root.
    pub fn obj_entity(&self) -> Option<&ObjEntity> {
        self.descriptor.as_deref().map(|d| d.entity())
    }

    /// Resolved mapping of the root entity.
    pub fn class_descriptor(&self) -> Option<&Arc<ClassDescriptor>> {
        self.descriptor.as_ref()
    }

    /// Root table.
    pub fn db_entity_name(&self) -> Option<&str> {
        self.db_entity.as_deref()
    }

    /// Whether results are data rows rather than objects.
    pub fn is_fetching_data_rows(&self) -> bool {
        self.fetching_data_rows
    }

    /// Whether only primary key columns are selected.
    pub fn is_fetching_ids_only(&self) -> bool {
        self.fetching_ids_only
    }

    /// Caching policy.
    pub fn cache_strategy(&self) -> QueryCacheStrategy {
        self.cache_strategy
    }

    /// Key of the cached result.
    pub fn cache_key(&self) -> Option<&str> {
        self.cache_key.as_deref()
    }

    /// Cache groups the result belongs to.
    pub fn cache_groups(&self) -> &[String] {
        &self.cache_groups
    }

    /// Prefetch tree, `None` when nothing is prefetched.
    pub fn prefetch_tree(&self) -> Option<&PrefetchTreeNode> {
        self.prefetch_tree.as_ref()
    }

    /// Page size for incremental results, 0 for none.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Maximum number of results, 0 for unlimited.
    pub fn fetch_limit(&self) -> usize {
        self.fetch_limit
    }

    /// Number of leading results to skip.
    pub fn fetch_offset(&self) -> usize {
        self.fetch_offset
    }

    /// Description of the user query this one was derived from.
    pub fn originating_query(&self) -> Option<&str> {
        self.originating_query.as_deref()
    }
}

/// Check that every prefetch path walks relationships of the root entity.
pub(crate) fn validate_prefetch_tree(
    resolver: &EntityResolver,
    descriptor: &ClassDescriptor,
    tree: &PrefetchTreeNode,
) -> Result<()> {
    let snapshot = resolver.snapshot()?;
    for (path, _) in tree.non_phantom_nodes() {
        let mut current = snapshot.class_descriptor(descriptor.entity_name())?;
        for segment in path_segments(&path) {
            let relationship = current.relationship(segment.name).ok_or_else(|| Error::UnknownRelationship {
                entity: current.entity_name().to_string(),
                name: segment.name.to_string(),
            })?;
            let target = relationship.target.clone();
            current = snapshot.class_descriptor(&target)?;
        }
    }
    Ok(())
}

/// Metadata memoized per resolver; a clone of the owning query starts empty
/// and builders reset it.
#[derive(Default)]
pub(crate) struct MetadataCell(Mutex<Option<Arc<QueryMetadata>>>);

impl MetadataCell {
    /// Forget the memoized metadata after the owning query changed.
    pub(crate) fn reset(&mut self) {
        *self.0.get_mut() = None;
    }

    pub(crate) fn get_or_resolve(
        &self,
        resolver: &EntityResolver,
        resolve: impl FnOnce() -> Result<QueryMetadata>,
    ) -> Result<Arc<QueryMetadata>> {
        let mut slot = self.0.lock();
        if let Some(cached) = slot.as_ref() {
            if cached.is_current_for(resolver) {
                trace!(resolver = resolver.id(), "query metadata reused");
                return Ok(cached.clone());
            }
        }
        let resolved = Arc::new(resolve()?);
        *slot = Some(resolved.clone());
        Ok(resolved)
    }
}

impl Clone for MetadataCell {
    fn clone(&self) -> Self {
        Self::default()
    }
}

impl fmt::Debug for MetadataCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MetadataCell")
    }
}
