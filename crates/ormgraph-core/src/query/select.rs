//! Object and data-row selects.

use std::sync::Arc;

use ormgraph_proto::{Expression, Ordering, PrefetchSemantics, PrefetchTreeNode};
use tracing::debug;

use super::metadata::{validate_prefetch_tree, MetadataCell, QueryMetadata};
use super::{QueryCacheStrategy, QueryRoot};
use crate::error::{Error, Result};
use crate::map::EntityResolver;

/// A select over an entity or a table.
///
/// ```ignore
/// let query = SelectQuery::new("Artist")
///     .where_(Expression::path("artistName").like("P%"))
///     .order_by(Ordering::asc("artistName"))
///     .prefetch("paintingArray", PrefetchSemantics::Disjoint)?
///     .limit(10);
/// ```
#[derive(Debug, Clone)]
pub struct SelectQuery {
    root: QueryRoot,
    name: Option<String>,
    qualifier: Option<Expression>,
    orderings: Vec<Ordering>,
    prefetch: PrefetchTreeNode,
    fetch_limit: usize,
    fetch_offset: usize,
    page_size: usize,
    distinct: bool,
    fetching_data_rows: bool,
    cache_strategy: QueryCacheStrategy,
    cache_key: Option<String>,
    cache_groups: Vec<String>,
    extra_columns: Vec<String>,
    metadata: MetadataCell,
}

impl SelectQuery {
    /// Select objects of an entity.
    pub fn new(entity: impl Into<String>) -> Self {
        Self::with_root(QueryRoot::Entity(entity.into()))
    }

    /// Select objects of the entity mapped to a class name.
    pub fn for_class(class_name: impl Into<String>) -> Self {
        Self::with_root(QueryRoot::Class(class_name.into()))
    }

    /// Select objects of the entity registered for `T`.
    pub fn for_type<T: 'static>() -> Self {
        Self::with_root(QueryRoot::of_type::<T>())
    }

    /// Select data rows of a table.
    pub fn for_db_entity(table: impl Into<String>) -> Self {
        let mut query = Self::with_root(QueryRoot::DbEntity(table.into()));
        query.fetching_data_rows = true;
        query
    }

    /// Select from an arbitrary root.
    pub fn with_root(root: QueryRoot) -> Self {
        Self {
            root,
            name: None,
            qualifier: None,
            orderings: Vec::new(),
            prefetch: PrefetchTreeNode::root(),
            fetch_limit: 0,
            fetch_offset: 0,
            page_size: 0,
            distinct: false,
            fetching_data_rows: false,
            cache_strategy: QueryCacheStrategy::NoCache,
            cache_key: None,
            cache_groups: Vec::new(),
            extra_columns: Vec::new(),
            metadata: MetadataCell::default(),
        }
    }

    /// Name used in logs and errors.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self.changed()
    }

    /// Set the qualifier, replacing any previous one.
    pub fn where_(mut self, qualifier: Expression) -> Self {
        self.qualifier = Some(qualifier);
        self.changed()
    }

    /// AND a condition onto the qualifier.
    pub fn and_where(mut self, condition: Expression) -> Self {
        self.qualifier = Expression::join_and(self.qualifier.take(), Some(condition));
        self.changed()
    }

    /// Append an ordering.
    pub fn order_by(mut self, ordering: Ordering) -> Self {
        self.orderings.push(ordering);
        self.changed()
    }

    /// Prefetch a relationship path.
    pub fn prefetch(mut self, path: &str, semantics: PrefetchSemantics) -> Result<Self> {
        self.prefetch.add_prefetch(path, semantics)?;
        Ok(self.changed())
    }

    /// Merge a whole prefetch tree.
    pub fn with_prefetch_tree(mut self, tree: &PrefetchTreeNode) -> Result<Self> {
        self.prefetch.merge(tree)?;
        Ok(self.changed())
    }

    /// Maximum number of results.
    pub fn limit(mut self, limit: usize) -> Self {
        self.fetch_limit = limit;
        self.changed()
    }

    /// Number of leading results to skip.
    pub fn offset(mut self, offset: usize) -> Self {
        self.fetch_offset = offset;
        self.changed()
    }

    /// Resolve results lazily in pages of this size.
    pub fn page_size(mut self, size: usize) -> Self {
        self.page_size = size;
        self.changed()
    }

    /// Remove duplicate rows.
    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self.changed()
    }

    /// Return data rows instead of objects.
    pub fn data_rows(mut self) -> Self {
        self.fetching_data_rows = true;
        self.changed()
    }

    /// Cache results in the executing context.
    pub fn local_cache(mut self) -> Self {
        self.cache_strategy = QueryCacheStrategy::LocalCache;
        self.changed()
    }

    /// Cache results in the runtime.
    pub fn shared_cache(mut self) -> Self {
        self.cache_strategy = QueryCacheStrategy::SharedCache;
        self.changed()
    }

    /// Set the caching policy.
    pub fn cache_strategy(mut self, strategy: QueryCacheStrategy) -> Self {
        self.cache_strategy = strategy;
        self.changed()
    }

    /// Explicit cache key; otherwise one is derived from the query.
    pub fn cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self.changed()
    }

    /// Add a cache group.
    pub fn cache_group(mut self, group: impl Into<String>) -> Self {
        self.cache_groups.push(group.into());
        self.changed()
    }

    /// Select an additional root-table column not mapped by the entity.
    pub(crate) fn with_extra_column(mut self, column: impl Into<String>) -> Self {
        let column = column.into();
        if !self.extra_columns.contains(&column) {
            self.extra_columns.push(column);
        }
        self.changed()
    }

    /// Builders drop metadata resolved before the change.
    fn changed(mut self) -> Self {
        self.metadata = MetadataCell::default();
        self
    }

    pub fn root(&self) -> &QueryRoot {
        &self.root
    }

    pub fn qualifier(&self) -> Option<&Expression> {
        self.qualifier.as_ref()
    }

    pub fn orderings(&self) -> &[Ordering] {
        &self.orderings
    }

    pub fn prefetch_tree(&self) -> &PrefetchTreeNode {
        &self.prefetch
    }

    pub fn fetch_limit(&self) -> usize {
        self.fetch_limit
    }

    pub fn fetch_offset(&self) -> usize {
        self.fetch_offset
    }

    pub fn is_distinct(&self) -> bool {
        self.distinct
    }

    pub fn is_fetching_data_rows(&self) -> bool {
        self.fetching_data_rows
    }

    pub(crate) fn extra_columns(&self) -> &[String] {
        &self.extra_columns
    }

    /// Short description used in error context and logs.
    pub fn description(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => match &self.qualifier {
                Some(q) => format!("select {} where {}", self.root, q),
                None => format!("select {}", self.root),
            },
        }
    }

    /// Resolved metadata, computed once per resolver generation.
    pub fn metadata(&self, resolver: &EntityResolver) -> Result<Arc<QueryMetadata>> {
        self.metadata.get_or_resolve(resolver, || self.resolve_metadata(resolver))
    }

    fn resolve_metadata(&self, resolver: &EntityResolver) -> Result<QueryMetadata> {
        let descriptor = self.root.resolve(resolver)?;
        let mut md = QueryMetadata::new(resolver, descriptor.clone());
        if let QueryRoot::DbEntity(table) = &self.root {
            md.db_entity = Some(table.clone());
        }

        md.fetching_data_rows = self.fetching_data_rows || descriptor.is_none();
        md.fetch_limit = self.fetch_limit;
        md.fetch_offset = self.fetch_offset;
        md.page_size = self.page_size;
        md.cache_strategy = self.cache_strategy;
        md.cache_groups = self.cache_groups.clone();

        if self.prefetch.has_children() {
            match &descriptor {
                Some(d) if !md.fetching_data_rows => {
                    validate_prefetch_tree(resolver, d, &self.prefetch)?;
                    md.prefetch_tree = Some(self.prefetch.clone());
                }
                Some(_) => debug!(query = %self.description(), "prefetches ignored for a data row query"),
                None => {
                    return Err(Error::Unsupported(format!(
                        "prefetching from table root {}",
                        self.root
                    )))
                }
            }
        }

        if self.cache_strategy.is_cached() {
            md.cache_key = Some(match &self.cache_key {
                Some(key) => key.clone(),
                None => self.derived_cache_key(),
            });
        }
        Ok(md)
    }

    /// Content-derived key: root name plus a hash of everything that shapes
    /// the result.
    fn derived_cache_key(&self) -> String {
        let mut canonical = format!("{}|", self.root);
        if let Some(q) = &self.qualifier {
            canonical.push_str(&q.to_string());
        }
        canonical.push('|');
        for ordering in &self.orderings {
            canonical.push_str(&ordering.to_string());
            canonical.push(',');
        }
        let mut prefetches: Vec<String> = self
            .prefetch
            .non_phantom_nodes()
            .into_iter()
            .map(|(path, node)| format!("{path}:{:?}", node.semantics()))
            .collect();
        prefetches.sort();
        canonical.push_str(&format!(
            "|{}|{}|{}|{}|{}|{}",
            prefetches.join(","),
            self.fetch_limit,
            self.fetch_offset,
            self.distinct,
            self.fetching_data_rows,
            self.extra_columns.join(",")
        ));

        let digest = blake3::hash(canonical.as_bytes());
        format!("{}/{}", self.root, hex::encode(&digest.as_bytes()[..16]))
    }
}
