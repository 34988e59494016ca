//! Primary-key query behind an incremental fault list.

use std::sync::Arc;

use super::metadata::{MetadataCell, QueryMetadata};
use super::select::SelectQuery;
use crate::error::Result;
use crate::map::EntityResolver;

/// Wraps a select so that it fetches primary keys only.
///
/// Only the overridden properties live here; everything else is read from
/// the wrapped query, which is never modified.
#[derive(Debug, Clone)]
pub struct IncrementalQuery {
    base: Arc<SelectQuery>,
    cache_key: Option<String>,
    originating_query: Option<String>,
    metadata: MetadataCell,
}

impl IncrementalQuery {
    /// Wrap `base`.
    pub fn new(base: Arc<SelectQuery>) -> Self {
        Self {
            base,
            cache_key: None,
            originating_query: None,
            metadata: MetadataCell::default(),
        }
    }

    /// Cache the id list under this key instead of the one derived from
    /// the wrapped query.
    pub fn with_cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }

    /// Record the user query this one serves.
    pub fn with_originating_query(mut self, description: impl Into<String>) -> Self {
        self.originating_query = Some(description.into());
        self
    }

    /// The wrapped query.
    pub fn base(&self) -> &Arc<SelectQuery> {
        &self.base
    }

    pub fn description(&self) -> String {
        format!("ids of {}", self.base.description())
    }

    /// Metadata of the wrapped query with the overrides applied.
    pub fn metadata(&self, resolver: &EntityResolver) -> Result<Arc<QueryMetadata>> {
        self.metadata.get_or_resolve(resolver, || {
            let base_md = self.base.metadata(resolver)?;
            let mut md = QueryMetadata::clone(&base_md);
            md.fetching_data_rows = true;
            md.fetching_ids_only = true;
            md.prefetch_tree = None;
            md.page_size = 0;
            // Id rows never share a cache entry with the full rows of the base.
            md.cache_key = match &self.cache_key {
                Some(key) => Some(key.clone()),
                None => md.cache_key.take().map(|key| format!("{key}/ids")),
            };
            md.originating_query = Some(
                self.originating_query
                    .clone()
                    .unwrap_or_else(|| self.base.description()),
            );
            Ok(md)
        })
    }
}
