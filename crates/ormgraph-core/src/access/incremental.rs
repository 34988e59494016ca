//! Paged object lists resolved on access.

use std::sync::Arc;

use ormgraph_proto::Value;
use tracing::debug;

use super::connection::Connection;
use super::context::DataContext;
use super::prefetch::key_qualifier;
use crate::error::Result;
use crate::object::{ObjectId, ObjectRef};
use crate::query::SelectQuery;

/// Result of a select fetched as primary keys first.
///
/// Objects are resolved one page at a time, through a query matching the
/// page's keys. The first page is resolved when the list is created.
#[derive(Debug)]
pub struct IncrementalFaultList {
    query: Arc<SelectQuery>,
    ids: Vec<ObjectId>,
    objects: Vec<Option<ObjectRef>>,
    page_size: usize,
}

impl IncrementalFaultList {
    pub(crate) fn new(query: Arc<SelectQuery>, ids: Vec<ObjectId>, page_size: usize) -> Self {
        Self {
            objects: vec![None; ids.len()],
            query,
            ids,
            page_size: page_size.max(1),
        }
    }

    /// Number of results, resolved or not.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn page_count(&self) -> usize {
        self.ids.len().div_ceil(self.page_size)
    }

    /// The query this list was built from.
    pub fn query(&self) -> &SelectQuery {
        &self.query
    }

    /// Identities of all results, in result order.
    pub fn ids(&self) -> &[ObjectId] {
        &self.ids
    }

    pub fn is_resolved(&self, index: usize) -> bool {
        self.objects.get(index).is_some_and(Option::is_some)
    }

    pub fn resolved_count(&self) -> usize {
        self.objects.iter().filter(|o| o.is_some()).count()
    }

    /// Object at `index`, resolving its page first if needed. `None` past
    /// the end, or when the row was deleted since the keys were read.
    pub fn get<C: Connection>(&mut self, index: usize, context: &mut DataContext<C>) -> Result<Option<ObjectRef>> {
        if index >= self.ids.len() {
            return Ok(None);
        }
        if !self.is_resolved(index) {
            self.resolve_page(index / self.page_size, context)?;
        }
        Ok(self.objects[index].clone())
    }

    /// Resolve every unresolved object of page `page`.
    pub fn resolve_page<C: Connection>(&mut self, page: usize, context: &mut DataContext<C>) -> Result<()> {
        let start = page * self.page_size;
        if start >= self.ids.len() {
            return Ok(());
        }
        let end = (start + self.page_size).min(self.ids.len());

        let mut missing = Vec::new();
        for index in start..end {
            if self.objects[index].is_some() {
                continue;
            }
            match context.graph().get(&self.ids[index]) {
                Some(object) => self.objects[index] = Some(object),
                None => missing.push(index),
            }
        }
        if missing.is_empty() {
            return Ok(());
        }

        let columns: Vec<String> = self.ids[missing[0]].key().keys().cloned().collect();
        let keys: Vec<Vec<Value>> = missing
            .iter()
            .map(|&i| self.ids[i].key().values().cloned().collect())
            .collect();
        let max_keys = context.runtime().adapter().capabilities().max_id_qualifier_size;
        let chunk = if max_keys == 0 { keys.len() } else { max_keys };
        for (n, chunk) in keys.chunks(chunk).enumerate() {
            let page_query = SelectQuery::with_root(self.query.root().clone())
                .named(format!("page {page}.{n} of {}", self.query.description()))
                .with_prefetch_tree(self.query.prefetch_tree())?
                .where_(key_qualifier(&columns, chunk));
            context.select(&page_query)?;
        }

        for index in missing {
            self.objects[index] = context.graph().get(&self.ids[index]);
        }
        debug!(
            query = %self.query.description(),
            page,
            resolved = self.resolved_count(),
            total = self.ids.len(),
            "resolved page"
        );
        Ok(())
    }

    /// Resolve all pages and return every object still present.
    pub fn resolve_all<C: Connection>(&mut self, context: &mut DataContext<C>) -> Result<Vec<ObjectRef>> {
        for page in 0..self.page_count() {
            self.resolve_page(page, context)?;
        }
        Ok(self.objects.iter().flatten().cloned().collect())
    }
}
