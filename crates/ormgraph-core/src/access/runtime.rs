//! Runtime shared by data contexts.

use std::sync::Arc;

use tracing::info;

use super::connection::Connection;
use super::context::DataContext;
use super::listener::{LifecycleListener, NoopListener};
use super::reader::ReadRow;
use crate::config::RuntimeConfig;
use crate::map::EntityResolver;
use crate::query::QueryCache;
use crate::translator::SqlAdapter;

/// Mapping, adapter and shared cache behind any number of contexts.
pub struct Runtime {
    resolver: Arc<EntityResolver>,
    config: RuntimeConfig,
    adapter: SqlAdapter,
    shared_cache: QueryCache<Arc<Vec<ReadRow>>>,
    listener: Arc<dyn LifecycleListener>,
}

impl Runtime {
    /// Create a runtime over an initialized resolver.
    pub fn new(resolver: Arc<EntityResolver>, config: RuntimeConfig) -> Self {
        let adapter = SqlAdapter::new(config.adapter.clone());
        info!(
            adapter = adapter.name(),
            cache_capacity = config.query_cache_capacity,
            "runtime created"
        );
        Self {
            resolver,
            shared_cache: QueryCache::new(config.query_cache_capacity),
            adapter,
            config,
            listener: Arc::new(NoopListener),
        }
    }

    /// Replace the adapter, e.g. to register extra value types.
    pub fn with_adapter(mut self, adapter: SqlAdapter) -> Self {
        self.adapter = adapter;
        self
    }

    /// Notify `listener` of fetches and commits.
    pub fn with_listener(mut self, listener: Arc<dyn LifecycleListener>) -> Self {
        self.listener = listener;
        self
    }

    pub fn resolver(&self) -> &Arc<EntityResolver> {
        &self.resolver
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn adapter(&self) -> &SqlAdapter {
        &self.adapter
    }

    /// Rows cached across contexts, joint prefetch rows included.
    pub fn shared_cache(&self) -> &QueryCache<Arc<Vec<ReadRow>>> {
        &self.shared_cache
    }

    pub fn listener(&self) -> &Arc<dyn LifecycleListener> {
        &self.listener
    }

    /// Open a context working over `connection`.
    pub fn new_context<C: Connection>(self: &Arc<Self>, connection: C) -> DataContext<C> {
        DataContext::new(self.clone(), connection)
    }
}
