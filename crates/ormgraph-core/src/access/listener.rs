//! Lifecycle notifications.
//!
//! A [`LifecycleListener`] registered on the runtime hears about every
//! completed fetch and commit of the contexts created from it.

use std::sync::Arc;

use parking_lot::Mutex;

use super::batch::{BatchReport, GeneratedKey};
use crate::object::ObjectId;

/// A completed fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchEvent {
    /// Description of the query.
    pub query: String,
    /// Root entity, `None` for table and template roots.
    pub entity: Option<String>,
    /// Number of root results returned.
    pub results: usize,
    /// Whether the result came from a cache.
    pub from_cache: bool,
}

/// What a commit changed.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CommitReport {
    pub inserted: Vec<ObjectId>,
    pub updated: Vec<ObjectId>,
    pub deleted: Vec<ObjectId>,
    pub batches: Vec<BatchReport>,
    pub generated_keys: Vec<GeneratedKey>,
}

impl CommitReport {
    /// Whether the commit had nothing to do.
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

/// Receives lifecycle events.
pub trait LifecycleListener: Send + Sync {
    /// Called after a query's results were merged.
    fn did_fetch(&self, event: &FetchEvent);

    /// Called after all batches of a commit succeeded.
    fn did_commit(&self, report: &CommitReport);
}

/// Listener that ignores every event.
#[derive(Debug, Default)]
pub struct NoopListener;

impl LifecycleListener for NoopListener {
    fn did_fetch(&self, _event: &FetchEvent) {}

    fn did_commit(&self, _report: &CommitReport) {}
}

/// Listener that keeps events in memory.
#[derive(Debug, Default, Clone)]
pub struct MemoryListener {
    fetches: Arc<Mutex<Vec<FetchEvent>>>,
    commits: Arc<Mutex<Vec<CommitReport>>>,
}

impl MemoryListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fetches(&self) -> Vec<FetchEvent> {
        self.fetches.lock().clone()
    }

    pub fn commits(&self) -> Vec<CommitReport> {
        self.commits.lock().clone()
    }

    pub fn clear(&self) {
        self.fetches.lock().clear();
        self.commits.lock().clear();
    }
}

impl LifecycleListener for MemoryListener {
    fn did_fetch(&self, event: &FetchEvent) {
        self.fetches.lock().push(event.clone());
    }

    fn did_commit(&self, report: &CommitReport) {
        self.commits.lock().push(report.clone());
    }
}
