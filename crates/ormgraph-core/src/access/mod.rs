//! Running queries against a database.
//!
//! A [`Runtime`] holds the mapping, the SQL adapter and the shared query
//! cache. Each [`DataContext`] pairs it with one [`Connection`] and an
//! object graph: selects are translated, read through a [`RowReader`],
//! materialized into the graph and linked by prefetching, while commits go
//! through the [`BatchEngine`].

pub mod batch;
pub(crate) mod commit;
pub mod connection;
pub mod context;
pub mod incremental;
pub mod listener;
pub mod materializer;
pub mod prefetch;
pub mod reader;
pub mod runtime;

pub use batch::{group_changes, BatchEngine, BatchReport, BatchState, GeneratedKey, RowChange};
pub use connection::{
    read_all, Connection, MemoryRows, ProcedureResults, RowSource, StatementResult, UpdateResult,
};
pub use context::{DataContext, ProcedureOutcome, ProcedureResult, QueryResponse};
pub use incremental::IncrementalFaultList;
pub use listener::{CommitReport, FetchEvent, LifecycleListener, MemoryListener, NoopListener};
pub use materializer::Materializer;
pub use prefetch::{PrefetchRouter, PrefetchStep, PrefetchStrategy};
pub use reader::{descriptor_for_labels, ReadRow, ResultIterator, RowReader};
pub use runtime::Runtime;
