//! ORMGraph model types.
//!
//! This crate defines the data shared by every layer of the mapping stack
//! and has no knowledge of mapping metadata.
//!
//! # Modules
//!
//! - [`value`] - Runtime value types for bindings and result rows
//! - [`expr`] - Qualifier expression trees over entity properties
//! - [`ordering`] - Result orderings
//! - [`prefetch`] - Prefetch trees of relationship paths
//! - [`error`] - Model error types

pub mod error;
pub mod expr;
pub mod ordering;
pub mod prefetch;
pub mod value;

pub use error::Error;

pub use expr::{path_segments, ArithmeticOp, CompareOp, Expression, PathSegment, DB_PATH_PREFIX, OUTER_JOIN_SUFFIX};
pub use ordering::{Ordering, SortOrder};
pub use prefetch::{PrefetchProcessor, PrefetchSemantics, PrefetchTreeNode};
pub use value::Value;
