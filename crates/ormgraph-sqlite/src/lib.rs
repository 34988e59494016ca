//! ORMGraph SQLite - a [`Connection`](ormgraph_core::Connection) backed by
//! rusqlite.
//!
//! ```no_run
//! use std::sync::Arc;
//! use ormgraph_core::{EntityResolver, Runtime, RuntimeConfig, SelectQuery};
//! use ormgraph_sqlite::SqliteConnection;
//!
//! # fn run(resolver: EntityResolver) -> Result<(), Box<dyn std::error::Error>> {
//! let runtime = Arc::new(Runtime::new(Arc::new(resolver), RuntimeConfig::new(SqliteConnection::capabilities())));
//! let mut context = runtime.new_context(SqliteConnection::open_in_memory()?);
//! let artists = context.select(&SelectQuery::new("Artist"))?;
//! # Ok(())
//! # }
//! ```

mod connection;
mod convert;
mod error;

pub use connection::SqliteConnection;
pub use convert::{from_sql_value, to_sql_value};
pub use error::{Error, Result};
