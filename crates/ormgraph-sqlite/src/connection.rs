//! The rusqlite connection.

use std::path::Path;

use ormgraph_core::access::{Connection, MemoryRows, ProcedureResults, RowSource, UpdateResult};
use ormgraph_core::translator::ProcedureParam;
use ormgraph_core::{AdapterCapabilities, DriverError};
use ormgraph_proto::Value;
use rusqlite::params_from_iter;
use tracing::{debug, trace};

use crate::convert::{from_sql_value, to_sql_value};
use crate::error::{driver_error, Result};

/// A SQLite database connection.
///
/// Transactions are left to the caller: wrap a commit in [`begin`],
/// [`commit`] and [`rollback`] to make it atomic.
///
/// [`begin`]: SqliteConnection::begin
/// [`commit`]: SqliteConnection::commit
/// [`rollback`]: SqliteConnection::rollback
pub struct SqliteConnection {
    conn: rusqlite::Connection,
}

impl SqliteConnection {
    /// Open or create a database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = rusqlite::Connection::open(path)?;
        debug!(path = %path.display(), "opened sqlite database");
        Ok(Self { conn })
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: rusqlite::Connection::open_in_memory()?,
        })
    }

    pub fn from_connection(conn: rusqlite::Connection) -> Self {
        Self { conn }
    }

    /// Adapter capabilities matching this driver.
    pub fn capabilities() -> AdapterCapabilities {
        AdapterCapabilities::sqlite()
    }

    /// The underlying rusqlite connection.
    pub fn inner(&self) -> &rusqlite::Connection {
        &self.conn
    }

    pub fn into_inner(self) -> rusqlite::Connection {
        self.conn
    }

    /// Run semicolon separated statements, e.g. a schema script.
    pub fn execute_script(&self, sql: &str) -> Result<()> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    pub fn begin(&self) -> Result<()> {
        self.execute_script("BEGIN")
    }

    pub fn commit(&self) -> Result<()> {
        self.execute_script("COMMIT")
    }

    pub fn rollback(&self) -> Result<()> {
        self.execute_script("ROLLBACK")
    }

    /// Whether a transaction is open.
    pub fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }

    fn run(&self, sql: &str, params: &[Value]) -> rusqlite::Result<UpdateResult> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let affected = stmt.execute(params_from_iter(params.iter().map(to_sql_value)))?;
        let mut result = UpdateResult::new(affected as u64);
        if affected > 0 && is_insert(sql) {
            result = result.with_generated_key(self.conn.last_insert_rowid());
        }
        Ok(result)
    }
}

fn is_insert(sql: &str) -> bool {
    sql.trim_start()
        .get(..6)
        .is_some_and(|head| head.eq_ignore_ascii_case("INSERT"))
}

impl Connection for SqliteConnection {
    fn query(&mut self, sql: &str, params: &[Value]) -> std::result::Result<Box<dyn RowSource + '_>, DriverError> {
        let read = || -> rusqlite::Result<MemoryRows> {
            let mut stmt = self.conn.prepare_cached(sql)?;
            let columns: Vec<String> = stmt.column_names().into_iter().map(str::to_string).collect();
            let width = columns.len();
            let mut rows = stmt.query(params_from_iter(params.iter().map(to_sql_value)))?;
            let mut values = Vec::new();
            while let Some(row) = rows.next()? {
                let mut record = Vec::with_capacity(width);
                for i in 0..width {
                    record.push(from_sql_value(row.get_ref(i)?));
                }
                values.push(record);
            }
            trace!(rows = values.len(), "sqlite query done");
            Ok(MemoryRows::new(columns, values))
        };
        Ok(Box::new(read().map_err(driver_error)?))
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> std::result::Result<UpdateResult, DriverError> {
        self.run(sql, params).map_err(driver_error)
    }

    fn execute_batch(&mut self, sql: &str, rows: &[Vec<Value>]) -> std::result::Result<Vec<UpdateResult>, DriverError> {
        rows.iter()
            .map(|params| self.run(sql, params).map_err(driver_error))
            .collect()
    }

    fn call_procedure(
        &mut self,
        sql: &str,
        _params: &[ProcedureParam],
    ) -> std::result::Result<Box<dyn ProcedureResults + '_>, DriverError> {
        Err(DriverError::new(format!("sqlite has no stored procedures: {sql}")))
    }
}
