//! The driver seam.
//!
//! A [`Connection`] executes finished SQL with positional parameters and
//! hands rows back as [`Value`]s. Drivers report failures as
//! [`DriverError`]; the access layer wraps them with the query that failed.

use std::collections::{BTreeMap, VecDeque};

use ormgraph_proto::Value;

use crate::error::DriverError;
use crate::translator::ProcedureParam;

/// Rows of an executed query, pulled one at a time.
pub trait RowSource {
    /// Result column labels in select order.
    fn columns(&self) -> &[String];

    /// Next row, `None` once exhausted.
    fn next_row(&mut self) -> Result<Option<Vec<Value>>, DriverError>;
}

/// Outcome of one executed update statement.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UpdateResult {
    pub rows_affected: u64,
    /// Key the database generated for an inserted row, if it reports one.
    pub generated_key: Option<Value>,
}

impl UpdateResult {
    pub fn new(rows_affected: u64) -> Self {
        Self {
            rows_affected,
            generated_key: None,
        }
    }

    pub fn with_generated_key(mut self, key: impl Into<Value>) -> Self {
        self.generated_key = Some(key.into());
        self
    }
}

/// One result of a procedure call.
#[derive(Debug, Clone, PartialEq)]
pub enum StatementResult {
    Rows { columns: Vec<String>, rows: Vec<Vec<Value>> },
    UpdateCount(u64),
}

/// Results of a procedure call, in the order the driver produces them.
///
/// Some drivers only make OUT parameters readable after every result has
/// been consumed; the access layer respects
/// `AdapterCapabilities::out_params_before_results` when reading.
pub trait ProcedureResults {
    /// Next result set or update count.
    fn next_result(&mut self) -> Result<Option<StatementResult>, DriverError>;

    /// OUT and INOUT parameter values by name.
    fn out_parameters(&mut self) -> Result<BTreeMap<String, Value>, DriverError>;
}

/// An open database connection.
pub trait Connection {
    /// Run a query.
    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Box<dyn RowSource + '_>, DriverError>;

    /// Run an update statement.
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<UpdateResult, DriverError>;

    /// Run one statement once per parameter row.
    fn execute_batch(&mut self, sql: &str, rows: &[Vec<Value>]) -> Result<Vec<UpdateResult>, DriverError> {
        rows.iter().map(|params| self.execute(sql, params)).collect()
    }

    /// Call a stored procedure.
    fn call_procedure(
        &mut self,
        sql: &str,
        params: &[ProcedureParam],
    ) -> Result<Box<dyn ProcedureResults + '_>, DriverError>;
}

/// Rows already in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryRows {
    columns: Vec<String>,
    rows: VecDeque<Vec<Value>>,
}

impl MemoryRows {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            columns,
            rows: rows.into(),
        }
    }
}

impl RowSource for MemoryRows {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn next_row(&mut self) -> Result<Option<Vec<Value>>, DriverError> {
        Ok(self.rows.pop_front())
    }
}

/// Drain a row source.
pub fn read_all(source: &mut dyn RowSource) -> Result<Vec<Vec<Value>>, DriverError> {
    let mut rows = Vec::new();
    while let Some(row) = source.next_row()? {
        rows.push(row);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::MockConnection;

    #[test]
    fn test_memory_rows_drain_in_order() {
        let mut rows = MemoryRows::new(
            vec!["A".into()],
            vec![vec![Value::Int64(1)], vec![Value::Int64(2)]],
        );
        assert_eq!(rows.columns(), &["A".to_string()]);
        let all = read_all(&mut rows).unwrap();
        assert_eq!(all, vec![vec![Value::Int64(1)], vec![Value::Int64(2)]]);
        assert!(rows.next_row().unwrap().is_none());
    }

    #[test]
    fn test_default_batch_executes_each_row() {
        let mut conn = MockConnection::new();
        conn.push_update(UpdateResult::new(1));
        conn.push_update(UpdateResult::new(0));
        let results = conn
            .execute_batch("DELETE FROM T WHERE ID = ?", &[vec![Value::Int64(1)], vec![Value::Int64(2)]])
            .unwrap();
        assert_eq!(results.iter().map(|r| r.rows_affected).collect::<Vec<_>>(), vec![1, 0]);
        assert_eq!(conn.executed().len(), 2);
    }
}
