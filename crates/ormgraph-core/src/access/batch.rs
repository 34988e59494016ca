//! Executing batches of row changes.
//!
//! Row changes arrive as [`RowChange`]s in the order they must reach the
//! database. Consecutive changes to the same table are grouped by shape,
//! i.e. the written columns, the qualifier columns and which qualifier
//! values are null, so that each group becomes one parameterized
//! statement. Grouping looks at keys and nullness only, never at values.

use std::collections::HashMap;

use ormgraph_proto::Value;
use tracing::{debug, warn};

use super::connection::{Connection, UpdateResult};
use crate::error::{Error, Result};
use crate::object::{DataRow, ObjectId};
use crate::query::{BatchQuery, BatchQueryKind, BatchQueryRow, DeleteBatchQuery, InsertBatchQuery, UpdateBatchQuery};
use crate::translator::{translate_batch, BatchAction, BatchActionRow, SqlAdapter};

/// One row to insert, update or delete.
#[derive(Debug, Clone, PartialEq)]
pub struct RowChange {
    pub db_entity: String,
    pub kind: BatchQueryKind,
    columns: Vec<String>,
    values: DataRow,
    qualifier_columns: Vec<String>,
    qualifier: DataRow,
    generated_keys: Vec<String>,
    optimistic_locking: bool,
    object_id: Option<ObjectId>,
}

impl RowChange {
    fn new(db_entity: impl Into<String>, kind: BatchQueryKind) -> Self {
        Self {
            db_entity: db_entity.into(),
            kind,
            columns: Vec::new(),
            values: DataRow::new(),
            qualifier_columns: Vec::new(),
            qualifier: DataRow::new(),
            generated_keys: Vec::new(),
            optimistic_locking: false,
            object_id: None,
        }
    }

    pub fn insert(db_entity: impl Into<String>) -> Self {
        Self::new(db_entity, BatchQueryKind::Insert)
    }

    pub fn update(db_entity: impl Into<String>) -> Self {
        Self::new(db_entity, BatchQueryKind::Update)
    }

    pub fn delete(db_entity: impl Into<String>) -> Self {
        Self::new(db_entity, BatchQueryKind::Delete)
    }

    /// Write `value` into `column`. Ignored for deletes.
    pub fn with_value(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        let column = column.into();
        if !self.values.contains(&column) {
            self.columns.push(column.clone());
        }
        self.values.insert(column, value);
        self
    }

    /// Match `column` against `value`. Ignored for inserts.
    pub fn with_qualifier(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        let column = column.into();
        if !self.qualifier.contains(&column) {
            self.qualifier_columns.push(column.clone());
        }
        self.qualifier.insert(column, value);
        self
    }

    /// Column the database fills in on insert.
    pub fn with_generated_key(mut self, column: impl Into<String>) -> Self {
        self.generated_keys.push(column.into());
        self
    }

    /// Fail when the statement matches no row.
    pub fn with_optimistic_locking(mut self) -> Self {
        self.optimistic_locking = true;
        self
    }

    pub fn for_object(mut self, id: ObjectId) -> Self {
        self.object_id = Some(id);
        self
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn qualifier_columns(&self) -> &[String] {
        &self.qualifier_columns
    }

    fn written_and_qualifier_columns(&self) -> (&[String], &[String]) {
        let none: &[String] = &[];
        match self.kind {
            BatchQueryKind::Insert => (self.columns.as_slice(), none),
            BatchQueryKind::Update => (self.columns.as_slice(), self.qualifier_columns.as_slice()),
            BatchQueryKind::Delete => (none, self.qualifier_columns.as_slice()),
        }
    }

    fn null_qualifiers(&self) -> Vec<String> {
        let (_, qualifier_columns) = self.written_and_qualifier_columns();
        qualifier_columns
            .iter()
            .filter(|c| self.qualifier.get(c).map_or(true, Value::is_null))
            .cloned()
            .collect()
    }

    /// Grouping key. Column order does not matter since rows bind by name.
    fn shape(&self) -> Shape {
        fn sorted(columns: &[String]) -> Vec<String> {
            let mut columns = columns.to_vec();
            columns.sort();
            columns
        }
        let (columns, qualifier_columns) = self.written_and_qualifier_columns();
        Shape {
            columns: sorted(columns),
            qualifier_columns: sorted(qualifier_columns),
            null_qualifiers: sorted(&self.null_qualifiers()),
            generated_keys: sorted(&self.generated_keys),
            optimistic_locking: self.optimistic_locking,
        }
    }

    /// Batch of this change's shape, columns in the order this change
    /// lists them.
    fn empty_batch(&self) -> BatchQuery {
        let (columns, qualifier_columns) = self.written_and_qualifier_columns();
        match self.kind {
            BatchQueryKind::Insert => InsertBatchQuery::new(self.db_entity.as_str(), columns.to_vec())
                .with_generated_keys(self.generated_keys.clone())
                .into(),
            BatchQueryKind::Update => {
                let mut batch =
                    UpdateBatchQuery::new(self.db_entity.as_str(), columns.to_vec(), qualifier_columns.to_vec());
                for column in self.null_qualifiers() {
                    batch = batch.with_null_qualifier(column);
                }
                if self.optimistic_locking {
                    batch = batch.with_optimistic_locking();
                }
                batch.into()
            }
            BatchQueryKind::Delete => {
                let mut batch = DeleteBatchQuery::new(self.db_entity.as_str(), qualifier_columns.to_vec());
                for column in self.null_qualifiers() {
                    batch = batch.with_null_qualifier(column);
                }
                if self.optimistic_locking {
                    batch = batch.with_optimistic_locking();
                }
                batch.into()
            }
        }
    }

    fn into_row(self) -> BatchQueryRow {
        let row = match self.kind {
            BatchQueryKind::Insert => BatchQueryRow::new(self.values),
            BatchQueryKind::Update => BatchQueryRow::new(self.values).with_qualifier(self.qualifier),
            BatchQueryKind::Delete => BatchQueryRow::new(DataRow::new()).with_qualifier(self.qualifier),
        };
        match self.object_id {
            Some(id) => row.for_object(id),
            None => row,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Shape {
    columns: Vec<String>,
    qualifier_columns: Vec<String>,
    null_qualifiers: Vec<String>,
    generated_keys: Vec<String>,
    optimistic_locking: bool,
}

fn add_row(batch: &mut BatchQuery, row: BatchQueryRow) -> Result<()> {
    match batch {
        BatchQuery::Insert(b) => b.add_row(row),
        BatchQuery::Update(b) => b.add_row(row),
        BatchQuery::Delete(b) => b.add_row(row),
    }
}

/// Group changes into batch queries.
///
/// Each run of consecutive changes with the same table and kind is split
/// by shape; groups keep the order in which their first row appeared, and
/// runs keep their relative order.
pub fn group_changes(changes: Vec<RowChange>) -> Result<Vec<BatchQuery>> {
    let mut batches = Vec::new();
    let mut run: Option<(String, BatchQueryKind)> = None;
    let mut shapes: HashMap<Shape, usize> = HashMap::new();

    for change in changes {
        let key = (change.db_entity.clone(), change.kind);
        if run.as_ref() != Some(&key) {
            run = Some(key);
            shapes.clear();
        }
        let shape = change.shape();
        let index = match shapes.get(&shape) {
            Some(index) => *index,
            None => {
                batches.push(change.empty_batch());
                let index = batches.len() - 1;
                shapes.insert(shape, index);
                index
            }
        };
        add_row(&mut batches[index], change.into_row())?;
    }
    Ok(batches)
}

/// Lifecycle of one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Pending,
    Executing,
    Committed,
    Failed,
}

/// Outcome of one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    pub db_entity: String,
    pub kind: BatchQueryKind,
    pub sql: Option<String>,
    pub rows: usize,
    pub rows_completed: usize,
    /// Sum of the update counts the driver reported.
    pub rows_affected: u64,
    pub state: BatchState,
}

/// Key value the database generated for an inserted object.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedKey {
    pub object_id: ObjectId,
    pub column: String,
    pub value: Value,
}

/// Runs batch queries in order, stopping at the first failure.
///
/// A failed batch is reported and returned as [`Error::BatchFailed`];
/// nothing is retried here and batches after it stay pending. Whether to
/// roll back or retry is up to the caller's transaction.
pub struct BatchEngine<'a> {
    adapter: &'a SqlAdapter,
    log_sql: bool,
    batches: Vec<BatchQuery>,
    reports: Vec<BatchReport>,
}

impl<'a> BatchEngine<'a> {
    /// Engine over batches grouped from `changes`.
    pub fn new(adapter: &'a SqlAdapter, changes: Vec<RowChange>) -> Result<Self> {
        Ok(Self::from_batches(adapter, group_changes(changes)?))
    }

    pub fn from_batches(adapter: &'a SqlAdapter, batches: Vec<BatchQuery>) -> Self {
        let reports = batches
            .iter()
            .map(|batch| BatchReport {
                db_entity: batch.db_entity().to_string(),
                kind: batch.kind(),
                sql: None,
                rows: batch.rows().len(),
                rows_completed: 0,
                rows_affected: 0,
                state: BatchState::Pending,
            })
            .collect();
        Self {
            adapter,
            log_sql: true,
            batches,
            reports,
        }
    }

    /// Log each statement at debug level.
    pub fn log_sql(mut self, enabled: bool) -> Self {
        self.log_sql = enabled;
        self
    }

    pub fn batches(&self) -> &[BatchQuery] {
        &self.batches
    }

    pub fn reports(&self) -> &[BatchReport] {
        &self.reports
    }

    pub fn into_reports(self) -> Vec<BatchReport> {
        self.reports
    }

    /// Execute every pending batch. Returns the keys generated for inserted
    /// objects.
    pub fn execute<C: Connection + ?Sized>(&mut self, connection: &mut C) -> Result<Vec<GeneratedKey>> {
        let mut keys = Vec::new();
        for index in 0..self.batches.len() {
            if self.reports[index].state != BatchState::Pending {
                continue;
            }
            self.transition(index, BatchState::Executing);
            let action = match translate_batch(&self.batches[index], self.adapter) {
                Ok(action) => action,
                Err(err) => return Err(self.fail(index, 0, err)),
            };
            self.reports[index].sql = Some(action.sql.clone());
            if self.log_sql {
                debug!(sql = %action.sql, rows = action.rows.len(), "executing batch");
            }

            match self.run(connection, &action, &mut keys) {
                Ok((completed, affected)) => {
                    self.reports[index].rows_completed = completed;
                    self.reports[index].rows_affected = affected;
                    self.transition(index, BatchState::Committed);
                }
                Err((completed, err)) => return Err(self.fail(index, completed, err)),
            }
        }
        Ok(keys)
    }

    /// Run one action; on failure returns the rows completed before it.
    fn run<C: Connection + ?Sized>(
        &self,
        connection: &mut C,
        action: &BatchAction,
        keys: &mut Vec<GeneratedKey>,
    ) -> std::result::Result<(usize, u64), (usize, Error)> {
        let description = format!("{:?} batch on {}", action.kind, action.db_entity);
        let use_driver_batch = self.adapter.capabilities().supports_batch_updates
            && action.generated_keys.is_empty()
            && action.rows.len() > 1;

        if use_driver_batch {
            let params: Vec<Vec<Value>> = action.rows.iter().map(|r| r.bindings.clone()).collect();
            let results = connection
                .execute_batch(&action.sql, &params)
                .map_err(|e| (0, Error::execution(&description, &action.sql, e)))?;
            if results.len() != action.rows.len() {
                return Err((
                    0,
                    Error::UpdateCountMismatch {
                        sql: action.sql.clone(),
                        expected: action.rows.len(),
                        actual: results.len(),
                    },
                ));
            }
            for (completed, (row, result)) in action.rows.iter().zip(&results).enumerate() {
                check_count(action, row, result).map_err(|e| (completed, e))?;
            }
            return Ok((results.len(), results.iter().map(|r| r.rows_affected).sum()));
        }

        let mut affected = 0;
        for (completed, row) in action.rows.iter().enumerate() {
            let result = connection
                .execute(&action.sql, &row.bindings)
                .map_err(|e| (completed, Error::execution(&description, &action.sql, e)))?;
            check_count(action, row, &result).map_err(|e| (completed, e))?;
            affected += result.rows_affected;
            if let Some(key) = generated_key(self.adapter, action, row, &result).map_err(|e| (completed, e))? {
                keys.push(key);
            }
        }
        Ok((action.rows.len(), affected))
    }

    fn transition(&mut self, index: usize, state: BatchState) {
        let report = &mut self.reports[index];
        debug!(
            entity = %report.db_entity,
            kind = ?report.kind,
            from = ?report.state,
            to = ?state,
            "batch state"
        );
        report.state = state;
    }

    fn fail(&mut self, index: usize, rows_completed: usize, source: Error) -> Error {
        self.reports[index].rows_completed = rows_completed;
        self.transition(index, BatchState::Failed);
        let entity = self.reports[index].db_entity.clone();
        warn!(entity = %entity, batch = index, rows_completed, error = %source, "batch failed");
        Error::BatchFailed {
            entity,
            batch_index: index,
            rows_completed,
            source: Box::new(source),
        }
    }
}

fn check_count(action: &BatchAction, row: &BatchActionRow, result: &UpdateResult) -> Result<()> {
    if action.optimistic_locking && result.rows_affected != 1 {
        warn!(
            entity = %action.db_entity,
            qualifier = %row.qualifier,
            rows_affected = result.rows_affected,
            "optimistic lock failure"
        );
        return Err(Error::OptimisticLockFailure {
            entity: action.db_entity.clone(),
            sql: action.sql.clone(),
            qualifier: row.qualifier.clone(),
        });
    }
    Ok(())
}

fn generated_key(
    adapter: &SqlAdapter,
    action: &BatchAction,
    row: &BatchActionRow,
    result: &UpdateResult,
) -> Result<Option<GeneratedKey>> {
    let (Some(column), Some(object_id)) = (action.generated_keys.first(), &row.object_id) else {
        return Ok(None);
    };
    match &result.generated_key {
        Some(value) => Ok(Some(GeneratedKey {
            object_id: object_id.clone(),
            column: column.clone(),
            value: value.clone(),
        })),
        None if adapter.capabilities().supports_generated_keys => Err(Error::MissingIdentity {
            entity: action.db_entity.clone(),
            column: column.clone(),
        }),
        None => Err(Error::Unsupported(format!(
            "adapter {} does not report generated keys for {}",
            adapter.name(),
            action.db_entity
        ))),
    }
}
