//! Batch queries: one statement shape, many binding rows.

use std::collections::BTreeSet;
use std::sync::Arc;

use ormgraph_proto::Value;

use super::metadata::QueryMetadata;
use crate::error::{Error, Result};
use crate::map::EntityResolver;
use crate::object::{DataRow, ObjectId};

/// Statement kind of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BatchQueryKind {
    Insert,
    Update,
    Delete,
}

/// One binding row of a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchQueryRow {
    /// Column values: inserted or updated columns, plus qualifier columns
    /// unless those are given separately.
    pub values: DataRow,
    /// Qualifier values when they differ from the written ones, e.g. the
    /// previously read values of optimistic-lock columns.
    pub qualifier: Option<DataRow>,
    /// Object the row was built from, if any.
    pub object_id: Option<ObjectId>,
}

impl BatchQueryRow {
    /// Create a row without an owning object.
    pub fn new(values: DataRow) -> Self {
        Self {
            values,
            qualifier: None,
            object_id: None,
        }
    }

    /// Match on these values instead of the written ones.
    pub fn with_qualifier(mut self, qualifier: DataRow) -> Self {
        self.qualifier = Some(qualifier);
        self
    }

    /// Attach the owning object.
    pub fn for_object(mut self, id: ObjectId) -> Self {
        self.object_id = Some(id);
        self
    }

    fn value(&self, column: &str) -> &Value {
        self.values.get(column).unwrap_or(&Value::Null)
    }

    fn qualifier_value(&self, column: &str) -> &Value {
        match &self.qualifier {
            Some(q) => q.get(column).unwrap_or(&Value::Null),
            None => self.value(column),
        }
    }

    /// Values of `columns` in order, nulls for absent ones.
    pub fn values_for<'a>(&'a self, columns: impl IntoIterator<Item = &'a String>) -> Vec<Value> {
        columns.into_iter().map(|c| self.value(c).clone()).collect()
    }

    /// Qualifier values of `columns` in order.
    pub fn qualifier_values_for<'a>(&'a self, columns: impl IntoIterator<Item = &'a String>) -> Vec<Value> {
        columns.into_iter().map(|c| self.qualifier_value(c).clone()).collect()
    }
}

impl From<DataRow> for BatchQueryRow {
    fn from(values: DataRow) -> Self {
        Self::new(values)
    }
}

fn check_keys(entity: &str, expected: &BTreeSet<&String>, row: &DataRow) -> Result<()> {
    let actual: BTreeSet<&String> = row.iter().map(|(k, _)| k).collect();
    if &actual != expected {
        return Err(Error::InvalidBatchRow {
            entity: entity.to_string(),
            expected: expected.iter().map(|s| s.to_string()).collect(),
            actual: actual.iter().map(|s| s.to_string()).collect(),
        });
    }
    Ok(())
}

/// Written columns come from `values`; qualifier columns from `qualifier`
/// when present, from `values` otherwise.
fn check_shape(entity: &str, written: &[String], qualifier: &[String], row: &BatchQueryRow) -> Result<()> {
    match &row.qualifier {
        Some(q) => {
            check_keys(entity, &written.iter().collect(), &row.values)?;
            check_keys(entity, &qualifier.iter().collect(), q)
        }
        None => check_keys(entity, &written.iter().chain(qualifier).collect(), &row.values),
    }
}

fn check_null_pattern(
    entity: &str,
    qualifier_columns: &[String],
    null_qualifier_names: &BTreeSet<String>,
    row: &BatchQueryRow,
) -> Result<()> {
    let nulls: BTreeSet<String> = qualifier_columns
        .iter()
        .filter(|c| row.qualifier_value(c).is_null())
        .cloned()
        .collect();
    if &nulls != null_qualifier_names {
        return Err(Error::InvalidBatchRow {
            entity: entity.to_string(),
            expected: null_qualifier_names.iter().map(|c| format!("{c} IS NULL")).collect(),
            actual: nulls.iter().map(|c| format!("{c} IS NULL")).collect(),
        });
    }
    Ok(())
}

/// Batch of inserts into one table.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertBatchQuery {
    db_entity: String,
    columns: Vec<String>,
    generated_keys: Vec<String>,
    rows: Vec<BatchQueryRow>,
}

impl InsertBatchQuery {
    /// Create an empty batch inserting `columns`.
    pub fn new(db_entity: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            db_entity: db_entity.into(),
            columns,
            generated_keys: Vec::new(),
            rows: Vec::new(),
        }
    }

    /// Columns whose values the database generates; read back per row.
    pub fn with_generated_keys(mut self, columns: Vec<String>) -> Self {
        self.generated_keys = columns;
        self
    }

    /// Add a row supplying exactly the batch's columns.
    pub fn add_row(&mut self, row: impl Into<BatchQueryRow>) -> Result<()> {
        let row = row.into();
        check_keys(&self.db_entity, &self.columns.iter().collect(), &row.values)?;
        self.rows.push(row);
        Ok(())
    }

    pub fn db_entity(&self) -> &str {
        &self.db_entity
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn generated_keys(&self) -> &[String] {
        &self.generated_keys
    }

    pub fn rows(&self) -> &[BatchQueryRow] {
        &self.rows
    }
}

/// Batch of updates to one table, qualified by key and lock columns.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateBatchQuery {
    db_entity: String,
    updated_columns: Vec<String>,
    qualifier_columns: Vec<String>,
    null_qualifier_names: BTreeSet<String>,
    optimistic_locking: bool,
    rows: Vec<BatchQueryRow>,
}

impl UpdateBatchQuery {
    /// Create an empty batch setting `updated_columns` where
    /// `qualifier_columns` match.
    pub fn new(db_entity: impl Into<String>, updated_columns: Vec<String>, qualifier_columns: Vec<String>) -> Self {
        Self {
            db_entity: db_entity.into(),
            updated_columns,
            qualifier_columns,
            null_qualifier_names: BTreeSet::new(),
            optimistic_locking: false,
            rows: Vec::new(),
        }
    }

    /// Qualifier column matched with `IS NULL`.
    pub fn with_null_qualifier(mut self, column: impl Into<String>) -> Self {
        self.null_qualifier_names.insert(column.into());
        self
    }

    /// Fail when a row matches nothing.
    pub fn with_optimistic_locking(mut self) -> Self {
        self.optimistic_locking = true;
        self
    }

    /// Add a row supplying the updated and qualifier columns.
    pub fn add_row(&mut self, row: impl Into<BatchQueryRow>) -> Result<()> {
        let row = row.into();
        check_shape(&self.db_entity, &self.updated_columns, &self.qualifier_columns, &row)?;
        check_null_pattern(&self.db_entity, &self.qualifier_columns, &self.null_qualifier_names, &row)?;
        self.rows.push(row);
        Ok(())
    }

    pub fn db_entity(&self) -> &str {
        &self.db_entity
    }

    pub fn updated_columns(&self) -> &[String] {
        &self.updated_columns
    }

    pub fn qualifier_columns(&self) -> &[String] {
        &self.qualifier_columns
    }

    pub fn null_qualifier_names(&self) -> &BTreeSet<String> {
        &self.null_qualifier_names
    }

    pub fn is_optimistic_locking(&self) -> bool {
        self.optimistic_locking
    }

    pub fn rows(&self) -> &[BatchQueryRow] {
        &self.rows
    }
}

/// Batch of deletes from one table.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteBatchQuery {
    db_entity: String,
    qualifier_columns: Vec<String>,
    null_qualifier_names: BTreeSet<String>,
    optimistic_locking: bool,
    rows: Vec<BatchQueryRow>,
}

impl DeleteBatchQuery {
    /// Create an empty batch deleting rows matching `qualifier_columns`.
    pub fn new(db_entity: impl Into<String>, qualifier_columns: Vec<String>) -> Self {
        Self {
            db_entity: db_entity.into(),
            qualifier_columns,
            null_qualifier_names: BTreeSet::new(),
            optimistic_locking: false,
            rows: Vec::new(),
        }
    }

    /// Qualifier column matched with `IS NULL`.
    pub fn with_null_qualifier(mut self, column: impl Into<String>) -> Self {
        self.null_qualifier_names.insert(column.into());
        self
    }

    /// Fail when a row matches nothing.
    pub fn with_optimistic_locking(mut self) -> Self {
        self.optimistic_locking = true;
        self
    }

    /// Add a row supplying the qualifier columns.
    pub fn add_row(&mut self, row: impl Into<BatchQueryRow>) -> Result<()> {
        let row = row.into();
        check_shape(&self.db_entity, &[], &self.qualifier_columns, &row)?;
        check_null_pattern(&self.db_entity, &self.qualifier_columns, &self.null_qualifier_names, &row)?;
        self.rows.push(row);
        Ok(())
    }

    pub fn db_entity(&self) -> &str {
        &self.db_entity
    }

    pub fn qualifier_columns(&self) -> &[String] {
        &self.qualifier_columns
    }

    pub fn null_qualifier_names(&self) -> &BTreeSet<String> {
        &self.null_qualifier_names
    }

    pub fn is_optimistic_locking(&self) -> bool {
        self.optimistic_locking
    }

    pub fn rows(&self) -> &[BatchQueryRow] {
        &self.rows
    }
}

/// Any batch.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchQuery {
    Insert(InsertBatchQuery),
    Update(UpdateBatchQuery),
    Delete(DeleteBatchQuery),
}

impl BatchQuery {
    pub fn kind(&self) -> BatchQueryKind {
        match self {
            BatchQuery::Insert(_) => BatchQueryKind::Insert,
            BatchQuery::Update(_) => BatchQueryKind::Update,
            BatchQuery::Delete(_) => BatchQueryKind::Delete,
        }
    }

    pub fn db_entity(&self) -> &str {
        match self {
            BatchQuery::Insert(q) => q.db_entity(),
            BatchQuery::Update(q) => q.db_entity(),
            BatchQuery::Delete(q) => q.db_entity(),
        }
    }

    pub fn rows(&self) -> &[BatchQueryRow] {
        match self {
            BatchQuery::Insert(q) => q.rows(),
            BatchQuery::Update(q) => q.rows(),
            BatchQuery::Delete(q) => q.rows(),
        }
    }

    /// Whether a row matching nothing is a failure.
    pub fn is_optimistic_locking(&self) -> bool {
        match self {
            BatchQuery::Insert(_) => false,
            BatchQuery::Update(q) => q.is_optimistic_locking(),
            BatchQuery::Delete(q) => q.is_optimistic_locking(),
        }
    }

    pub fn description(&self) -> String {
        format!("{:?} batch on {} ({} rows)", self.kind(), self.db_entity(), self.rows().len())
    }

    /// Metadata naming the target table.
    pub fn metadata(&self, resolver: &EntityResolver) -> Result<Arc<QueryMetadata>> {
        let snapshot = resolver.snapshot()?;
        snapshot.db_entity(self.db_entity())?;
        let mut md = QueryMetadata::new(resolver, None);
        md.db_entity = Some(self.db_entity().to_string());
        Ok(Arc::new(md))
    }
}

impl From<InsertBatchQuery> for BatchQuery {
    fn from(q: InsertBatchQuery) -> Self {
        BatchQuery::Insert(q)
    }
}

impl From<UpdateBatchQuery> for BatchQuery {
    fn from(q: UpdateBatchQuery) -> Self {
        BatchQuery::Update(q)
    }
}

impl From<DeleteBatchQuery> for BatchQuery {
    fn from(q: DeleteBatchQuery) -> Self {
        BatchQuery::Delete(q)
    }
}
