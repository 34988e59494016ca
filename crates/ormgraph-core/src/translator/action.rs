//! Executable actions produced by the translator.

use std::fmt;

use ormgraph_proto::Value;

use crate::map::ParameterDirection;
use crate::object::ObjectId;
use crate::query::BatchQueryKind;

/// A positional statement parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    /// Column the value is compared with or written to, when known.
    pub column: Option<String>,
    pub value: Value,
}

impl Binding {
    pub fn new(column: Option<String>, value: Value) -> Self {
        Self { column, value }
    }
}

/// Binding values in statement order.
pub fn binding_values(bindings: &[Binding]) -> Vec<Value> {
    bindings.iter().map(|b| b.value.clone()).collect()
}

/// One selected column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDescriptor {
    /// Unique label within the result, e.g. `ARTIST_NAME` or
    /// `paintingArray.PAINTING_TITLE`.
    pub label: String,
    /// Key of the value in the data row it belongs to.
    pub key: String,
    /// Joint prefetch path owning the column, `None` for root columns.
    pub node: Option<String>,
    /// Value type used to materialize the column.
    pub type_name: Option<String>,
}

/// Columns belonging to one entity of an inheritance hierarchy.
#[derive(Debug, Clone, PartialEq)]
pub struct EntitySegment {
    pub entity: String,
    /// Positions in [`ResultDescriptor::columns`].
    pub columns: Vec<usize>,
}

/// A joint prefetch node read from the same rows as the root.
#[derive(Debug, Clone, PartialEq)]
pub struct JointNode {
    pub path: String,
    pub entity: String,
}

/// How to split and type result rows.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResultDescriptor {
    pub columns: Vec<ColumnDescriptor>,
    /// Entity selected by the query, `None` for table and data-row roots.
    pub root_entity: Option<String>,
    /// Per-entity column segments; empty when the root has no subentities.
    pub segments: Vec<EntitySegment>,
    /// Positions of discriminator columns.
    pub discriminator: Vec<usize>,
    pub joint_nodes: Vec<JointNode>,
}

/// Paging the database could not do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InMemoryPaging {
    pub offset: usize,
    /// 0 for unlimited.
    pub limit: usize,
    /// Count distinct root objects instead of rows.
    pub by_root: bool,
}

impl InMemoryPaging {
    pub fn is_active(&self) -> bool {
        self.offset > 0 || self.limit > 0
    }
}

/// A translated select.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectAction {
    pub sql: String,
    pub bindings: Vec<Binding>,
    pub result: ResultDescriptor,
    pub paging: InMemoryPaging,
}

/// One row of a batch action.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchActionRow {
    pub bindings: Vec<Value>,
    pub object_id: Option<ObjectId>,
    /// Rendered WHERE condition, for diagnostics.
    pub qualifier: String,
}

/// A translated batch: one statement, many binding rows.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchAction {
    pub kind: BatchQueryKind,
    pub db_entity: String,
    pub sql: String,
    pub rows: Vec<BatchActionRow>,
    pub generated_keys: Vec<String>,
    pub optimistic_locking: bool,
}

/// A rendered SQL template.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateAction {
    pub sql: String,
    pub bindings: Vec<Binding>,
}

/// A procedure parameter as passed to the driver.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcedureParam {
    pub name: String,
    pub direction: ParameterDirection,
    /// Bound value for IN and INOUT parameters; null for OUT.
    pub value: Value,
    pub type_name: String,
}

/// A translated procedure call.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcedureAction {
    pub procedure: String,
    pub sql: String,
    pub parameters: Vec<ProcedureParam>,
}

/// Any translated query.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlAction {
    Select(SelectAction),
    Batch(BatchAction),
    Template(TemplateAction),
    Procedure(ProcedureAction),
}

impl SqlAction {
    pub fn sql(&self) -> &str {
        match self {
            SqlAction::Select(a) => &a.sql,
            SqlAction::Batch(a) => &a.sql,
            SqlAction::Template(a) => &a.sql,
            SqlAction::Procedure(a) => &a.sql,
        }
    }
}

impl fmt::Display for SqlAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql())
    }
}
