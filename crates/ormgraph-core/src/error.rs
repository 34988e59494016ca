//! Core error types.
//!
//! Every error belongs to one of three classes, see [`ErrorKind`].
//! Configuration errors are raised while resolving metadata or translating a
//! query, execution errors wrap driver failures, and data errors are raised
//! while merging rows into an object graph.

use thiserror::Error;

/// Failure reported by the database driver.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct DriverError {
    /// Driver message.
    pub message: String,
    /// SQLSTATE code, when the driver reports one.
    pub sql_state: Option<String>,
    /// Whether the driver considers the operation safe to retry.
    pub retryable: bool,
}

impl DriverError {
    /// Create a non-retryable driver error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            sql_state: None,
            retryable: false,
        }
    }

    /// Attach a SQLSTATE code.
    pub fn with_sql_state(mut self, state: impl Into<String>) -> Self {
        self.sql_state = Some(state.into());
        self
    }

    /// Mark the error retryable.
    pub fn retryable(mut self) -> Self {
        self.retryable = true;
        self
    }
}

/// Error classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Mapping or query problem detected before execution.
    Configuration,
    /// The database rejected a statement.
    Execution,
    /// A row could not be merged into the object graph.
    Data,
}

/// Core errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Model error from the expression or prefetch layer.
    #[error("model error: {0}")]
    Model(#[from] ormgraph_proto::Error),

    /// Mapping description could not be decoded.
    #[error("invalid mapping description: {0}")]
    Deserialization(String),

    /// The resolver has not been initialized or was invalidated.
    #[error("entity resolver is not initialized")]
    ResolverNotReady,

    /// No entity, class or db entity with this name.
    #[error("unknown entity: {name}")]
    UnknownEntity { name: String },

    /// No object or db entity is registered for a Rust type.
    #[error("no entity registered for type {type_name}")]
    UnknownType { type_name: String },

    /// Path does not resolve to an attribute or column.
    #[error("unknown attribute '{path}' on entity {entity}")]
    UnknownAttribute { entity: String, path: String },

    /// Path segment does not resolve to a relationship.
    #[error("unknown relationship '{name}' on entity {entity}")]
    UnknownRelationship { entity: String, name: String },

    /// Inconsistent mapping description.
    #[error("mapping error: {0}")]
    Mapping(String),

    /// Expression cannot be translated.
    #[error("invalid expression {expression}: {message}")]
    InvalidExpression { expression: String, message: String },

    /// Named parameter was never bound.
    #[error("unbound parameter '{name}'")]
    UnboundParameter { name: String },

    /// Query kind or feature not supported by the adapter.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// A batch row does not match the batch's column shape.
    #[error("row does not match batch shape for {entity}: expected {expected:?}, got {actual:?}")]
    InvalidBatchRow {
        entity: String,
        expected: Vec<String>,
        actual: Vec<String>,
    },

    /// SQL template could not be parsed.
    #[error("invalid SQL template: {0}")]
    InvalidTemplate(String),

    /// The driver failed executing a statement.
    #[error("query '{query}' failed executing [{sql}]: {source}")]
    Execution {
        query: String,
        sql: String,
        #[source]
        source: DriverError,
    },

    /// An update or delete under optimistic locking matched no row.
    #[error("optimistic lock failure on {entity}: no row matched {qualifier} with [{sql}]")]
    OptimisticLockFailure {
        entity: String,
        sql: String,
        qualifier: String,
    },

    /// The driver reported a different number of update counts than the
    /// batch had rows.
    #[error("batch [{sql}] returned {actual} update counts for {expected} rows")]
    UpdateCountMismatch { sql: String, expected: usize, actual: usize },

    /// A batch failed; earlier batches may have completed.
    #[error("batch {batch_index} for {entity} failed after {rows_completed} rows: {source}")]
    BatchFailed {
        entity: String,
        batch_index: usize,
        rows_completed: usize,
        #[source]
        source: Box<Error>,
    },

    /// A column value could not be converted to the mapped type.
    #[error("cannot convert {entity}.{column}: expected {expected}, got {actual}")]
    TypeConversion {
        entity: String,
        column: String,
        expected: String,
        actual: String,
    },

    /// Null value for a mandatory attribute.
    #[error("null value for mandatory attribute {entity}.{attribute}")]
    NullValue { entity: String, attribute: String },

    /// Object or row lacks a primary key value.
    #[error("missing identity for {entity}: column {column} is null or absent")]
    MissingIdentity { entity: String, column: String },

    /// Object has no ObjectId at merge time.
    #[error("object of entity {entity} has no identity")]
    ObjectWithoutId { entity: String },

    /// A row's discriminator matches no concrete entity of the hierarchy.
    #[error("row matches no concrete entity of the {entity} hierarchy")]
    NoMatchingEntity { entity: String },

    /// A result row is shorter than the selected column list.
    #[error("result of [{sql}] has {actual} columns, expected {expected}")]
    ColumnCount { sql: String, expected: usize, actual: usize },
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Execution { .. } | Error::OptimisticLockFailure { .. } | Error::UpdateCountMismatch { .. } => {
                ErrorKind::Execution
            }
            Error::BatchFailed { source, .. } => source.kind(),
            Error::TypeConversion { .. }
            | Error::NullValue { .. }
            | Error::MissingIdentity { .. }
            | Error::ObjectWithoutId { .. }
            | Error::NoMatchingEntity { .. }
            | Error::ColumnCount { .. } => ErrorKind::Data,
            _ => ErrorKind::Configuration,
        }
    }

    /// Whether retrying the operation may succeed. Only driver errors can be
    /// retryable, and their flag is passed through unchanged.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Execution { source, .. } => source.retryable,
            Error::BatchFailed { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    pub(crate) fn execution(query: impl Into<String>, sql: impl Into<String>, source: DriverError) -> Self {
        Error::Execution {
            query: query.into(),
            sql: sql.into(),
            source,
        }
    }

    pub(crate) fn invalid_expression(expression: impl ToString, message: impl Into<String>) -> Self {
        Error::InvalidExpression {
            expression: expression.to_string(),
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Deserialization(e.to_string())
    }
}

/// Result alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
