//! Object identities and raw data rows.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use ormgraph_proto::Value;

static NEXT_TEMPORARY_ID: AtomicU64 = AtomicU64::new(1);

fn widen_key(value: Value) -> Value {
    match value {
        Value::Int32(i) => Value::Int64(i64::from(i)),
        other => other,
    }
}

/// Identity of a persistent object: entity name plus primary key values.
///
/// Entity names are those of the inheritance hierarchy root, so a fault
/// created for a superclass and the subclass object it resolves to share
/// one identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectId {
    entity_name: String,
    key: BTreeMap<String, Value>,
    temporary: Option<u64>,
}

impl ObjectId {
    /// Create a permanent id from primary key column values.
    ///
    /// Integer keys are widened to `Int64`, so an id built from a literal
    /// equals the id of the row the driver returns.
    pub fn new(entity_name: impl Into<String>, key: BTreeMap<String, Value>) -> Self {
        Self {
            entity_name: entity_name.into(),
            key: key.into_iter().map(|(column, value)| (column, widen_key(value))).collect(),
            temporary: None,
        }
    }

    /// Create a permanent id over a single key column.
    pub fn single(entity_name: impl Into<String>, column: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut key = BTreeMap::new();
        key.insert(column.into(), value.into());
        Self::new(entity_name, key)
    }

    /// Create a temporary id for an object not yet inserted.
    pub fn temporary(entity_name: impl Into<String>) -> Self {
        Self {
            entity_name: entity_name.into(),
            key: BTreeMap::new(),
            temporary: Some(NEXT_TEMPORARY_ID.fetch_add(1, Ordering::Relaxed)),
        }
    }

    /// Entity name.
    pub fn entity_name(&self) -> &str {
        &self.entity_name
    }

    /// Primary key column values.
    pub fn key(&self) -> &BTreeMap<String, Value> {
        &self.key
    }

    /// Value of one key column.
    pub fn value(&self, column: &str) -> Option<&Value> {
        self.key.get(column)
    }

    /// Whether the id was created for an unsaved object.
    pub fn is_temporary(&self) -> bool {
        self.temporary.is_some()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<ObjectId:{}", self.entity_name)?;
        if let Some(temp) = self.temporary {
            write!(f, ", temp={temp}")?;
        }
        for (column, value) in &self.key {
            write!(f, ", {column}={value}")?;
        }
        f.write_str(">")
    }
}

/// A result row keyed by column label.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataRow {
    entity_name: Option<String>,
    values: BTreeMap<String, Value>,
}

impl DataRow {
    /// Create an empty row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty row tagged with the entity it was read for.
    pub fn for_entity(entity_name: impl Into<String>) -> Self {
        Self {
            entity_name: Some(entity_name.into()),
            values: BTreeMap::new(),
        }
    }

    /// Entity resolved for the row, if read as part of an object query.
    pub fn entity_name(&self) -> Option<&str> {
        self.entity_name.as_deref()
    }

    /// Tag the row with an entity.
    pub fn set_entity_name(&mut self, name: impl Into<String>) {
        self.entity_name = Some(name.into());
    }

    /// Get a column value.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }

    /// Set a column value.
    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(column.into(), value.into());
    }

    /// Builder form of [`DataRow::insert`].
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(column, value);
        self
    }

    /// Whether the column is present, even if null.
    pub fn contains(&self, column: &str) -> bool {
        self.values.contains_key(column)
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Whether every value is null, as produced by an unmatched outer join.
    pub fn is_all_null(&self) -> bool {
        self.values.values().all(Value::is_null)
    }

    /// Iterate over columns in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    /// Column values as a map.
    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    /// Build an [`ObjectId`] from the given key columns. Returns `None`
    /// when any of them is null or missing.
    pub fn object_id(&self, entity_name: &str, key_columns: &[String]) -> Option<ObjectId> {
        let mut key = BTreeMap::new();
        for column in key_columns {
            match self.values.get(column) {
                Some(value) if !value.is_null() => {
                    key.insert(column.clone(), value.clone());
                }
                _ => return None,
            }
        }
        Some(ObjectId::new(entity_name, key))
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for DataRow {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entity_name: None,
            values: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}
