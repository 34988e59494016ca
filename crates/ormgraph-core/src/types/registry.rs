//! Registry of value types keyed by type name.
//!
//! Lookup order: explicitly registered types, then the first factory that
//! provides the name, then the pass-through default. Types obtained from
//! factories or the default are cached, so factories run once per name.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use ormgraph_proto::Value;
use parking_lot::RwLock;
use tracing::trace;

/// A raw value could not be converted to or from the mapped type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionFailure {
    /// Mapped type name.
    pub expected: String,
    /// Type of the offending value.
    pub actual: String,
}

impl ConversionFailure {
    /// Failure converting `value` to `expected`.
    pub fn new(expected: impl Into<String>, value: &Value) -> Self {
        Self {
            expected: expected.into(),
            actual: value.type_name().to_string(),
        }
    }
}

/// Conversion between driver values and mapped attribute values.
pub trait ExtendedType: Send + Sync + fmt::Debug {
    /// Type name this converter handles.
    fn type_name(&self) -> &str;

    /// Convert a value read from a result row.
    fn materialize(&self, raw: Value) -> Result<Value, ConversionFailure>;

    /// Convert an attribute value for binding into a statement.
    fn to_bind_value(&self, value: &Value) -> Result<Value, ConversionFailure>;
}

/// Provides types for names that were not registered explicitly.
pub trait ExtendedTypeFactory: Send + Sync {
    /// Type for `type_name`, or `None` if this factory does not handle it.
    fn get_type(&self, type_name: &str) -> Option<Arc<dyn ExtendedType>>;
}

impl<F> ExtendedTypeFactory for F
where
    F: Fn(&str) -> Option<Arc<dyn ExtendedType>> + Send + Sync,
{
    fn get_type(&self, type_name: &str) -> Option<Arc<dyn ExtendedType>> {
        self(type_name)
    }
}

/// Pass-through type used when nothing else handles a name.
#[derive(Debug, Clone)]
pub struct DefaultType {
    name: String,
}

impl DefaultType {
    /// Create a pass-through type reporting `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl ExtendedType for DefaultType {
    fn type_name(&self) -> &str {
        &self.name
    }

    fn materialize(&self, raw: Value) -> Result<Value, ConversionFailure> {
        Ok(raw)
    }

    fn to_bind_value(&self, value: &Value) -> Result<Value, ConversionFailure> {
        Ok(value.clone())
    }
}

/// Type registry.
pub struct ExtendedTypeMap {
    registered: RwLock<HashMap<String, Arc<dyn ExtendedType>>>,
    factories: RwLock<Vec<Arc<dyn ExtendedTypeFactory>>>,
    created: DashMap<String, Arc<dyn ExtendedType>>,
}

impl ExtendedTypeMap {
    /// Create a registry without any types.
    pub fn empty() -> Self {
        Self {
            registered: RwLock::new(HashMap::new()),
            factories: RwLock::new(Vec::new()),
            created: DashMap::new(),
        }
    }

    /// Create a registry with the built-in scalar types.
    pub fn new() -> Self {
        let map = Self::empty();
        for scalar in super::builtin::builtin_types() {
            map.register_type(scalar);
        }
        map
    }

    /// Register a type under its own name. Replaces earlier registrations
    /// and any cached factory result for the name.
    pub fn register_type(&self, extended_type: Arc<dyn ExtendedType>) {
        let name = extended_type.type_name().to_string();
        self.created.remove(&name);
        self.registered.write().insert(name, extended_type);
    }

    /// Append a factory. Earlier factories take precedence.
    pub fn register_factory(&self, factory: Arc<dyn ExtendedTypeFactory>) {
        self.factories.write().push(factory);
    }

    /// Whether a type was registered explicitly under `name`.
    pub fn is_registered(&self, name: &str) -> bool {
        self.registered.read().contains_key(name)
    }

    /// Type for `name`. Never fails: unknown names get a pass-through type.
    pub fn get_registered_type(&self, name: &str) -> Arc<dyn ExtendedType> {
        if let Some(found) = self.registered.read().get(name) {
            return found.clone();
        }

        if let Some(cached) = self.created.get(name) {
            trace!(type_name = name, "type cache hit");
            return cached.clone();
        }

        self.created
            .entry(name.to_string())
            .or_insert_with(|| self.create_type(name))
            .clone()
    }

    fn create_type(&self, name: &str) -> Arc<dyn ExtendedType> {
        let factories = self.factories.read();
        for factory in factories.iter() {
            if let Some(created) = factory.get_type(name) {
                trace!(type_name = name, "type provided by factory");
                return created;
            }
        }
        trace!(type_name = name, "falling back to default type");
        Arc::new(DefaultType::new(name))
    }
}

impl Default for ExtendedTypeMap {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ExtendedTypeMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtendedTypeMap")
            .field("registered", &self.registered.read().len())
            .field("factories", &self.factories.read().len())
            .field("created", &self.created.len())
            .finish()
    }
}
