//! Adapter: capability descriptor plus the value types used for bindings.

use std::sync::Arc;

use ormgraph_proto::Value;

use crate::config::AdapterCapabilities;
use crate::error::{Error, Result};
use crate::types::{ConversionFailure, ExtendedTypeMap};

/// What the translator knows about the target database.
#[derive(Debug, Clone)]
pub struct SqlAdapter {
    capabilities: AdapterCapabilities,
    types: Arc<ExtendedTypeMap>,
}

impl SqlAdapter {
    /// Create an adapter with the built-in value types.
    pub fn new(capabilities: AdapterCapabilities) -> Self {
        Self {
            capabilities,
            types: Arc::new(ExtendedTypeMap::new()),
        }
    }

    /// Use a shared type registry.
    pub fn with_types(mut self, types: Arc<ExtendedTypeMap>) -> Self {
        self.types = types;
        self
    }

    pub fn capabilities(&self) -> &AdapterCapabilities {
        &self.capabilities
    }

    pub fn types(&self) -> &Arc<ExtendedTypeMap> {
        &self.types
    }

    pub fn name(&self) -> &str {
        &self.capabilities.name
    }

    /// Quote a table or column identifier.
    pub fn quote(&self, identifier: &str) -> String {
        self.capabilities.quote(identifier)
    }

    /// SQL name of an expression function.
    pub fn function_name(&self, name: &str) -> Result<&str> {
        self.capabilities
            .functions
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
            .ok_or_else(|| Error::Unsupported(format!("function {name} on adapter {}", self.capabilities.name)))
    }

    /// Convert an attribute value for binding.
    pub fn bind_value(&self, type_name: Option<&str>, value: &Value) -> std::result::Result<Value, ConversionFailure> {
        match type_name {
            Some(name) if !value.is_null() => self.types.get_registered_type(name).to_bind_value(value),
            _ => Ok(value.clone()),
        }
    }

    /// Convert a value read from a result row.
    pub fn materialize(&self, type_name: Option<&str>, raw: Value) -> std::result::Result<Value, ConversionFailure> {
        match type_name {
            Some(name) => self.types.get_registered_type(name).materialize(raw),
            None => Ok(raw),
        }
    }
}

impl Default for SqlAdapter {
    fn default() -> Self {
        Self::new(AdapterCapabilities::default())
    }
}
