//! Stored procedure calls.

use std::collections::BTreeMap;
use std::sync::Arc;

use ormgraph_proto::Value;

use super::metadata::{MetadataCell, QueryMetadata};
use super::QueryRoot;
use crate::error::Result;
use crate::map::EntityResolver;

/// Call of a mapped procedure with IN and INOUT values.
#[derive(Debug, Clone)]
pub struct ProcedureQuery {
    procedure: String,
    parameters: BTreeMap<String, Value>,
    root: Option<QueryRoot>,
    metadata: MetadataCell,
}

impl ProcedureQuery {
    pub fn new(procedure: impl Into<String>) -> Self {
        Self {
            procedure: procedure.into(),
            parameters: BTreeMap::new(),
            root: None,
            metadata: MetadataCell::default(),
        }
    }

    /// Set an IN or INOUT parameter.
    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    /// Materialize the first result set as objects of `entity`.
    pub fn with_result_entity(mut self, entity: impl Into<String>) -> Self {
        self.root = Some(QueryRoot::Entity(entity.into()));
        self.metadata.reset();
        self
    }

    pub fn procedure(&self) -> &str {
        &self.procedure
    }

    pub fn parameters(&self) -> &BTreeMap<String, Value> {
        &self.parameters
    }

    pub fn description(&self) -> String {
        format!("call {}", self.procedure)
    }

    pub fn metadata(&self, resolver: &EntityResolver) -> Result<Arc<QueryMetadata>> {
        self.metadata.get_or_resolve(resolver, || {
            resolver.snapshot()?.procedure(&self.procedure)?;
            let descriptor = match &self.root {
                Some(root) => root.resolve(resolver)?,
                None => None,
            };
            Ok(QueryMetadata::new(resolver, descriptor))
        })
    }
}
