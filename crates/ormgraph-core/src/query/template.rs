//! Raw SQL templates.

use std::collections::BTreeMap;
use std::sync::Arc;

use ormgraph_proto::Value;

use super::metadata::{MetadataCell, QueryMetadata};
use super::QueryRoot;
use crate::error::Result;
use crate::map::EntityResolver;

/// A SQL statement with `#bind($x)`, `#bindEqual($x)`, `#bindNotEqual($x)`
/// directives and `$x` substitutions.
///
/// Results are data rows unless a root entity is given and data rows were
/// not requested.
#[derive(Debug, Clone)]
pub struct SqlTemplate {
    root: Option<QueryRoot>,
    name: Option<String>,
    default_template: String,
    adapter_templates: BTreeMap<String, String>,
    parameters: BTreeMap<String, Value>,
    fetching_data_rows: bool,
    metadata: MetadataCell,
}

impl SqlTemplate {
    /// Create a template returning data rows.
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            root: None,
            name: None,
            default_template: template.into(),
            adapter_templates: BTreeMap::new(),
            parameters: BTreeMap::new(),
            fetching_data_rows: true,
            metadata: MetadataCell::default(),
        }
    }

    /// Materialize results as objects of `entity`.
    pub fn for_entity(entity: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            root: Some(QueryRoot::Entity(entity.into())),
            fetching_data_rows: false,
            ..Self::new(template)
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Template used instead of the default one for the named adapter.
    pub fn with_adapter_template(mut self, adapter: impl Into<String>, template: impl Into<String>) -> Self {
        self.adapter_templates.insert(adapter.into(), template.into());
        self
    }

    /// Set a named parameter.
    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    /// Return data rows even when a root entity is set.
    pub fn data_rows(mut self) -> Self {
        self.fetching_data_rows = true;
        self.metadata.reset();
        self
    }

    pub fn root(&self) -> Option<&QueryRoot> {
        self.root.as_ref()
    }

    pub fn parameters(&self) -> &BTreeMap<String, Value> {
        &self.parameters
    }

    /// Template text for an adapter, falling back to the default.
    pub fn template_for(&self, adapter: &str) -> &str {
        self.adapter_templates
            .get(adapter)
            .map(String::as_str)
            .unwrap_or(&self.default_template)
    }

    pub fn description(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("template [{}]", self.default_template))
    }

    pub fn metadata(&self, resolver: &EntityResolver) -> Result<Arc<QueryMetadata>> {
        self.metadata.get_or_resolve(resolver, || {
            let descriptor = match &self.root {
                Some(root) => root.resolve(resolver)?,
                None => None,
            };
            let mut md = QueryMetadata::new(resolver, descriptor);
            md.fetching_data_rows = self.fetching_data_rows || md.descriptor.is_none();
            if let Some(QueryRoot::DbEntity(table)) = &self.root {
                md.db_entity = Some(table.clone());
            }
            Ok(md)
        })
    }
}
