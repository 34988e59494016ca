//! Turning changed objects into row changes.
//!
//! An object maps to its hierarchy's root table plus one dependent table per
//! vertical inheritance level. Tables are written in dependency order:
//! a table holding a foreign key comes after the table it references, and a
//! dependent table comes after the table whose key it shares.

use std::collections::{BTreeMap, HashMap, HashSet};

use ormgraph_proto::Value;
use tracing::debug;

use super::batch::RowChange;
use crate::error::{Error, Result};
use crate::map::{AttributeDescriptor, ClassDescriptor, DbRelationship, MappingSnapshot, RelationshipDescriptor};
use crate::object::{DataRow, ObjectGraph, ObjectId, ObjectRef, Persistent, Property};
use crate::translator::SqlAdapter;

/// One table an entity writes to.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TableMapping {
    pub table: String,
    /// Db path prefix of the table's columns, empty for the root table.
    pub prefix: String,
    /// Root primary key column and the column of this table holding it.
    pub key_map: Vec<(String, String)>,
}

impl TableMapping {
    pub fn is_root(&self) -> bool {
        self.prefix.is_empty()
    }

    fn owns_attribute(&self, attribute: &AttributeDescriptor) -> bool {
        attribute.table == self.table && column_prefix(&attribute.db_path) == self.prefix
    }

    fn owns_relationship(&self, relationship: &RelationshipDescriptor) -> bool {
        relationship.source_prefix == self.prefix
    }
}

fn column_prefix(db_path: &str) -> &str {
    db_path.rsplit_once('.').map_or("", |(prefix, _)| prefix)
}

/// Tables written for objects of `descriptor`, root table first.
pub(crate) fn table_mappings(snapshot: &MappingSnapshot, descriptor: &ClassDescriptor) -> Result<Vec<TableMapping>> {
    let root_table = descriptor.db_entity_name();
    let mut mappings = vec![TableMapping {
        table: root_table.to_string(),
        prefix: String::new(),
        key_map: descriptor
            .primary_key_names()
            .into_iter()
            .map(|pk| (pk.clone(), pk))
            .collect(),
    }];

    let mut prefixes: Vec<&str> = Vec::new();
    let attribute_prefixes = descriptor.attributes().iter().map(|a| column_prefix(&a.db_path));
    let relationship_prefixes = descriptor.relationships().iter().map(|r| r.source_prefix.as_str());
    for prefix in attribute_prefixes.chain(relationship_prefixes) {
        if !prefix.is_empty() && !prefixes.contains(&prefix) {
            prefixes.push(prefix);
        }
    }
    prefixes.sort_by_key(|p| p.split('.').count());

    for prefix in prefixes {
        let mut table = root_table.to_string();
        let mut key_map = mappings[0].key_map.clone();
        for segment in prefix.split('.') {
            let entity = snapshot.db_entity(&table)?;
            let link = entity.relationship(segment).ok_or_else(|| Error::UnknownRelationship {
                entity: table.clone(),
                name: segment.to_string(),
            })?;
            key_map = key_map
                .into_iter()
                .filter_map(|(root, column)| {
                    link.joins
                        .iter()
                        .find(|j| j.source == column)
                        .map(|j| (root, j.target.clone()))
                })
                .collect();
            table = link.target.clone();
        }
        if key_map.len() != descriptor.primary_key().len() {
            return Err(Error::Mapping(format!(
                "table {table} of entity {} does not share the root primary key",
                descriptor.entity_name()
            )));
        }
        mappings.push(TableMapping {
            table,
            prefix: prefix.to_string(),
            key_map,
        });
    }
    Ok(mappings)
}

/// Whether the source side of `relationship` stores a foreign key.
pub(crate) fn holds_foreign_key(snapshot: &MappingSnapshot, relationship: &DbRelationship) -> Result<bool> {
    if relationship.to_many || relationship.to_dependent_pk {
        return Ok(false);
    }
    let source = snapshot.db_entity(&relationship.source)?;
    let pk = source.primary_key_names();
    Ok(!relationship.source_columns().all(|c| pk.iter().any(|p| p == c)))
}

/// Order `tables` so that referenced and master tables come first.
/// Tables in a cycle keep their given order after the rest.
pub(crate) fn table_order(snapshot: &MappingSnapshot, tables: &[String]) -> Result<Vec<String>> {
    let involved: HashSet<&str> = tables.iter().map(String::as_str).collect();
    // edges: table -> tables that must be written before it
    let mut before: HashMap<&str, HashSet<&str>> = HashMap::new();
    for table in tables {
        for relationship in &snapshot.db_entity(table)?.relationships {
            let target = relationship.target.as_str();
            if target == table.as_str() || !involved.contains(target) || relationship.to_many {
                continue;
            }
            if relationship.to_dependent_pk {
                before.entry(target).or_default().insert(table.as_str());
            } else if holds_foreign_key(snapshot, relationship)? {
                before.entry(table.as_str()).or_default().insert(target);
            }
        }
    }

    let mut ordered: Vec<String> = Vec::with_capacity(tables.len());
    let mut remaining: Vec<&str> = tables.iter().map(String::as_str).collect();
    while !remaining.is_empty() {
        let ready = remaining.iter().position(|t| {
            before
                .get(t)
                .map_or(true, |deps| deps.iter().all(|d| ordered.iter().any(|o| o.as_str() == *d)))
        });
        match ready {
            Some(index) => ordered.push(remaining.remove(index).to_string()),
            None => {
                debug!(tables = ?remaining, "table dependency cycle");
                ordered.extend(remaining.drain(..).map(str::to_string));
            }
        }
    }
    Ok(ordered)
}

fn conversion_error(entity: &str, column: &str, failure: crate::types::ConversionFailure) -> Error {
    Error::TypeConversion {
        entity: entity.to_string(),
        column: column.to_string(),
        expected: failure.expected,
        actual: failure.actual,
    }
}

/// Key of a new object's root row: supplied values, plus the column the
/// database generates, if any.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct PendingKey {
    pub supplied: BTreeMap<String, Value>,
    pub generated: Option<String>,
}

/// Builds row changes for objects of one graph.
pub(crate) struct ChangeBuilder<'a> {
    snapshot: &'a MappingSnapshot,
    adapter: &'a SqlAdapter,
    graph: &'a ObjectGraph,
}

impl<'a> ChangeBuilder<'a> {
    pub fn new(snapshot: &'a MappingSnapshot, adapter: &'a SqlAdapter, graph: &'a ObjectGraph) -> Self {
        Self {
            snapshot,
            adapter,
            graph,
        }
    }

    fn bind(&self, entity: &str, attribute: &AttributeDescriptor, object: &dyn Persistent) -> Result<Value> {
        let value = match object.read_property(&attribute.name) {
            Some(Property::Value(v)) => v,
            _ => Value::Null,
        };
        if value.is_null() {
            if attribute.mandatory && !attribute.generated {
                return Err(Error::NullValue {
                    entity: entity.to_string(),
                    attribute: attribute.name.clone(),
                });
            }
            return Ok(value);
        }
        self.adapter
            .bind_value(Some(&attribute.type_name), &value)
            .map_err(|f| conversion_error(entity, &attribute.column, f))
    }

    /// Source column values of a to-one relationship.
    fn foreign_key(&self, relationship: &RelationshipDescriptor, object: &dyn Persistent) -> Result<Vec<(String, Value)>> {
        let target_id = match object.read_property(&relationship.name) {
            Some(Property::ToOne(Some(target))) => target.read().object_id().cloned(),
            Some(Property::ToOneFault(id)) => Some(id),
            _ => None,
        };
        if let Some(id) = &target_id {
            if id.is_temporary() {
                return Err(Error::MissingIdentity {
                    entity: id.entity_name().to_string(),
                    column: relationship
                        .db_relationship
                        .target_columns()
                        .next()
                        .unwrap_or_default()
                        .to_string(),
                });
            }
        }
        Ok(relationship
            .db_relationship
            .joins
            .iter()
            .map(|join| {
                let value = target_id
                    .as_ref()
                    .and_then(|id| id.value(&join.target).cloned())
                    .unwrap_or(Value::Null);
                (join.source.clone(), value)
            })
            .collect())
    }

    fn foreign_keys<'d>(
        &self,
        descriptor: &'d ClassDescriptor,
        mapping: &TableMapping,
    ) -> Result<Vec<&'d RelationshipDescriptor>> {
        let mut found = Vec::new();
        for relationship in descriptor.relationships() {
            if mapping.owns_relationship(relationship) && holds_foreign_key(self.snapshot, &relationship.db_relationship)? {
                found.push(relationship);
            }
        }
        Ok(found)
    }

    /// Row inserting `object` into `mapping`'s table. For the root table
    /// of an object with a temporary id, also returns how its key is made.
    pub fn insert(
        &self,
        descriptor: &ClassDescriptor,
        mapping: &TableMapping,
        object: &ObjectRef,
    ) -> Result<(RowChange, Option<PendingKey>)> {
        let guard = object.read();
        let entity = descriptor.entity_name();
        let id = guard.object_id().cloned().ok_or_else(|| Error::ObjectWithoutId {
            entity: entity.to_string(),
        })?;
        let mut change = RowChange::insert(&mapping.table).for_object(id.clone());
        let mut pending = None;

        if id.is_temporary() {
            if !mapping.is_root() {
                return Err(Error::MissingIdentity {
                    entity: entity.to_string(),
                    column: mapping.key_map.first().map(|(_, c)| c.clone()).unwrap_or_default(),
                });
            }
            let mut key = PendingKey::default();
            for pk in descriptor.primary_key() {
                let mapped = descriptor
                    .attributes()
                    .iter()
                    .find(|a| a.primary_key && a.column == pk.name && mapping.owns_attribute(a));
                let value = match mapped {
                    Some(attribute) => self.bind(entity, attribute, &*guard)?,
                    None => Value::Null,
                };
                if !value.is_null() {
                    change = change.with_value(&pk.name, value.clone());
                    key.supplied.insert(pk.name.clone(), value);
                } else if pk.generated && key.generated.is_none() {
                    change = change.with_generated_key(&pk.name);
                    key.generated = Some(pk.name.clone());
                } else {
                    return Err(Error::MissingIdentity {
                        entity: entity.to_string(),
                        column: pk.name.clone(),
                    });
                }
            }
            pending = Some(key);
        } else {
            for (root, column) in &mapping.key_map {
                change = change.with_value(column, id.value(root).cloned().unwrap_or(Value::Null));
            }
        }

        let table = self.snapshot.db_entity(&mapping.table)?;
        for discriminator in &descriptor.entity().discriminator {
            if mapping.is_root() && table.attribute(&discriminator.column).is_some() {
                change = change.with_value(&discriminator.column, discriminator.value.clone());
            }
        }
        for attribute in descriptor.attributes() {
            if mapping.owns_attribute(attribute) && !attribute.primary_key {
                change = change.with_value(&attribute.column, self.bind(entity, attribute, &*guard)?);
            }
        }
        for relationship in self.foreign_keys(descriptor, mapping)? {
            for (column, value) in self.foreign_key(relationship, &*guard)? {
                change = change.with_value(column, value);
            }
        }
        Ok((change, pending))
    }

    fn qualify(
        &self,
        mut change: RowChange,
        descriptor: &ClassDescriptor,
        mapping: &TableMapping,
        id: &ObjectId,
    ) -> RowChange {
        for (root, column) in &mapping.key_map {
            change = change.with_qualifier(column, id.value(root).cloned().unwrap_or(Value::Null));
        }
        if descriptor.optimistic_locking() {
            let snapshot = self.graph.snapshot(id);
            for attribute in descriptor.locking_attributes() {
                if mapping.owns_attribute(attribute) && !attribute.primary_key {
                    let old = snapshot
                        .and_then(|row| row.get(&attribute.db_path))
                        .cloned()
                        .unwrap_or(Value::Null);
                    change = change.with_qualifier(&attribute.column, old);
                }
            }
            change = change.with_optimistic_locking();
        }
        change
    }

    fn permanent_id(&self, descriptor: &ClassDescriptor, object: &dyn Persistent) -> Result<ObjectId> {
        match object.object_id() {
            Some(id) if !id.is_temporary() => Ok(id.clone()),
            _ => Err(Error::ObjectWithoutId {
                entity: descriptor.entity_name().to_string(),
            }),
        }
    }

    /// Row updating the changed columns of `object` in `mapping`'s table,
    /// `None` when none of them changed.
    pub fn update(&self, descriptor: &ClassDescriptor, mapping: &TableMapping, object: &ObjectRef) -> Result<Option<RowChange>> {
        let guard = object.read();
        let entity = descriptor.entity_name();
        let dirty = guard.dirty_properties();
        let id = self.permanent_id(descriptor, &*guard)?;
        let mut change = RowChange::update(&mapping.table).for_object(id.clone());

        for attribute in descriptor.attributes() {
            if mapping.owns_attribute(attribute) && !attribute.primary_key && dirty.contains(&attribute.name) {
                change = change.with_value(&attribute.column, self.bind(entity, attribute, &*guard)?);
            }
        }
        for relationship in self.foreign_keys(descriptor, mapping)? {
            if dirty.contains(&relationship.name) {
                for (column, value) in self.foreign_key(relationship, &*guard)? {
                    change = change.with_value(column, value);
                }
            }
        }
        if change.columns().is_empty() {
            return Ok(None);
        }
        Ok(Some(self.qualify(change, descriptor, mapping, &id)))
    }

    /// Row deleting `object` from `mapping`'s table.
    pub fn delete(&self, descriptor: &ClassDescriptor, mapping: &TableMapping, object: &ObjectRef) -> Result<RowChange> {
        let guard = object.read();
        let id = self.permanent_id(descriptor, &*guard)?;
        let change = RowChange::delete(&mapping.table).for_object(id.clone());
        Ok(self.qualify(change, descriptor, mapping, &id))
    }
}

/// Data row mirroring an object's committed state, keyed like fetched rows.
pub(crate) fn object_row(descriptor: &ClassDescriptor, object: &dyn Persistent) -> DataRow {
    let mut row = DataRow::for_entity(object.entity_name());
    if let Some(id) = object.object_id() {
        for (column, value) in id.key() {
            row.insert(column.clone(), value.clone());
        }
    }
    for attribute in descriptor.attributes() {
        if let Some(Property::Value(value)) = object.read_property(&attribute.name) {
            row.insert(attribute.db_path.clone(), value);
        }
    }
    for relationship in descriptor.relationships().iter().filter(|r| !r.to_many) {
        let target_id = match object.read_property(&relationship.name) {
            Some(Property::ToOne(Some(target))) => target.read().object_id().cloned(),
            Some(Property::ToOneFault(id)) => Some(id),
            Some(Property::ToOne(None)) => None,
            _ => continue,
        };
        let pairs = relationship
            .source_column_paths()
            .into_iter()
            .zip(relationship.db_relationship.target_columns());
        for (path, target_column) in pairs {
            if row.contains(&path) {
                continue;
            }
            let value = target_id
                .as_ref()
                .and_then(|id| id.value(target_column).cloned())
                .unwrap_or(Value::Null);
            row.insert(path, value);
        }
    }
    row
}
