//! Class descriptors: an entity's mapping flattened across its inheritance
//! chain, with every column addressed by a db path from the root table.

use std::sync::Arc;

use super::db::{DbAttribute, DbRelationship};
use super::obj::ObjEntity;
use super::resolver::MappingSnapshot;
use crate::error::{Error, Result};
use crate::object::{DataRow, ObjectId};

/// A persistent attribute resolved to its column.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeDescriptor {
    /// Property name.
    pub name: String,
    /// Column name.
    pub column: String,
    /// Table owning the column.
    pub table: String,
    /// Path from the hierarchy's root table, e.g. `COL` or `toSub.COL`.
    pub db_path: String,
    /// Value type name.
    pub type_name: String,
    /// Column is NOT NULL.
    pub mandatory: bool,
    /// Column is part of the primary key.
    pub primary_key: bool,
    /// Column value is generated on insert.
    pub generated: bool,
    /// Included in optimistic-lock qualifiers.
    pub used_for_locking: bool,
    /// Entity declaring the attribute.
    pub declared_by: String,
}

/// A relationship resolved to its db relationship.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipDescriptor {
    /// Property name.
    pub name: String,
    /// Target entity name.
    pub target: String,
    /// Whether the relationship is to-many.
    pub to_many: bool,
    /// Declared reverse relationship.
    pub reverse: Option<String>,
    /// Underlying db relationship.
    pub db_relationship: DbRelationship,
    /// Path from the root table to the relationship's source table.
    pub source_prefix: String,
}

impl RelationshipDescriptor {
    /// Db path of the relationship from the root table.
    pub fn db_path(&self) -> String {
        join_path(&self.source_prefix, &self.db_relationship.name)
    }

    /// Db paths of the source join columns from the root table.
    pub fn source_column_paths(&self) -> Vec<String> {
        self.db_relationship
            .source_columns()
            .map(|c| join_path(&self.source_prefix, c))
            .collect()
    }
}

pub(crate) fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

/// Resolved mapping of one entity.
#[derive(Debug, Clone)]
pub struct ClassDescriptor {
    entity: Arc<ObjEntity>,
    root_entity: String,
    db_entity: String,
    primary_key: Vec<DbAttribute>,
    attributes: Vec<AttributeDescriptor>,
    relationships: Vec<RelationshipDescriptor>,
    sub_entities: Vec<String>,
    optimistic_locking: bool,
}

impl ClassDescriptor {
    pub(crate) fn build(snapshot: &MappingSnapshot, entity_name: &str) -> Result<Self> {
        let entity = snapshot.obj_entity(entity_name)?.clone();

        let mut chain = vec![entity.clone()];
        while let Some(parent) = snapshot.super_entity(chain[chain.len() - 1].as_ref())? {
            chain.push(parent.clone());
        }
        chain.reverse();

        let root = chain[0].clone();
        let root_table = snapshot.effective_db_entity(&root)?;

        let mut attributes: Vec<AttributeDescriptor> = Vec::new();
        let mut relationships: Vec<RelationshipDescriptor> = Vec::new();
        let mut parent_table = root_table.name.clone();
        let mut prefix = String::new();

        for level in &chain {
            let table = snapshot.effective_db_entity(level)?;
            if table.name != parent_table {
                let parent = snapshot.db_entity(&parent_table)?;
                let link = parent
                    .relationships
                    .iter()
                    .find(|r| r.target == table.name && !r.to_many)
                    .ok_or_else(|| {
                        Error::Mapping(format!(
                            "entity {} is mapped to {} but {} has no to-one relationship to it",
                            level.name, table.name, parent_table
                        ))
                    })?;
                prefix = join_path(&prefix, &link.name);
                parent_table = table.name.clone();
            }

            for attribute in &level.attributes {
                let column = table.attribute(&attribute.db_attribute).ok_or_else(|| {
                    Error::UnknownAttribute {
                        entity: table.name.clone(),
                        path: attribute.db_attribute.clone(),
                    }
                })?;
                let descriptor = AttributeDescriptor {
                    name: attribute.name.clone(),
                    column: column.name.clone(),
                    table: table.name.clone(),
                    db_path: join_path(&prefix, &column.name),
                    type_name: attribute.type_name.clone(),
                    mandatory: column.mandatory,
                    primary_key: column.primary_key,
                    generated: column.generated,
                    used_for_locking: attribute.used_for_locking,
                    declared_by: level.name.clone(),
                };
                attributes.retain(|a| a.name != descriptor.name);
                attributes.push(descriptor);
            }

            for relationship in &level.relationships {
                let db_relationship = table
                    .relationship(&relationship.db_relationship)
                    .ok_or_else(|| Error::UnknownRelationship {
                        entity: table.name.clone(),
                        name: relationship.db_relationship.clone(),
                    })?;
                relationships.retain(|r| r.name != relationship.name);
                relationships.push(RelationshipDescriptor {
                    name: relationship.name.clone(),
                    target: relationship.target.clone(),
                    to_many: db_relationship.to_many,
                    reverse: relationship.reverse.clone(),
                    db_relationship: db_relationship.clone(),
                    source_prefix: prefix.clone(),
                });
            }
        }

        let sub_entities = snapshot
            .inheritance_tree(&entity.name)
            .map(|tree| {
                tree.entities()
                    .into_iter()
                    .skip(1)
                    .map(|e| e.name.clone())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            optimistic_locking: chain.iter().any(|e| e.optimistic_locking),
            root_entity: root.name.clone(),
            db_entity: root_table.name.clone(),
            primary_key: root_table.primary_key().cloned().collect(),
            entity,
            attributes,
            relationships,
            sub_entities,
        })
    }

    /// Entity name.
    pub fn entity_name(&self) -> &str {
        &self.entity.name
    }

    /// The mapped entity.
    pub fn entity(&self) -> &ObjEntity {
        &self.entity
    }

    /// Class name.
    pub fn class_name(&self) -> &str {
        self.entity.class_name()
    }

    /// Whether the entity is abstract.
    pub fn is_abstract(&self) -> bool {
        self.entity.is_abstract
    }

    /// Root entity of the inheritance hierarchy; names object identities.
    pub fn root_entity(&self) -> &str {
        &self.root_entity
    }

    /// Root table.
    pub fn db_entity_name(&self) -> &str {
        &self.db_entity
    }

    /// Primary key columns of the root table.
    pub fn primary_key(&self) -> &[DbAttribute] {
        &self.primary_key
    }

    /// Primary key column names.
    pub fn primary_key_names(&self) -> Vec<String> {
        self.primary_key.iter().map(|a| a.name.clone()).collect()
    }

    /// All attributes, inherited ones first.
    pub fn attributes(&self) -> &[AttributeDescriptor] {
        &self.attributes
    }

    /// Attribute by property name.
    pub fn attribute(&self, name: &str) -> Option<&AttributeDescriptor> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// All relationships, inherited ones first.
    pub fn relationships(&self) -> &[RelationshipDescriptor] {
        &self.relationships
    }

    /// Relationship by property name.
    pub fn relationship(&self, name: &str) -> Option<&RelationshipDescriptor> {
        self.relationships.iter().find(|r| r.name == name)
    }

    /// Names of all entities below this one in the hierarchy.
    pub fn sub_entities(&self) -> &[String] {
        &self.sub_entities
    }

    /// Whether updates and deletes carry an optimistic-lock qualifier.
    pub fn optimistic_locking(&self) -> bool {
        self.optimistic_locking
    }

    /// Attributes included in optimistic-lock qualifiers.
    pub fn locking_attributes(&self) -> impl Iterator<Item = &AttributeDescriptor> {
        self.attributes.iter().filter(|a| a.used_for_locking)
    }

    /// Identity of the object stored in `row`, if all key columns are set.
    pub fn object_id_for(&self, row: &DataRow) -> Option<ObjectId> {
        row.object_id(&self.root_entity, &self.primary_key_names())
    }

    /// First primary key column absent or null in `row`.
    pub fn missing_key_column(&self, row: &DataRow) -> Option<&str> {
        self.primary_key
            .iter()
            .find(|pk| row.get(&pk.name).map(|v| v.is_null()).unwrap_or(true))
            .map(|pk| pk.name.as_str())
    }
}
