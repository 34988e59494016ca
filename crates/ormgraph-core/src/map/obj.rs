//! Object side of the mapping: persistent entities, their attributes and
//! relationships.

use ormgraph_proto::Value;
use serde::{Deserialize, Serialize};

/// A persistent attribute mapped to one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjAttribute {
    /// Property name.
    pub name: String,
    /// Column name on the entity's table.
    pub db_attribute: String,
    /// Value type name, the key into the type registry.
    pub type_name: String,
    /// Include the committed value in optimistic-lock qualifiers.
    #[serde(default)]
    pub used_for_locking: bool,
}

impl ObjAttribute {
    /// Create an attribute.
    pub fn new(
        name: impl Into<String>,
        db_attribute: impl Into<String>,
        type_name: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            db_attribute: db_attribute.into(),
            type_name: type_name.into(),
            used_for_locking: false,
        }
    }

    /// Include in optimistic-lock qualifiers.
    pub fn used_for_locking(mut self) -> Self {
        self.used_for_locking = true;
        self
    }
}

/// A relationship to another persistent entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjRelationship {
    /// Property name.
    pub name: String,
    /// Target entity name.
    pub target: String,
    /// Name of the db relationship on the source table.
    pub db_relationship: String,
    /// Declared reverse relationship on the target entity.
    #[serde(default)]
    pub reverse: Option<String>,
}

impl ObjRelationship {
    /// Create a relationship.
    pub fn new(
        name: impl Into<String>,
        target: impl Into<String>,
        db_relationship: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            db_relationship: db_relationship.into(),
            reverse: None,
        }
    }

    /// Declare the reverse relationship.
    pub fn with_reverse(mut self, reverse: impl Into<String>) -> Self {
        self.reverse = Some(reverse.into());
        self
    }
}

/// One column condition selecting a subclass in an inheritance hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Discriminator {
    /// Discriminator column on the hierarchy's root table.
    pub column: String,
    /// Value identifying the entity.
    pub value: Value,
}

impl Discriminator {
    /// Create a discriminator condition.
    pub fn new(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }
}

/// A persistent entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjEntity {
    /// Entity name.
    pub name: String,
    /// Class name used for class-based lookups; defaults to the entity name.
    #[serde(default)]
    pub class_name: Option<String>,
    /// Table name. Subentities without one share their parent's table.
    #[serde(default)]
    pub db_entity: Option<String>,
    /// Parent entity in an inheritance hierarchy.
    #[serde(default)]
    pub super_entity: Option<String>,
    /// Abstract entities are never instantiated.
    #[serde(default, rename = "abstract")]
    pub is_abstract: bool,
    /// Conditions on the root table identifying rows of this entity.
    #[serde(default)]
    pub discriminator: Vec<Discriminator>,
    /// Attributes declared on this entity (inherited ones excluded).
    #[serde(default)]
    pub attributes: Vec<ObjAttribute>,
    /// Relationships declared on this entity (inherited ones excluded).
    #[serde(default)]
    pub relationships: Vec<ObjRelationship>,
    /// Updates and deletes qualify on attributes marked for locking.
    #[serde(default)]
    pub optimistic_locking: bool,
}

impl ObjEntity {
    /// Create an entity mapped to a table.
    pub fn new(name: impl Into<String>, db_entity: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            class_name: None,
            db_entity: Some(db_entity.into()),
            super_entity: None,
            is_abstract: false,
            discriminator: Vec::new(),
            attributes: Vec::new(),
            relationships: Vec::new(),
            optimistic_locking: false,
        }
    }

    /// Create a subentity sharing its parent's table.
    pub fn subentity(name: impl Into<String>, super_entity: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            class_name: None,
            db_entity: None,
            super_entity: Some(super_entity.into()),
            is_abstract: false,
            discriminator: Vec::new(),
            attributes: Vec::new(),
            relationships: Vec::new(),
            optimistic_locking: false,
        }
    }

    /// Set the class name.
    pub fn with_class_name(mut self, class_name: impl Into<String>) -> Self {
        self.class_name = Some(class_name.into());
        self
    }

    /// Map a subentity to its own table (vertical inheritance).
    pub fn with_db_entity(mut self, db_entity: impl Into<String>) -> Self {
        self.db_entity = Some(db_entity.into());
        self
    }

    /// Mark abstract.
    pub fn abstract_entity(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    /// Add a discriminator condition.
    pub fn with_discriminator(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.discriminator.push(Discriminator::new(column, value));
        self
    }

    /// Add an attribute.
    pub fn with_attribute(mut self, attribute: ObjAttribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// Add a relationship.
    pub fn with_relationship(mut self, relationship: ObjRelationship) -> Self {
        self.relationships.push(relationship);
        self
    }

    /// Enable optimistic locking.
    pub fn with_optimistic_locking(mut self) -> Self {
        self.optimistic_locking = true;
        self
    }

    /// Class name, falling back to the entity name.
    pub fn class_name(&self) -> &str {
        self.class_name.as_deref().unwrap_or(&self.name)
    }

    /// Find a declared attribute.
    pub fn attribute(&self, name: &str) -> Option<&ObjAttribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Find a declared relationship.
    pub fn relationship(&self, name: &str) -> Option<&ObjRelationship> {
        self.relationships.iter().find(|r| r.name == name)
    }
}
