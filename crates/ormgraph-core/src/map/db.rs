//! Relational side of the mapping: tables, columns and foreign-key joins.

use serde::{Deserialize, Serialize};

/// A mapped column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbAttribute {
    /// Column name.
    pub name: String,
    /// Part of the primary key.
    #[serde(default)]
    pub primary_key: bool,
    /// Value is generated by the database on insert.
    #[serde(default)]
    pub generated: bool,
    /// Column is declared NOT NULL.
    #[serde(default)]
    pub mandatory: bool,
}

impl DbAttribute {
    /// Create a nullable column.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: false,
            generated: false,
            mandatory: false,
        }
    }

    /// Create a primary key column.
    pub fn primary_key(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: true,
            generated: false,
            mandatory: true,
        }
    }

    /// Mark the column generated on insert.
    pub fn generated(mut self) -> Self {
        self.generated = true;
        self
    }

    /// Mark the column NOT NULL.
    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }
}

/// One column pair of a relationship join.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DbJoin {
    /// Column on the source table.
    pub source: String,
    /// Column on the target table.
    pub target: String,
}

impl DbJoin {
    /// Create a join column pair.
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }

    /// The same pair seen from the target side.
    pub fn reversed(&self) -> Self {
        Self {
            source: self.target.clone(),
            target: self.source.clone(),
        }
    }
}

/// A relationship between two tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbRelationship {
    /// Relationship name, unique within the source table.
    pub name: String,
    /// Source table.
    pub source: String,
    /// Target table.
    pub target: String,
    /// Join column pairs.
    pub joins: Vec<DbJoin>,
    /// Each source row may match many target rows.
    #[serde(default)]
    pub to_many: bool,
    /// Target primary key depends on the source primary key (1:1 on PKs).
    #[serde(default)]
    pub to_dependent_pk: bool,
    /// Created by the resolver because no mirrored relationship was mapped.
    #[serde(skip)]
    pub runtime: bool,
}

impl DbRelationship {
    /// Create a to-one relationship.
    pub fn to_one(name: impl Into<String>, source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            target: target.into(),
            joins: Vec::new(),
            to_many: false,
            to_dependent_pk: false,
            runtime: false,
        }
    }

    /// Create a to-many relationship.
    pub fn to_many(name: impl Into<String>, source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            to_many: true,
            ..Self::to_one(name, source, target)
        }
    }

    /// Add a join column pair.
    pub fn with_join(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.joins.push(DbJoin::new(source, target));
        self
    }

    /// Mark the target primary key as dependent on the source's.
    pub fn to_dependent_pk(mut self) -> Self {
        self.to_dependent_pk = true;
        self
    }

    /// Whether `other` joins the same columns in the opposite direction.
    pub fn mirrors(&self, other: &DbRelationship) -> bool {
        if self.source != other.target || self.target != other.source {
            return false;
        }
        if self.joins.len() != other.joins.len() {
            return false;
        }
        self.joins
            .iter()
            .all(|j| other.joins.contains(&j.reversed()))
    }

    /// Source-side columns in join order.
    pub fn source_columns(&self) -> impl Iterator<Item = &str> {
        self.joins.iter().map(|j| j.source.as_str())
    }

    /// Target-side columns in join order.
    pub fn target_columns(&self) -> impl Iterator<Item = &str> {
        self.joins.iter().map(|j| j.target.as_str())
    }
}

/// A mapped table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbEntity {
    /// Table name, optionally schema-qualified.
    pub name: String,
    /// Columns.
    pub attributes: Vec<DbAttribute>,
    /// Outgoing relationships.
    #[serde(default)]
    pub relationships: Vec<DbRelationship>,
}

impl DbEntity {
    /// Create an empty table mapping.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            relationships: Vec::new(),
        }
    }

    /// Add a column.
    pub fn with_attribute(mut self, attribute: DbAttribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// Add an outgoing relationship.
    pub fn with_relationship(mut self, relationship: DbRelationship) -> Self {
        self.relationships.push(relationship);
        self
    }

    /// Find a column by name.
    pub fn attribute(&self, name: &str) -> Option<&DbAttribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Find a relationship by name.
    pub fn relationship(&self, name: &str) -> Option<&DbRelationship> {
        self.relationships.iter().find(|r| r.name == name)
    }

    /// Primary key columns in declaration order.
    pub fn primary_key(&self) -> impl Iterator<Item = &DbAttribute> {
        self.attributes.iter().filter(|a| a.primary_key)
    }

    /// Names of the primary key columns.
    pub fn primary_key_names(&self) -> Vec<String> {
        self.primary_key().map(|a| a.name.clone()).collect()
    }

    /// Relationship going back along `relationship`, if mapped.
    pub fn reverse_of(&self, relationship: &DbRelationship) -> Option<&DbRelationship> {
        self.relationships.iter().find(|r| relationship.mirrors(r))
    }
}
