//! Declarative mapping description consumed by the entity resolver.

use serde::{Deserialize, Serialize};

use super::db::DbEntity;
use super::obj::ObjEntity;
use super::procedure::Procedure;
use crate::error::Result;

/// A complete mapping: tables, entities and procedures.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DataMap {
    /// Map name, used in diagnostics.
    pub name: String,
    /// Mapped tables.
    #[serde(default)]
    pub db_entities: Vec<DbEntity>,
    /// Persistent entities.
    #[serde(default)]
    pub obj_entities: Vec<ObjEntity>,
    /// Stored procedures.
    #[serde(default)]
    pub procedures: Vec<Procedure>,
}

impl DataMap {
    /// Create an empty map.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Parse a JSON mapping description.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Render as pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Add a table.
    pub fn with_db_entity(mut self, entity: DbEntity) -> Self {
        self.db_entities.push(entity);
        self
    }

    /// Add a persistent entity.
    pub fn with_obj_entity(mut self, entity: ObjEntity) -> Self {
        self.obj_entities.push(entity);
        self
    }

    /// Add a procedure.
    pub fn with_procedure(mut self, procedure: Procedure) -> Self {
        self.procedures.push(procedure);
        self
    }

    /// Find a table by name.
    pub fn db_entity(&self, name: &str) -> Option<&DbEntity> {
        self.db_entities.iter().find(|e| e.name == name)
    }

    /// Find a persistent entity by name.
    pub fn obj_entity(&self, name: &str) -> Option<&ObjEntity> {
        self.obj_entities.iter().find(|e| e.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_map_from_json() {
        let json = r#"{
            "name": "gallery",
            "db_entities": [{
                "name": "ARTIST",
                "attributes": [
                    { "name": "ARTIST_ID", "primary_key": true, "generated": true },
                    { "name": "ARTIST_NAME", "mandatory": true }
                ]
            }],
            "obj_entities": [{
                "name": "Artist",
                "db_entity": "ARTIST",
                "attributes": [
                    { "name": "artistName", "db_attribute": "ARTIST_NAME", "type_name": "String" }
                ]
            }]
        }"#;

        let map = DataMap::from_json(json).unwrap();
        assert_eq!(map.name, "gallery");
        let artist = map.db_entity("ARTIST").unwrap();
        assert!(artist.attribute("ARTIST_ID").unwrap().generated);
        assert!(artist.relationships.is_empty());
        assert_eq!(map.obj_entity("Artist").unwrap().class_name(), "Artist");

        let reparsed = DataMap::from_json(&map.to_json().unwrap()).unwrap();
        assert_eq!(reparsed, map);
    }
}
