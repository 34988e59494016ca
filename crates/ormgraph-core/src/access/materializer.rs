//! Building persistent objects from data rows.

use std::collections::BTreeMap;

use ormgraph_proto::Value;
use tracing::trace;

use crate::error::{Error, Result};
use crate::map::{ClassDescriptor, EntityResolver, MappingSnapshot, RelationshipDescriptor};
use crate::object::{DataRow, ObjectGraph, ObjectId, ObjectRef, PersistenceState, Property};

/// Creates objects for data rows and merges them into a graph.
pub struct Materializer<'a> {
    resolver: &'a EntityResolver,
    snapshot: &'a MappingSnapshot,
}

impl<'a> Materializer<'a> {
    pub fn new(resolver: &'a EntityResolver, snapshot: &'a MappingSnapshot) -> Self {
        Self { resolver, snapshot }
    }

    /// Materialize `row` and merge it into `graph`, returning the instance
    /// registered for its identity.
    pub fn materialize(&self, row: &DataRow, graph: &mut ObjectGraph) -> Result<ObjectRef> {
        let entity = row.entity_name().ok_or_else(|| Error::NoMatchingEntity {
            entity: String::from("<untagged row>"),
        })?;
        let descriptor = self.snapshot.class_descriptor(entity)?;
        let id = descriptor.object_id_for(row).ok_or_else(|| Error::MissingIdentity {
            entity: entity.to_string(),
            column: descriptor.missing_key_column(row).unwrap_or_default().to_string(),
        })?;

        let object = self.resolver.object_factory(entity).create(entity);
        {
            let mut guard = object.write();
            guard.set_object_id(id.clone());

            for attribute in descriptor.attributes() {
                let Some(value) = row.get(&attribute.db_path) else {
                    continue;
                };
                if value.is_null() && attribute.mandatory && !attribute.primary_key {
                    return Err(Error::NullValue {
                        entity: entity.to_string(),
                        attribute: attribute.name.clone(),
                    });
                }
                guard.write_property(&attribute.name, Property::Value(value.clone()));
            }

            for relationship in descriptor.relationships() {
                if let Some(property) = self.relationship_fault(relationship, row)? {
                    guard.write_property(&relationship.name, property);
                }
            }
        }

        let keep_snapshot = graph
            .get(&id)
            .map(|existing| existing.read().persistence_state() == PersistenceState::Committed)
            .unwrap_or(true);
        if keep_snapshot {
            graph.set_snapshot(id.clone(), row.clone());
        }
        trace!(object_id = %id, "materialized object");
        graph.merge_object(object)
    }

    /// Fault for a relationship, or `None` when the row lacks the columns
    /// to build one.
    fn relationship_fault(&self, relationship: &RelationshipDescriptor, row: &DataRow) -> Result<Option<Property>> {
        if relationship.to_many {
            return Ok(Some(Property::ToManyFault));
        }
        let Some(target_id) = self.target_id(relationship, row)? else {
            return Ok(None);
        };
        Ok(Some(match target_id {
            Some(id) => Property::ToOneFault(id),
            None => Property::ToOne(None),
        }))
    }

    /// Identity of a to-one target read from the source row's join
    /// columns. The outer `None` means the columns were not selected, the
    /// inner one a null foreign key.
    pub(crate) fn target_id(
        &self,
        relationship: &RelationshipDescriptor,
        row: &DataRow,
    ) -> Result<Option<Option<ObjectId>>> {
        let target = self.snapshot.class_descriptor(&relationship.target)?;
        let mut key = BTreeMap::new();
        let pairs = relationship
            .source_column_paths()
            .into_iter()
            .zip(relationship.db_relationship.target_columns());
        for (source_path, target_column) in pairs {
            match row.get(&source_path) {
                None => return Ok(None),
                Some(Value::Null) => return Ok(Some(None)),
                Some(value) => {
                    key.insert(target_column.to_string(), value.clone());
                }
            }
        }
        Ok(Some(Some(ObjectId::new(target.root_entity(), key))))
    }
}

/// Descriptor of the object's concrete entity.
pub(crate) fn descriptor_of(snapshot: &MappingSnapshot, object: &ObjectRef) -> Result<std::sync::Arc<ClassDescriptor>> {
    let entity = object.read().entity_name().to_string();
    snapshot.class_descriptor(&entity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{gallery_resolver, people_resolver};
    use crate::object::GenericObject;
    use std::sync::Arc;

    fn painting_row(id: i64, artist: Value) -> DataRow {
        DataRow::for_entity("Painting")
            .with("PAINTING_ID", id)
            .with("PAINTING_TITLE", "Irises")
            .with("ESTIMATED_PRICE", 3.5)
            .with("ARTIST_ID", artist)
            .with("GALLERY_ID", Value::Null)
    }

    #[test]
    fn test_materialize_sets_values_and_faults() {
        let resolver = gallery_resolver();
        let snapshot = resolver.snapshot().unwrap();
        let mut graph = ObjectGraph::new();
        let object = Materializer::new(&resolver, &snapshot)
            .materialize(&painting_row(1, Value::Int64(5)), &mut graph)
            .unwrap();

        let guard = object.read();
        assert_eq!(guard.object_id(), Some(&ObjectId::single("Painting", "PAINTING_ID", 1i64)));
        assert_eq!(guard.persistence_state(), PersistenceState::Committed);
        assert_eq!(
            guard.read_property("paintingTitle"),
            Some(Property::Value(Value::from("Irises")))
        );
        assert_eq!(
            guard.read_property("toArtist"),
            Some(Property::ToOneFault(ObjectId::single("Artist", "ARTIST_ID", 5i64)))
        );
        assert_eq!(guard.read_property("toGallery"), Some(Property::ToOne(None)));
        assert!(guard.as_any().downcast_ref::<GenericObject>().is_some());
        drop(guard);
        assert!(graph.snapshot(&ObjectId::single("Painting", "PAINTING_ID", 1i64)).is_some());
    }

    #[test]
    fn test_same_identity_yields_same_instance() {
        let resolver = gallery_resolver();
        let snapshot = resolver.snapshot().unwrap();
        let materializer = Materializer::new(&resolver, &snapshot);
        let mut graph = ObjectGraph::new();
        let a = materializer.materialize(&painting_row(1, Value::Int64(5)), &mut graph).unwrap();
        let b = materializer.materialize(&painting_row(1, Value::Int64(6)), &mut graph).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(
            a.read().read_property("toArtist"),
            Some(Property::ToOneFault(ObjectId::single("Artist", "ARTIST_ID", 6i64)))
        );
    }

    #[test]
    fn test_missing_key_and_null_mandatory() {
        let resolver = gallery_resolver();
        let snapshot = resolver.snapshot().unwrap();
        let materializer = Materializer::new(&resolver, &snapshot);
        let mut graph = ObjectGraph::new();

        let row = DataRow::for_entity("Artist").with("ARTIST_ID", Value::Null).with("ARTIST_NAME", "x");
        let err = materializer.materialize(&row, &mut graph).unwrap_err();
        assert!(matches!(err, Error::MissingIdentity { column, .. } if column == "ARTIST_ID"));

        let row = DataRow::for_entity("Artist").with("ARTIST_ID", 1i64).with("ARTIST_NAME", Value::Null);
        let err = materializer.materialize(&row, &mut graph).unwrap_err();
        assert!(matches!(err, Error::NullValue { attribute, .. } if attribute == "artistName"));
        assert!(graph.is_empty());
    }

    #[test]
    fn test_subclass_identity_uses_hierarchy_root() {
        let resolver = people_resolver();
        let snapshot = resolver.snapshot().unwrap();
        let mut graph = ObjectGraph::new();
        let row = DataRow::for_entity("Car")
            .with("VEHICLE_ID", 3i64)
            .with("VEHICLE_TYPE", "car")
            .with("MAKE", "Saab")
            .with("car.DOORS", 4i32);
        let car = Materializer::new(&resolver, &snapshot).materialize(&row, &mut graph).unwrap();
        let guard = car.read();
        assert_eq!(guard.entity_name(), "Car");
        assert_eq!(guard.object_id().unwrap().entity_name(), "Vehicle");
        assert_eq!(guard.read_property("doors"), Some(Property::Value(Value::Int32(4))));
    }

    #[test]
    fn test_registered_factory_is_used() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let created = Arc::new(AtomicUsize::new(0));
        let counter = created.clone();
        let resolver = gallery_resolver();
        resolver.register_factory(
            "Gallery",
            Arc::new(move |entity: &str| -> ObjectRef {
                counter.fetch_add(1, Ordering::SeqCst);
                Arc::new(parking_lot::RwLock::new(GenericObject::new(entity)))
            }),
        );
        let snapshot = resolver.snapshot().unwrap();
        let mut graph = ObjectGraph::new();
        let row = DataRow::for_entity("Gallery").with("GALLERY_ID", 1i64).with("GALLERY_NAME", "Tate");
        let gallery = Materializer::new(&resolver, &snapshot).materialize(&row, &mut graph).unwrap();
        assert_eq!(gallery.read().entity_name(), "Gallery");
        assert_eq!(created.load(Ordering::SeqCst), 1);
    }
}
