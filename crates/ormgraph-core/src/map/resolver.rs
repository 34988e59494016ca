//! Entity resolver: validated mapping metadata with lookups by entity name,
//! class name and Rust type.
//!
//! The resolver has an explicit lifecycle. It starts uninitialized,
//! [`EntityResolver::initialize`] validates a [`DataMap`] and publishes an
//! immutable [`MappingSnapshot`], and [`EntityResolver::invalidate`] drops it
//! again. Each publication bumps the resolver generation so that callers
//! caching derived metadata can detect staleness.

use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use super::data_map::DataMap;
use super::db::{DbEntity, DbRelationship};
use super::descriptor::ClassDescriptor;
use super::inheritance::EntityInheritanceTree;
use super::obj::ObjEntity;
use super::procedure::Procedure;
use crate::error::{Error, Result};
use crate::object::{GenericObjectFactory, ObjectFactory};

static NEXT_RESOLVER_ID: AtomicU64 = AtomicU64::new(1);

/// Immutable, validated view of a mapping.
pub struct MappingSnapshot {
    generation: u64,
    db_entities: HashMap<String, DbEntity>,
    obj_entities: HashMap<String, Arc<ObjEntity>>,
    obj_order: Vec<String>,
    classes: HashMap<String, String>,
    procedures: HashMap<String, Procedure>,
    trees: HashMap<String, EntityInheritanceTree>,
    descriptors: RwLock<HashMap<String, Arc<ClassDescriptor>>>,
    descriptors_built: AtomicUsize,
}

impl MappingSnapshot {
    fn build(map: DataMap, generation: u64) -> Result<Self> {
        let mut db_entities: HashMap<String, DbEntity> = HashMap::new();
        for entity in map.db_entities {
            if db_entities.contains_key(&entity.name) {
                return Err(Error::Mapping(format!("duplicate db entity {}", entity.name)));
            }
            db_entities.insert(entity.name.clone(), entity);
        }
        validate_db_relationships(&db_entities)?;
        add_runtime_reverse_relationships(&mut db_entities);

        let mut obj_entities = HashMap::new();
        let mut obj_order = Vec::new();
        let mut classes = HashMap::new();
        for entity in map.obj_entities {
            if obj_entities.contains_key(&entity.name) {
                return Err(Error::Mapping(format!("duplicate entity {}", entity.name)));
            }
            if let Some(other) = classes.insert(entity.class_name().to_string(), entity.name.clone()) {
                return Err(Error::Mapping(format!(
                    "class {} is mapped by both {} and {}",
                    entity.class_name(),
                    other,
                    entity.name
                )));
            }
            obj_order.push(entity.name.clone());
            obj_entities.insert(entity.name.clone(), Arc::new(entity));
        }

        let procedures = map
            .procedures
            .into_iter()
            .map(|p| (p.name.clone(), p))
            .collect();

        let mut snapshot = Self {
            generation,
            db_entities,
            obj_entities,
            obj_order,
            classes,
            procedures,
            trees: HashMap::new(),
            descriptors: RwLock::new(HashMap::new()),
            descriptors_built: AtomicUsize::new(0),
        };
        snapshot.validate_obj_entities()?;
        snapshot.trees = snapshot.build_trees();
        snapshot.validate_reverse_relationships()?;
        Ok(snapshot)
    }

    fn validate_obj_entities(&self) -> Result<()> {
        for name in &self.obj_order {
            let entity = &self.obj_entities[name];

            // walk the super chain to catch unknown parents and cycles
            let mut seen = vec![entity.name.as_str()];
            let mut current = entity.as_ref();
            while let Some(parent) = self.super_entity(current)? {
                if seen.contains(&parent.name.as_str()) {
                    return Err(Error::Mapping(format!(
                        "inheritance cycle through entity {}",
                        parent.name
                    )));
                }
                seen.push(&parent.name);
                current = parent.as_ref();
            }

            let table = self.effective_db_entity(entity)?;
            for attribute in &entity.attributes {
                if table.attribute(&attribute.db_attribute).is_none() {
                    return Err(Error::UnknownAttribute {
                        entity: table.name.clone(),
                        path: attribute.db_attribute.clone(),
                    });
                }
            }

            let root_table = self.effective_db_entity(current)?;
            for discriminator in &entity.discriminator {
                if root_table.attribute(&discriminator.column).is_none() {
                    return Err(Error::Mapping(format!(
                        "discriminator column {} of {} is not a column of {}",
                        discriminator.column, entity.name, root_table.name
                    )));
                }
            }

            for relationship in &entity.relationships {
                let db_relationship = table.relationship(&relationship.db_relationship).ok_or_else(|| {
                    Error::UnknownRelationship {
                        entity: table.name.clone(),
                        name: relationship.db_relationship.clone(),
                    }
                })?;
                let target = self.obj_entity(&relationship.target)?;
                let target_table = self.effective_db_entity(target)?;
                let target_root_table = self.effective_db_entity(self.hierarchy_root(target)?)?;
                if db_relationship.target != target_table.name
                    && db_relationship.target != target_root_table.name
                {
                    return Err(Error::Mapping(format!(
                        "relationship {}.{} targets {} but db relationship {} joins {}",
                        entity.name,
                        relationship.name,
                        relationship.target,
                        db_relationship.name,
                        db_relationship.target
                    )));
                }
            }
        }
        Ok(())
    }

    fn validate_reverse_relationships(&self) -> Result<()> {
        for name in &self.obj_order {
            let entity = &self.obj_entities[name];
            for relationship in &entity.relationships {
                let Some(reverse_name) = &relationship.reverse else {
                    continue;
                };
                let target = self.obj_entity(&relationship.target)?;
                let reverse = self
                    .find_relationship_in_chain(target, reverse_name)?
                    .ok_or_else(|| {
                        Error::Mapping(format!(
                            "{}.{} declares reverse {}.{}, which does not exist",
                            entity.name, relationship.name, target.name, reverse_name
                        ))
                    })?;

                let (reverse_owner, reverse) = reverse;
                let entity_root = &self.hierarchy_root(entity)?.name;
                let reverse_target = self.obj_entity(&reverse.target)?;
                if &self.hierarchy_root(reverse_target)?.name != entity_root {
                    return Err(Error::Mapping(format!(
                        "{}.{} declares reverse {}.{}, which points to {} instead",
                        entity.name, relationship.name, reverse_owner, reverse_name, reverse.target
                    )));
                }
                if let Some(back) = &reverse.reverse {
                    if back != &relationship.name {
                        return Err(Error::Mapping(format!(
                            "reverse relationships are not mutually consistent: {}.{} -> {}.{} -> {}",
                            entity.name, relationship.name, reverse_owner, reverse_name, back
                        )));
                    }
                }

                let forward_db = self
                    .effective_db_entity(entity)?
                    .relationship(&relationship.db_relationship);
                let backward_db = self
                    .effective_db_entity(self.obj_entity(reverse_owner)?)?
                    .relationship(&reverse.db_relationship);
                if let (Some(f), Some(b)) = (forward_db, backward_db) {
                    if !f.mirrors(b) {
                        return Err(Error::Mapping(format!(
                            "{}.{} and {}.{} do not join the same columns",
                            entity.name, relationship.name, reverse_owner, reverse_name
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    fn find_relationship_in_chain<'a>(
        &'a self,
        entity: &'a ObjEntity,
        name: &str,
    ) -> Result<Option<(&'a str, &'a super::obj::ObjRelationship)>> {
        let mut current = Some(entity);
        while let Some(e) = current {
            if let Some(r) = e.relationship(name) {
                return Ok(Some((e.name.as_str(), r)));
            }
            current = self.super_entity(e)?.map(|p| p.as_ref());
        }
        Ok(None)
    }

    fn build_trees(&self) -> HashMap<String, EntityInheritanceTree> {
        fn grow(snapshot: &MappingSnapshot, entity: &Arc<ObjEntity>) -> EntityInheritanceTree {
            let mut tree = EntityInheritanceTree::new(entity.clone());
            for name in &snapshot.obj_order {
                let candidate = &snapshot.obj_entities[name];
                if candidate.super_entity.as_deref() == Some(entity.name.as_str()) {
                    tree.add_child(grow(snapshot, candidate));
                }
            }
            tree
        }

        self.obj_order
            .iter()
            .map(|name| &self.obj_entities[name])
            .filter(|e| e.super_entity.is_none())
            .map(|root| (root.name.clone(), grow(self, root)))
            .collect()
    }

    /// Generation of the resolver that produced this snapshot.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Table by name.
    pub fn db_entity(&self, name: &str) -> Result<&DbEntity> {
        self.db_entities
            .get(name)
            .ok_or_else(|| Error::UnknownEntity { name: name.to_string() })
    }

    /// Entity by name.
    pub fn obj_entity(&self, name: &str) -> Result<&Arc<ObjEntity>> {
        self.obj_entities
            .get(name)
            .ok_or_else(|| Error::UnknownEntity { name: name.to_string() })
    }

    /// Entity by class name.
    pub fn obj_entity_for_class(&self, class_name: &str) -> Result<&Arc<ObjEntity>> {
        let name = self
            .classes
            .get(class_name)
            .ok_or_else(|| Error::UnknownEntity { name: class_name.to_string() })?;
        self.obj_entity(name)
    }

    /// Entities in mapping order.
    pub fn obj_entities(&self) -> impl Iterator<Item = &Arc<ObjEntity>> {
        self.obj_order.iter().map(|n| &self.obj_entities[n])
    }

    /// First entity mapped directly to `table`, parents before children.
    pub fn obj_entity_for_table(&self, table: &str) -> Option<&Arc<ObjEntity>> {
        self.obj_entities()
            .find(|e| e.super_entity.is_none() && e.db_entity.as_deref() == Some(table))
    }

    /// Procedure by name.
    pub fn procedure(&self, name: &str) -> Result<&Procedure> {
        self.procedures
            .get(name)
            .ok_or_else(|| Error::Mapping(format!("unknown procedure {name}")))
    }

    /// Parent entity, if any.
    pub fn super_entity(&self, entity: &ObjEntity) -> Result<Option<&Arc<ObjEntity>>> {
        match &entity.super_entity {
            Some(parent) => self.obj_entity(parent).map(Some),
            None => Ok(None),
        }
    }

    /// Root of the entity's inheritance hierarchy.
    pub fn hierarchy_root<'a>(&'a self, entity: &'a ObjEntity) -> Result<&'a ObjEntity> {
        let mut current = entity;
        while let Some(parent) = self.super_entity(current)? {
            current = parent.as_ref();
        }
        Ok(current)
    }

    /// Table of an entity, inherited from the nearest ancestor mapping one.
    pub fn effective_db_entity(&self, entity: &ObjEntity) -> Result<&DbEntity> {
        let mut current = entity;
        loop {
            if let Some(table) = &current.db_entity {
                return self.db_entity(table);
            }
            match self.super_entity(current)? {
                Some(parent) => current = parent.as_ref(),
                None => {
                    return Err(Error::Mapping(format!(
                        "entity {} has no db entity",
                        entity.name
                    )))
                }
            }
        }
    }

    /// Inheritance subtree rooted at the entity.
    pub fn inheritance_tree(&self, name: &str) -> Option<&EntityInheritanceTree> {
        let entity = self.obj_entities.get(name)?;
        let root = self.hierarchy_root(entity).ok()?;
        self.trees.get(&root.name)?.find(name)
    }

    /// Class descriptor of an entity, built on first use.
    pub fn class_descriptor(&self, name: &str) -> Result<Arc<ClassDescriptor>> {
        if let Some(found) = self.descriptors.read().get(name) {
            return Ok(found.clone());
        }

        let mut descriptors = self.descriptors.write();
        // another thread may have built it while we waited
        if let Some(found) = descriptors.get(name) {
            return Ok(found.clone());
        }

        let descriptor = Arc::new(ClassDescriptor::build(self, name)?);
        self.descriptors_built.fetch_add(1, Ordering::Relaxed);
        debug!(entity = name, attributes = descriptor.attributes().len(), "built class descriptor");
        descriptors.insert(name.to_string(), descriptor.clone());
        Ok(descriptor)
    }

    /// Number of descriptors built so far.
    pub fn descriptors_built(&self) -> usize {
        self.descriptors_built.load(Ordering::Relaxed)
    }
}

fn validate_db_relationships(db_entities: &HashMap<String, DbEntity>) -> Result<()> {
    for entity in db_entities.values() {
        for relationship in &entity.relationships {
            if relationship.source != entity.name {
                return Err(Error::Mapping(format!(
                    "db relationship {}.{} declares source {}",
                    entity.name, relationship.name, relationship.source
                )));
            }
            let target = db_entities.get(&relationship.target).ok_or_else(|| Error::UnknownEntity {
                name: relationship.target.clone(),
            })?;
            if relationship.joins.is_empty() {
                return Err(Error::Mapping(format!(
                    "db relationship {}.{} has no joins",
                    entity.name, relationship.name
                )));
            }
            for join in &relationship.joins {
                if entity.attribute(&join.source).is_none() {
                    return Err(Error::UnknownAttribute {
                        entity: entity.name.clone(),
                        path: join.source.clone(),
                    });
                }
                if target.attribute(&join.target).is_none() {
                    return Err(Error::UnknownAttribute {
                        entity: target.name.clone(),
                        path: join.target.clone(),
                    });
                }
            }
        }
    }
    Ok(())
}

/// Every relationship gets a mirror so that qualifiers can always be
/// re-rooted on the target table.
fn add_runtime_reverse_relationships(db_entities: &mut HashMap<String, DbEntity>) {
    let mut missing: Vec<DbRelationship> = Vec::new();
    for entity in db_entities.values() {
        for relationship in &entity.relationships {
            let mirrored = db_entities
                .get(&relationship.target)
                .map(|t| t.reverse_of(relationship).is_some())
                .unwrap_or(false);
            if !mirrored {
                missing.push(DbRelationship {
                    name: format!("reverse@{}:{}", relationship.source, relationship.name),
                    source: relationship.target.clone(),
                    target: relationship.source.clone(),
                    joins: relationship.joins.iter().map(|j| j.reversed()).collect(),
                    to_many: !relationship.to_many && !relationship.to_dependent_pk,
                    to_dependent_pk: false,
                    runtime: true,
                });
            }
        }
    }
    for reverse in missing {
        if let Some(entity) = db_entities.get_mut(&reverse.source) {
            entity.relationships.push(reverse);
        }
    }
}

/// Entity metadata resolver.
pub struct EntityResolver {
    id: u64,
    generation: AtomicU64,
    state: RwLock<Option<Arc<MappingSnapshot>>>,
    factories: RwLock<HashMap<String, Arc<dyn ObjectFactory>>>,
    types: RwLock<HashMap<TypeId, String>>,
}

impl EntityResolver {
    /// Create an uninitialized resolver.
    pub fn new() -> Self {
        Self {
            id: NEXT_RESOLVER_ID.fetch_add(1, Ordering::Relaxed),
            generation: AtomicU64::new(0),
            state: RwLock::new(None),
            factories: RwLock::new(HashMap::new()),
            types: RwLock::new(HashMap::new()),
        }
    }

    /// Create a resolver initialized with `map`.
    pub fn with_map(map: DataMap) -> Result<Self> {
        let resolver = Self::new();
        resolver.initialize(map)?;
        Ok(resolver)
    }

    /// Process-unique resolver id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Incremented on every initialize and invalidate.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Validate `map` and publish it.
    pub fn initialize(&self, map: DataMap) -> Result<()> {
        let map_name = map.name.clone();
        let mut state = self.state.write();
        let generation = self.generation.load(Ordering::SeqCst) + 1;
        let snapshot = MappingSnapshot::build(map, generation)?;
        info!(
            map = %map_name,
            db_entities = snapshot.db_entities.len(),
            obj_entities = snapshot.obj_entities.len(),
            generation,
            "entity resolver initialized"
        );
        *state = Some(Arc::new(snapshot));
        self.generation.store(generation, Ordering::SeqCst);
        Ok(())
    }

    /// Drop the published mapping. Lookups fail until re-initialized.
    pub fn invalidate(&self) {
        let mut state = self.state.write();
        if state.take().is_some() {
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            info!(generation, "entity resolver invalidated");
        }
    }

    /// Whether a mapping is published.
    pub fn is_ready(&self) -> bool {
        self.state.read().is_some()
    }

    /// The published mapping.
    pub fn snapshot(&self) -> Result<Arc<MappingSnapshot>> {
        self.state.read().clone().ok_or(Error::ResolverNotReady)
    }

    /// Entity by name.
    pub fn obj_entity(&self, name: &str) -> Result<Arc<ObjEntity>> {
        Ok(self.snapshot()?.obj_entity(name)?.clone())
    }

    /// Entity by class name.
    pub fn obj_entity_for_class(&self, class_name: &str) -> Result<Arc<ObjEntity>> {
        Ok(self.snapshot()?.obj_entity_for_class(class_name)?.clone())
    }

    /// Class descriptor by entity name.
    pub fn class_descriptor(&self, name: &str) -> Result<Arc<ClassDescriptor>> {
        self.snapshot()?.class_descriptor(name)
    }

    /// Associate a Rust type with an entity for type-based lookups.
    pub fn register_type<T: 'static>(&self, entity_name: impl Into<String>) {
        self.types.write().insert(TypeId::of::<T>(), entity_name.into());
    }

    /// Entity name registered for a type id.
    pub fn entity_name_for_type_id(&self, type_id: TypeId) -> Option<String> {
        self.types.read().get(&type_id).cloned()
    }

    /// Entity registered for `T`.
    pub fn obj_entity_for_type<T: 'static>(&self) -> Result<Arc<ObjEntity>> {
        let name = self
            .entity_name_for_type_id(TypeId::of::<T>())
            .ok_or_else(|| Error::UnknownType {
                type_name: type_name::<T>().to_string(),
            })?;
        self.obj_entity(&name)
    }

    /// Register the factory creating instances of an entity.
    pub fn register_factory(&self, entity_name: impl Into<String>, factory: Arc<dyn ObjectFactory>) {
        self.factories.write().insert(entity_name.into(), factory);
    }

    /// Factory for an entity, defaulting to generic objects.
    pub fn object_factory(&self, entity_name: &str) -> Arc<dyn ObjectFactory> {
        self.factories
            .read()
            .get(entity_name)
            .cloned()
            .unwrap_or_else(|| Arc::new(GenericObjectFactory) as Arc<dyn ObjectFactory>)
    }
}

impl Default for EntityResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EntityResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityResolver")
            .field("id", &self.id)
            .field("generation", &self.generation())
            .field("ready", &self.is_ready())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{gallery_map, gallery_resolver, people_resolver};
    use crate::map::{DbAttribute, ObjAttribute, ObjRelationship};

    struct Artist;

    #[test]
    fn test_lifecycle() {
        let resolver = EntityResolver::new();
        assert!(!resolver.is_ready());
        assert!(matches!(resolver.snapshot(), Err(Error::ResolverNotReady)));

        resolver.initialize(gallery_map()).unwrap();
        assert!(resolver.is_ready());
        assert_eq!(resolver.generation(), 1);
        assert_eq!(resolver.snapshot().unwrap().generation(), 1);

        resolver.invalidate();
        assert!(!resolver.is_ready());
        assert_eq!(resolver.generation(), 2);
        assert!(matches!(resolver.obj_entity("Artist"), Err(Error::ResolverNotReady)));

        resolver.initialize(gallery_map()).unwrap();
        assert_eq!(resolver.generation(), 3);
    }

    #[test]
    fn test_lookups() {
        let resolver = gallery_resolver();
        assert_eq!(resolver.obj_entity("Artist").unwrap().name, "Artist");
        assert_eq!(resolver.obj_entity_for_class("gallery::Artist").unwrap().name, "Artist");
        assert_eq!(resolver.obj_entity_for_class("Painting").unwrap().name, "Painting");
        assert!(matches!(
            resolver.obj_entity("Sculpture"),
            Err(Error::UnknownEntity { name }) if name == "Sculpture"
        ));

        assert!(matches!(resolver.obj_entity_for_type::<Artist>(), Err(Error::UnknownType { .. })));
        resolver.register_type::<Artist>("Artist");
        assert_eq!(resolver.obj_entity_for_type::<Artist>().unwrap().name, "Artist");
    }

    #[test]
    fn test_runtime_reverse_relationships() {
        let snapshot = gallery_resolver().snapshot().unwrap();
        let gallery = snapshot.db_entity("GALLERY").unwrap();
        let reverse = gallery.relationship("reverse@PAINTING:toGallery").unwrap();
        assert!(reverse.runtime);
        assert!(reverse.to_many);
        assert_eq!(reverse.target, "PAINTING");

        // mapped in both directions, nothing synthesized
        let artist = snapshot.db_entity("ARTIST").unwrap();
        assert!(artist.relationships.iter().all(|r| !r.runtime));
    }

    #[test]
    fn test_descriptor_built_once() {
        let snapshot = gallery_resolver().snapshot().unwrap();
        let first = snapshot.class_descriptor("Painting").unwrap();
        let second = snapshot.class_descriptor("Painting").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(snapshot.descriptors_built(), 1);
    }

    #[test]
    fn test_concurrent_descriptor_lookups() {
        let snapshot = gallery_resolver().snapshot().unwrap();
        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| snapshot.class_descriptor("Artist").unwrap());
            }
        });
        assert_eq!(snapshot.descriptors_built(), 1);
    }

    #[test]
    fn test_inheritance_trees() {
        let snapshot = people_resolver().snapshot().unwrap();
        let tree = snapshot.inheritance_tree("AbstractPerson").unwrap();
        assert_eq!(tree.children().len(), 3);
        assert_eq!(snapshot.inheritance_tree("Manager").unwrap().children().len(), 0);

        let manager = snapshot.obj_entity("Manager").unwrap();
        assert_eq!(snapshot.hierarchy_root(manager).unwrap().name, "AbstractPerson");
        assert_eq!(snapshot.effective_db_entity(manager).unwrap().name, "PERSON");
    }

    #[test]
    fn test_rejects_unknown_column() {
        let mut map = gallery_map();
        map.obj_entities[0] = map.obj_entities[0]
            .clone()
            .with_attribute(ObjAttribute::new("nickname", "NICKNAME", "String"));
        let err = EntityResolver::with_map(map).unwrap_err();
        assert!(matches!(err, Error::UnknownAttribute { path, .. } if path == "NICKNAME"));
    }

    #[test]
    fn test_rejects_inconsistent_reverse() {
        let mut map = gallery_map();
        // Gallery has no relationship pointing back through toGallery
        let painting = map.obj_entities.iter_mut().find(|e| e.name == "Painting").unwrap();
        painting.relationships.retain(|r| r.name != "toGallery");
        painting
            .relationships
            .push(ObjRelationship::new("toGallery", "Gallery", "toGallery").with_reverse("paintings"));
        let err = EntityResolver::with_map(map).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
        assert!(err.to_string().contains("paintings"));
    }

    #[test]
    fn test_rejects_inheritance_cycle() {
        let mut map = gallery_map();
        map.obj_entities.push(ObjEntity::subentity("A", "B"));
        map.obj_entities.push(ObjEntity::subentity("B", "A"));
        let err = EntityResolver::with_map(map).unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_rejects_duplicate_table() {
        let mut map = gallery_map();
        map.db_entities
            .push(DbEntity::new("ARTIST").with_attribute(DbAttribute::primary_key("ID")));
        assert!(EntityResolver::with_map(map).is_err());
    }

    #[test]
    fn test_failed_initialize_keeps_previous_mapping() {
        let resolver = gallery_resolver();
        let mut broken = gallery_map();
        broken.obj_entities.push(ObjEntity::new("Ghost", "NO_SUCH_TABLE"));
        assert!(resolver.initialize(broken).is_err());
        assert!(resolver.is_ready());
        assert_eq!(resolver.generation(), 1);
    }
}
