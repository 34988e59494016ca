//! The persistent object contract.
//!
//! Every property access of a mapped object goes through [`Persistent`], so
//! the framework can fill faults, merge fetched values and track changes
//! without generating code into user types.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use ormgraph_proto::Value;
use parking_lot::RwLock;

use super::id::ObjectId;

/// Shared handle to a persistent object.
pub type ObjectRef = Arc<RwLock<dyn Persistent>>;

/// Lifecycle state of a persistent object within a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PersistenceState {
    /// Not registered in any graph.
    Transient,
    /// Registered, not yet inserted.
    New,
    /// In sync with the database.
    Committed,
    /// Changed since it was fetched.
    Modified,
    /// Marked for deletion.
    Deleted,
}

/// A property value: scalar, or a relationship that may still be a fault.
#[derive(Clone)]
pub enum Property {
    /// Attribute value.
    Value(Value),
    /// Unresolved to-one relationship pointing at the target's identity.
    ToOneFault(ObjectId),
    /// Resolved to-one relationship.
    ToOne(Option<ObjectRef>),
    /// Unresolved to-many relationship.
    ToManyFault,
    /// Resolved to-many relationship.
    ToMany(Vec<ObjectRef>),
}

impl Property {
    /// Whether the property is an unresolved relationship.
    pub fn is_fault(&self) -> bool {
        matches!(self, Property::ToOneFault(_) | Property::ToManyFault)
    }

    /// Attribute value, if this is one.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Property::Value(v) => Some(v),
            _ => None,
        }
    }

    /// Resolved to-many list, if this is one.
    pub fn as_list(&self) -> Option<&[ObjectRef]> {
        match self {
            Property::ToMany(list) => Some(list),
            _ => None,
        }
    }

    /// Resolved to-one target, if this is one.
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Property::ToOne(target) => target.as_ref(),
            _ => None,
        }
    }
}

impl fmt::Debug for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Property::Value(v) => write!(f, "Value({v:?})"),
            Property::ToOneFault(id) => write!(f, "ToOneFault({id})"),
            Property::ToOne(None) => f.write_str("ToOne(None)"),
            Property::ToOne(Some(target)) => match target.try_read() {
                Some(obj) => write!(f, "ToOne({:?})", obj.object_id()),
                None => f.write_str("ToOne(<locked>)"),
            },
            Property::ToManyFault => f.write_str("ToManyFault"),
            Property::ToMany(list) => write!(f, "ToMany(len={})", list.len()),
        }
    }
}

impl PartialEq for Property {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Property::Value(a), Property::Value(b)) => a == b,
            (Property::ToOneFault(a), Property::ToOneFault(b)) => a == b,
            (Property::ToOne(None), Property::ToOne(None)) => true,
            (Property::ToOne(Some(a)), Property::ToOne(Some(b))) => Arc::ptr_eq(a, b),
            (Property::ToManyFault, Property::ToManyFault) => true,
            (Property::ToMany(a), Property::ToMany(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| Arc::ptr_eq(x, y))
            }
            _ => false,
        }
    }
}

impl From<Value> for Property {
    fn from(v: Value) -> Self {
        Property::Value(v)
    }
}

/// Accessor contract implemented by persistent types.
pub trait Persistent: Send + Sync + fmt::Debug {
    /// Name of the concrete entity.
    fn entity_name(&self) -> &str;

    /// Identity, once registered.
    fn object_id(&self) -> Option<&ObjectId>;

    /// Assign the identity.
    fn set_object_id(&mut self, id: ObjectId);

    /// Lifecycle state.
    fn persistence_state(&self) -> PersistenceState;

    /// Change the lifecycle state.
    fn set_persistence_state(&mut self, state: PersistenceState);

    /// Read a property without triggering anything.
    fn read_property(&self, name: &str) -> Option<Property>;

    /// Write a property without change tracking.
    fn write_property(&mut self, name: &str, value: Property);

    /// Names of all properties holding a value or fault.
    fn property_names(&self) -> Vec<String>;

    /// Record that a property changed.
    fn mark_dirty(&mut self, name: &str);

    /// Properties changed since the last commit.
    fn dirty_properties(&self) -> Vec<String>;

    /// Forget recorded changes.
    fn clear_dirty(&mut self);

    /// Downcast support for typed access.
    fn as_any(&self) -> &dyn Any;
}

/// Write a property and record the change, moving a committed object to
/// [`PersistenceState::Modified`].
pub fn set_property(object: &mut dyn Persistent, name: &str, value: impl Into<Property>) {
    object.write_property(name, value.into());
    object.mark_dirty(name);
    if object.persistence_state() == PersistenceState::Committed {
        object.set_persistence_state(PersistenceState::Modified);
    }
}

/// Map-backed persistent object usable for any entity.
#[derive(Debug)]
pub struct GenericObject {
    entity_name: String,
    object_id: Option<ObjectId>,
    state: PersistenceState,
    properties: BTreeMap<String, Property>,
    dirty: BTreeSet<String>,
}

impl GenericObject {
    /// Create a transient object.
    pub fn new(entity_name: impl Into<String>) -> Self {
        Self {
            entity_name: entity_name.into(),
            object_id: None,
            state: PersistenceState::Transient,
            properties: BTreeMap::new(),
            dirty: BTreeSet::new(),
        }
    }

    /// Attribute value by property name.
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.properties.get(name).and_then(Property::as_value)
    }

    /// Property by name.
    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.get(name)
    }
}

impl Persistent for GenericObject {
    fn entity_name(&self) -> &str {
        &self.entity_name
    }

    fn object_id(&self) -> Option<&ObjectId> {
        self.object_id.as_ref()
    }

    fn set_object_id(&mut self, id: ObjectId) {
        self.object_id = Some(id);
    }

    fn persistence_state(&self) -> PersistenceState {
        self.state
    }

    fn set_persistence_state(&mut self, state: PersistenceState) {
        self.state = state;
    }

    fn read_property(&self, name: &str) -> Option<Property> {
        self.properties.get(name).cloned()
    }

    fn write_property(&mut self, name: &str, value: Property) {
        self.properties.insert(name.to_string(), value);
    }

    fn property_names(&self) -> Vec<String> {
        self.properties.keys().cloned().collect()
    }

    fn mark_dirty(&mut self, name: &str) {
        self.dirty.insert(name.to_string());
    }

    fn dirty_properties(&self) -> Vec<String> {
        self.dirty.iter().cloned().collect()
    }

    fn clear_dirty(&mut self) {
        self.dirty.clear();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Creates empty instances of an entity during materialization.
pub trait ObjectFactory: Send + Sync {
    /// Create a transient instance of `entity_name`.
    fn create(&self, entity_name: &str) -> ObjectRef;
}

/// Factory producing [`GenericObject`]s, used when no factory is registered.
#[derive(Debug, Default, Clone, Copy)]
pub struct GenericObjectFactory;

impl ObjectFactory for GenericObjectFactory {
    fn create(&self, entity_name: &str) -> ObjectRef {
        Arc::new(RwLock::new(GenericObject::new(entity_name)))
    }
}

impl<F> ObjectFactory for F
where
    F: Fn(&str) -> ObjectRef + Send + Sync,
{
    fn create(&self, entity_name: &str) -> ObjectRef {
        self(entity_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_property_tracks_changes() {
        let mut obj = GenericObject::new("Artist");
        obj.set_persistence_state(PersistenceState::Committed);

        set_property(&mut obj, "artistName", Value::from("Monet"));
        assert_eq!(obj.value("artistName"), Some(&Value::from("Monet")));
        assert_eq!(obj.dirty_properties(), vec!["artistName"]);
        assert_eq!(obj.persistence_state(), PersistenceState::Modified);

        obj.write_property("dateOfBirth", Property::Value(Value::Null));
        assert_eq!(obj.dirty_properties().len(), 1);
    }

    #[test]
    fn test_generic_factory_creates_transient_objects() {
        let obj = GenericObjectFactory.create("Painting");
        let guard = obj.read();
        assert_eq!(guard.entity_name(), "Painting");
        assert_eq!(guard.persistence_state(), PersistenceState::Transient);
        assert!(guard.object_id().is_none());
        assert!(guard.as_any().downcast_ref::<GenericObject>().is_some());
    }

    #[test]
    fn test_property_equality_is_identity_based() {
        let a = GenericObjectFactory.create("Artist");
        let b = GenericObjectFactory.create("Artist");
        assert_eq!(Property::ToOne(Some(a.clone())), Property::ToOne(Some(a.clone())));
        assert_ne!(Property::ToOne(Some(a)), Property::ToOne(Some(b)));
        assert!(Property::ToManyFault.is_fault());
    }
}
