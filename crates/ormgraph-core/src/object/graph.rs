//! Object graph with identity-preserving merge.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::trace;

use super::id::{DataRow, ObjectId};
use super::persistent::{ObjectRef, PersistenceState, Property};
use crate::error::{Error, Result};

/// Objects of one session keyed by identity, with the last fetched row of
/// each committed object.
#[derive(Default)]
pub struct ObjectGraph {
    objects: HashMap<ObjectId, ObjectRef>,
    snapshots: HashMap<ObjectId, DataRow>,
}

impl ObjectGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether no object is registered.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Look up an object by identity.
    pub fn get(&self, id: &ObjectId) -> Option<ObjectRef> {
        self.objects.get(id).cloned()
    }

    /// Whether an object with this identity is registered.
    pub fn contains(&self, id: &ObjectId) -> bool {
        self.objects.contains_key(id)
    }

    /// All registered objects, in no particular order.
    pub fn objects(&self) -> impl Iterator<Item = (&ObjectId, &ObjectRef)> {
        self.objects.iter()
    }

    /// Registered objects whose identity belongs to `entity_name`.
    pub fn objects_of_entity(&self, entity_name: &str) -> Vec<ObjectRef> {
        self.objects
            .iter()
            .filter(|(id, _)| id.entity_name() == entity_name)
            .map(|(_, obj)| obj.clone())
            .collect()
    }

    /// Registered objects in the given state.
    pub fn objects_in_state(&self, state: PersistenceState) -> Vec<ObjectRef> {
        self.objects
            .values()
            .filter(|obj| obj.read().persistence_state() == state)
            .cloned()
            .collect()
    }

    /// Last fetched row of an object.
    pub fn snapshot(&self, id: &ObjectId) -> Option<&DataRow> {
        self.snapshots.get(id)
    }

    /// Record the last fetched row of an object.
    pub fn set_snapshot(&mut self, id: ObjectId, row: DataRow) {
        self.snapshots.insert(id, row);
    }

    /// Register a new, unsaved object under its temporary identity.
    pub fn register_new(&mut self, object: ObjectRef) -> Result<()> {
        let id = {
            let mut guard = object.write();
            let id = guard.object_id().cloned().ok_or_else(|| Error::ObjectWithoutId {
                entity: guard.entity_name().to_string(),
            })?;
            guard.set_persistence_state(PersistenceState::New);
            id
        };
        self.objects.insert(id, object);
        Ok(())
    }

    /// Re-register an object under a new identity, e.g. after insert.
    pub fn replace_id(&mut self, old: &ObjectId, new: ObjectId) {
        if let Some(object) = self.objects.remove(old) {
            object.write().set_object_id(new.clone());
            if let Some(snapshot) = self.snapshots.remove(old) {
                self.snapshots.insert(new.clone(), snapshot);
            }
            self.objects.insert(new, object);
        }
    }

    /// Remove an object and its snapshot.
    pub fn remove(&mut self, id: &ObjectId) -> Option<ObjectRef> {
        self.snapshots.remove(id);
        self.objects.remove(id)
    }

    /// Merge a freshly materialized object into the graph.
    ///
    /// If an object with the same identity is registered, the fresh values
    /// are copied into it and the registered instance is returned; otherwise
    /// the fresh object is registered as committed. Locally changed
    /// properties of the registered instance are kept, and a fault never
    /// replaces a resolved relationship.
    pub fn merge_object(&mut self, fresh: ObjectRef) -> Result<ObjectRef> {
        let id = {
            let guard = fresh.read();
            guard.object_id().cloned().ok_or_else(|| Error::ObjectWithoutId {
                entity: guard.entity_name().to_string(),
            })?
        };

        let Some(existing) = self.objects.get(&id).cloned() else {
            {
                let mut guard = fresh.write();
                if guard.persistence_state() == PersistenceState::Transient {
                    guard.set_persistence_state(PersistenceState::Committed);
                }
            }
            self.objects.insert(id, fresh.clone());
            return Ok(fresh);
        };

        if Arc::ptr_eq(&existing, &fresh) {
            return Ok(existing);
        }

        let updates = merge_updates(&existing, &fresh);
        if !updates.is_empty() {
            trace!(object_id = %id, properties = updates.len(), "merging fetched values");
            let mut guard = existing.write();
            for (name, value) in updates {
                guard.write_property(&name, value);
            }
        }
        Ok(existing)
    }
}

/// Properties of `fresh` that should overwrite those of `existing`.
fn merge_updates(existing: &ObjectRef, fresh: &ObjectRef) -> Vec<(String, Property)> {
    let existing_guard = existing.read();
    let fresh_guard = fresh.read();

    let locally_changed = matches!(
        existing_guard.persistence_state(),
        PersistenceState::Modified | PersistenceState::New | PersistenceState::Deleted
    );
    let dirty = if locally_changed {
        existing_guard.dirty_properties()
    } else {
        Vec::new()
    };

    let mut updates = Vec::new();
    for name in fresh_guard.property_names() {
        if dirty.contains(&name) {
            continue;
        }
        let Some(incoming) = fresh_guard.read_property(&name) else {
            continue;
        };
        let current = existing_guard.read_property(&name);

        let keep_current = match (&current, &incoming) {
            (Some(Property::ToMany(_)), Property::ToManyFault) => true,
            (Some(Property::ToOne(Some(target))), Property::ToOneFault(fault_id)) => {
                let target_id = if Arc::ptr_eq(target, existing) {
                    existing_guard.object_id().cloned()
                } else {
                    target.read_recursive().object_id().cloned()
                };
                target_id.as_ref() == Some(fault_id)
            }
            (Some(current), incoming) => current == incoming,
            (None, _) => false,
        };

        if !keep_current {
            updates.push((name, incoming));
        }
    }
    updates
}
