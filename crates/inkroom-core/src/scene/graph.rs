//! In-memory scene graph.

use std::collections::HashMap;

use super::{ObjectId, Scene, SceneEvent, SceneObject};
use crate::shapes::Shape;

/// A scene holding objects keyed by id plus their back-to-front order.
///
/// Host code edits it through [`SceneGraph::add`], [`SceneGraph::modify`] and
/// [`SceneGraph::delete`], each of which records the event the bridge listens for.
#[derive(Debug, Default)]
pub struct SceneGraph {
    objects: HashMap<ObjectId, SceneObject>,
    z_order: Vec<ObjectId>,
    events: Vec<SceneEvent>,
}

impl SceneGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a locally drawn object. Returns its id.
    pub fn add(&mut self, object: SceneObject) -> ObjectId {
        let id = object.id;
        let is_path = matches!(object.shape, Shape::Path(_));
        if self.insert(object) && is_path {
            self.events.push(SceneEvent::PathCreated(id));
        }
        id
    }

    /// Edit an object in place and record a modification.
    /// Returns false if the object doesn't exist or is locked.
    pub fn modify(&mut self, id: ObjectId, edit: impl FnOnce(&mut SceneObject)) -> bool {
        match self.objects.get_mut(&id) {
            Some(object) if object.lock.editable => {
                edit(object);
                self.events.push(SceneEvent::ObjectModified(id));
                true
            }
            _ => false,
        }
    }

    /// Delete an object (user action). Locked objects can't be selected and
    /// therefore can't be deleted.
    pub fn delete(&mut self, id: ObjectId) -> Option<SceneObject> {
        if self.objects.get(&id).is_some_and(|o| !o.lock.selectable) {
            return None;
        }
        self.remove(id)
    }
}

impl Scene for SceneGraph {
    fn contains(&self, id: ObjectId) -> bool {
        self.objects.contains_key(&id)
    }

    fn get(&self, id: ObjectId) -> Option<&SceneObject> {
        self.objects.get(&id)
    }

    fn get_mut(&mut self, id: ObjectId) -> Option<&mut SceneObject> {
        self.objects.get_mut(&id)
    }

    fn insert(&mut self, object: SceneObject) -> bool {
        let id = object.id;
        if self.objects.contains_key(&id) {
            return false;
        }
        self.z_order.push(id);
        self.objects.insert(id, object);
        self.events.push(SceneEvent::ObjectAdded(id));
        true
    }

    fn remove(&mut self, id: ObjectId) -> Option<SceneObject> {
        let removed = self.objects.remove(&id)?;
        self.z_order.retain(|&other| other != id);
        self.events.push(SceneEvent::ObjectRemoved(id));
        Some(removed)
    }

    fn ids(&self) -> Vec<ObjectId> {
        self.z_order.clone()
    }

    fn for_each_mut(&mut self, f: &mut dyn FnMut(&mut SceneObject)) {
        for object in self.objects.values_mut() {
            f(object);
        }
    }

    fn drain_events(&mut self) -> Vec<SceneEvent> {
        std::mem::take(&mut self.events)
    }

    fn len(&self) -> usize {
        self.objects.len()
    }
}
