//! Local scene model: the objects the rendering library draws.
//!
//! The bridge never owns the scene. It reaches it through the [`Scene`] trait,
//! which mirrors the object CRUD and event surface of the rendering library
//! (`object:added`, `object:modified`, `object:removed`, `path:created`).

mod graph;

pub use graph::SceneGraph;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::shapes::Shape;

/// Globally unique object identifier, assigned once at creation.
pub type ObjectId = Uuid;

/// Replicated-document client identifier.
pub type ClientId = u64;

/// Kind tag that selects the codec fields of an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Path,
    Rect,
    Circle,
    Line,
    Text,
    Image,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Path => "path",
            ObjectKind::Rect => "rect",
            ObjectKind::Circle => "circle",
            ObjectKind::Line => "line",
            ObjectKind::Text => "text",
            ObjectKind::Image => "image",
        }
    }

    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "path" => Some(ObjectKind::Path),
            "rect" => Some(ObjectKind::Rect),
            "circle" => Some(ObjectKind::Circle),
            "line" => Some(ObjectKind::Line),
            "text" => Some(ObjectKind::Text),
            "image" => Some(ObjectKind::Image),
            _ => None,
        }
    }
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Local interaction attributes. Derived from the permission policy and never
/// replicated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockState {
    pub selectable: bool,
    pub movable: bool,
    pub editable: bool,
}

impl LockState {
    /// Lock state with every attribute set to `!locked`.
    pub fn from_locked(locked: bool) -> Self {
        Self {
            selectable: !locked,
            movable: !locked,
            editable: !locked,
        }
    }

    pub fn is_locked(&self) -> bool {
        !self.selectable && !self.movable && !self.editable
    }
}

impl Default for LockState {
    fn default() -> Self {
        Self::from_locked(false)
    }
}

/// An object in the local scene.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneObject {
    /// Immutable identifier.
    pub id: ObjectId,
    /// Client that first published the object. Set once, never reassigned.
    pub created_by: Option<ClientId>,
    /// Local edit counter, bumped on every applied patch. Not replicated.
    pub version: u32,
    /// Local lock attributes.
    pub lock: LockState,
    /// Geometry and style.
    pub shape: Shape,
}

impl SceneObject {
    /// Create a new, not yet published object with a fresh id.
    pub fn new(shape: Shape) -> Self {
        Self::with_id(Uuid::new_v4(), shape)
    }

    /// Create an object with a known id (used when materializing remote entries).
    pub fn with_id(id: ObjectId, shape: Shape) -> Self {
        Self {
            id,
            created_by: None,
            version: 0,
            lock: LockState::default(),
            shape,
        }
    }

    pub fn kind(&self) -> ObjectKind {
        self.shape.kind()
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_locked()
    }
}

/// Notifications emitted by a scene when its contents change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneEvent {
    ObjectAdded(ObjectId),
    ObjectModified(ObjectId),
    ObjectRemoved(ObjectId),
    /// A freehand stroke was finished; fires alongside `ObjectAdded`.
    PathCreated(ObjectId),
}

/// Object store and event source of the local rendering library.
///
/// `insert` and `remove` must record the matching [`SceneEvent`]; mutations
/// through `get_mut`/`for_each_mut` are silent, like property writes on a
/// rendered object.
pub trait Scene {
    fn contains(&self, id: ObjectId) -> bool;

    fn get(&self, id: ObjectId) -> Option<&SceneObject>;

    fn get_mut(&mut self, id: ObjectId) -> Option<&mut SceneObject>;

    /// Insert an object. Returns `false` (and leaves the scene untouched) if the
    /// id is already present.
    fn insert(&mut self, object: SceneObject) -> bool;

    fn remove(&mut self, id: ObjectId) -> Option<SceneObject>;

    /// Ids of all objects, back to front.
    fn ids(&self) -> Vec<ObjectId>;

    fn for_each_mut(&mut self, f: &mut dyn FnMut(&mut SceneObject));

    /// Take the events recorded since the last call.
    fn drain_events(&mut self) -> Vec<SceneEvent>;

    fn len(&self) -> usize {
        self.ids().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
