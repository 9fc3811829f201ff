//! Ordered per-room queue of bridge events.

use std::collections::VecDeque;

use crate::crdt::{ChangeKind, MapChange, OBJECTS_KEY, SESSION_KEY, VIEWPORT_KEY};
use crate::scene::{ClientId, ObjectId, SceneEvent};

/// Everything the bridge reacts to, from either side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    LocalObjectAdded(ObjectId),
    LocalObjectModified(ObjectId),
    LocalObjectRemoved(ObjectId),
    /// An object entry changed in the shared document.
    RemoteEntryChanged {
        key: String,
        kind: ChangeKind,
        origin: ClientId,
    },
    /// The replicated session permissions changed.
    PermissionChanged { origin: ClientId },
    /// The replicated viewport transform changed.
    ViewportChanged { origin: ClientId },
    /// A presence frame arrived or a peer left.
    AwarenessChanged,
    /// The host finished (or failed) loading an image source.
    AssetLoaded { src: String, ok: bool },
}

impl BridgeEvent {
    /// Map a scene notification. `path:created` fires next to `object:added`
    /// and is only used when its add is missing from the batch.
    fn from_scene(event: SceneEvent, batch: &[SceneEvent]) -> Option<Self> {
        match event {
            SceneEvent::ObjectAdded(id) => Some(BridgeEvent::LocalObjectAdded(id)),
            SceneEvent::ObjectModified(id) => Some(BridgeEvent::LocalObjectModified(id)),
            SceneEvent::ObjectRemoved(id) => Some(BridgeEvent::LocalObjectRemoved(id)),
            SceneEvent::PathCreated(id) => {
                if batch.contains(&SceneEvent::ObjectAdded(id)) {
                    None
                } else {
                    Some(BridgeEvent::LocalObjectAdded(id))
                }
            }
        }
    }

    /// Map a document change. Changes to unknown root maps are dropped.
    pub fn from_change(change: MapChange) -> Option<Self> {
        match change.map.as_str() {
            OBJECTS_KEY => Some(BridgeEvent::RemoteEntryChanged {
                key: change.key,
                kind: change.kind,
                origin: change.origin,
            }),
            SESSION_KEY => Some(BridgeEvent::PermissionChanged {
                origin: change.origin,
            }),
            VIEWPORT_KEY => Some(BridgeEvent::ViewportChanged {
                origin: change.origin,
            }),
            _ => None,
        }
    }
}

/// FIFO of pending events for one room.
#[derive(Debug, Default)]
pub struct EventQueue {
    events: VecDeque<BridgeEvent>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: BridgeEvent) {
        self.events.push_back(event);
    }

    pub fn pop(&mut self) -> Option<BridgeEvent> {
        self.events.pop_front()
    }

    /// Queue a batch of scene notifications in order.
    pub fn extend_scene(&mut self, batch: &[SceneEvent]) {
        self.events
            .extend(batch.iter().filter_map(|e| BridgeEvent::from_scene(*e, batch)));
    }

    /// Queue document changes in order.
    pub fn extend_changes(&mut self, changes: Vec<MapChange>) {
        self.events
            .extend(changes.into_iter().filter_map(BridgeEvent::from_change));
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_scene_events_keep_order() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut queue = EventQueue::new();
        queue.extend_scene(&[
            SceneEvent::ObjectAdded(a),
            SceneEvent::PathCreated(a),
            SceneEvent::ObjectModified(b),
            SceneEvent::ObjectRemoved(a),
        ]);
        assert_eq!(queue.pop(), Some(BridgeEvent::LocalObjectAdded(a)));
        assert_eq!(queue.pop(), Some(BridgeEvent::LocalObjectModified(b)));
        assert_eq!(queue.pop(), Some(BridgeEvent::LocalObjectRemoved(a)));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_lone_path_created_counts_as_add() {
        let a = Uuid::new_v4();
        let mut queue = EventQueue::new();
        queue.extend_scene(&[SceneEvent::PathCreated(a)]);
        assert_eq!(queue.pop(), Some(BridgeEvent::LocalObjectAdded(a)));
    }

    #[test]
    fn test_changes_routed_by_map() {
        let change = |map: &str| MapChange {
            map: map.to_string(),
            key: "k".to_string(),
            kind: ChangeKind::Update,
            origin: 3,
        };
        let mut queue = EventQueue::new();
        queue.extend_changes(vec![
            change(OBJECTS_KEY),
            change(SESSION_KEY),
            change(VIEWPORT_KEY),
            change("other"),
        ]);
        assert_eq!(queue.len(), 3);
        assert!(matches!(
            queue.pop(),
            Some(BridgeEvent::RemoteEntryChanged { origin: 3, .. })
        ));
        assert_eq!(queue.pop(), Some(BridgeEvent::PermissionChanged { origin: 3 }));
        assert_eq!(queue.pop(), Some(BridgeEvent::ViewportChanged { origin: 3 }));
    }
}
