//! Projection between the local scene and the shared `objects` map.
//!
//! Local scene changes are encoded into the shared document; remote entry
//! changes are decoded into the scene. Echoes are suppressed twice:
//! scene events produced while a remote change is being applied are dropped
//! (`applying_remote`), and document changes whose origin is this client are
//! ignored.

use std::collections::{HashMap, HashSet};

use loro::LoroValue;
use uuid::Uuid;

use crate::crdt::codec;
use crate::crdt::{ChangeKind, OBJECTS_KEY, SharedDocument};
use crate::error::{DecodeError, SyncResult};
use crate::permission::{self, PermissionPolicy};
use crate::scene::{ClientId, ObjectId, Scene};

/// Per-room bridge state.
#[derive(Debug, Default)]
pub struct SyncSession {
    /// Set while remote changes are written into the scene.
    pub applying_remote: bool,
    /// Set while a mirrored viewport is applied.
    pub applying_viewport: bool,
    /// Objects that exist both locally and in the shared map.
    pub known_ids: HashSet<ObjectId>,
    /// Whether the initial-state pass has run since the last join.
    pub initial_loaded: bool,
    /// Image objects parked until their source loads, with that source.
    pub awaiting_assets: HashMap<ObjectId, String>,
}

impl SyncSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget everything tied to the current connection.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Host hook for loading image sources before they are materialized.
pub trait AssetLoader {
    fn is_ready(&self, src: &str) -> bool;

    /// Start loading `src`. Completion is reported back through the room.
    fn request(&mut self, src: &str);
}

/// Loader for hosts that draw images lazily: every source counts as ready.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineAssets;

impl AssetLoader for InlineAssets {
    fn is_ready(&self, _src: &str) -> bool {
        true
    }

    fn request(&mut self, _src: &str) {}
}

/// Result of publishing a local change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Publish {
    /// The shared entry was written (or deleted).
    Written,
    /// The shared entry already matched; nothing was written.
    Unchanged,
    /// The permission policy forbids the change; the scene was rolled back.
    Refused,
    /// Skipped: a remote change is being applied, or the client hasn't joined.
    Suppressed,
}

/// One pass of the bridge over borrowed room state.
pub struct Bridge<'a> {
    session: &'a mut SyncSession,
    doc: &'a mut SharedDocument,
    policy: PermissionPolicy,
    local_client: Option<ClientId>,
    assets: &'a mut dyn AssetLoader,
}

impl<'a> Bridge<'a> {
    pub fn new(
        session: &'a mut SyncSession,
        doc: &'a mut SharedDocument,
        policy: PermissionPolicy,
        local_client: Option<ClientId>,
        assets: &'a mut dyn AssetLoader,
    ) -> Self {
        Self {
            session,
            doc,
            policy,
            local_client,
            assets,
        }
    }

    /// Run `f` with `applying_remote` set. Scene events recorded meanwhile are
    /// echoes and get discarded. The flag is cleared whatever `f` returns.
    fn with_remote_guard<R>(
        &mut self,
        scene: &mut dyn Scene,
        f: impl FnOnce(&mut Self, &mut dyn Scene) -> R,
    ) -> R {
        self.session.applying_remote = true;
        let result = f(&mut *self, &mut *scene);
        let echoes = scene.drain_events();
        if !echoes.is_empty() {
            log::trace!("dropped {} scene echoes", echoes.len());
        }
        self.session.applying_remote = false;
        result
    }

    fn entry(&mut self, id: ObjectId) -> Option<LoroValue> {
        self.doc.map(OBJECTS_KEY).get(&id.to_string())
    }

    /// Make the scene match the shared map: materialize every entry that
    /// isn't in the scene yet and drop scene objects that have no entry (they
    /// were drawn while not joined and never published).
    ///
    /// Returns `None` without touching anything while the local client id is
    /// unknown, so the call can simply be repeated later. Otherwise returns the
    /// number of inserted objects.
    pub fn load_initial_state(&mut self, scene: &mut dyn Scene) -> Option<usize> {
        self.local_client?;
        let mut entries = Vec::new();
        self.doc
            .map(OBJECTS_KEY)
            .for_each(|key, value| entries.push((key.to_string(), value.clone())));

        let (inserted, dropped) = self.with_remote_guard(scene, |bridge, scene| {
            let mut inserted = 0;
            for (key, entry) in &entries {
                let Ok(id) = Uuid::parse_str(key) else {
                    log::warn!("skipping entry with malformed key {key:?}");
                    continue;
                };
                match bridge.refresh(scene, id, entry) {
                    Ok(true) => inserted += 1,
                    Ok(false) => {}
                    Err(e) => log::warn!("skipping object {key}: {e}"),
                }
            }
            (inserted, bridge.drop_unshared(scene))
        });
        self.session.initial_loaded = true;
        log::info!(
            "initial state loaded: {inserted} new of {} entries, {dropped} local-only dropped",
            entries.len()
        );
        Some(inserted)
    }

    /// Remove scene objects with no shared entry.
    fn drop_unshared(&mut self, scene: &mut dyn Scene) -> usize {
        let keys: HashSet<String> = self.doc.map(OBJECTS_KEY).keys().into_iter().collect();
        let stale: Vec<ObjectId> = scene
            .ids()
            .into_iter()
            .filter(|id| !keys.contains(&id.to_string()))
            .filter(|id| !self.session.awaiting_assets.contains_key(id))
            .collect();
        for id in &stale {
            scene.remove(*id);
            self.session.known_ids.remove(id);
            log::debug!("dropped local-only object {id}");
        }
        stale.len()
    }

    /// Bring the scene's copy of `id` up to `entry`, materializing it when
    /// missing. An object whose kind no longer matches is replaced. Returns
    /// whether an object was inserted.
    fn refresh(
        &mut self,
        scene: &mut dyn Scene,
        id: ObjectId,
        entry: &LoroValue,
    ) -> Result<bool, DecodeError> {
        if !scene.contains(id) {
            return self.materialize(scene, id, entry);
        }
        match self.patch_existing(scene, id, entry) {
            Ok(_) => Ok(false),
            Err(e @ DecodeError::KindMismatch { .. }) => {
                log::debug!("replacing object {id}: {e}");
                scene.remove(id);
                self.session.known_ids.remove(&id);
                self.materialize(scene, id, entry)
            }
            Err(e) => Err(e),
        }
    }

    /// Decode `entry` and insert it. Returns whether an object was inserted.
    fn materialize(
        &mut self,
        scene: &mut dyn Scene,
        id: ObjectId,
        entry: &LoroValue,
    ) -> Result<bool, DecodeError> {
        let mut object = codec::decode(entry)?;
        if object.id != id {
            return Err(DecodeError::InvalidId(object.id.to_string()));
        }

        if let Some(src) = object.shape.asset_source() {
            if !self.assets.is_ready(src) {
                let previous = self.session.awaiting_assets.insert(id, src.to_string());
                if previous.as_deref() != Some(src) {
                    log::debug!("object {id} waits for {src}");
                    self.assets.request(src);
                }
                return Ok(false);
            }
        }
        self.session.awaiting_assets.remove(&id);

        let locked = self.policy.lock_for(&object, self.local_client);
        permission::apply_lock(&mut object, locked);

        // Another event may have materialized the same id first.
        if scene.contains(id) || !scene.insert(object) {
            log::debug!("object {id} already present, not inserting");
            return Ok(false);
        }
        self.session.known_ids.insert(id);
        log::debug!("materialized object {id} (locked: {locked})");
        Ok(true)
    }

    /// Patch the local copy of `id` from `entry`. Returns whether it changed.
    fn patch_existing(
        &mut self,
        scene: &mut dyn Scene,
        id: ObjectId,
        entry: &LoroValue,
    ) -> Result<bool, DecodeError> {
        let Some(object) = scene.get_mut(id) else {
            return Ok(false);
        };
        let changed = codec::apply_patch(object, entry)?;
        let locked = self.policy.lock_for(object, self.local_client);
        permission::apply_lock(object, locked);
        self.session.known_ids.insert(id);
        Ok(changed)
    }

    /// Write the local object `id` into the shared map.
    pub fn publish_local_change(&mut self, scene: &mut dyn Scene, id: ObjectId) -> SyncResult<Publish> {
        if self.session.applying_remote {
            return Ok(Publish::Suppressed);
        }
        let Some(local) = self.local_client else {
            log::debug!("not publishing {id}: no client id yet");
            return Ok(Publish::Suppressed);
        };
        let entry = self.entry(id);

        let Some(object) = scene.get_mut(id) else {
            return Ok(Publish::Suppressed);
        };
        if object.created_by.is_none() {
            // First publish. An existing entry keeps its recorded owner.
            object.created_by = entry.as_ref().and_then(codec::entry_owner).or(Some(local));
        }
        let locked = self.policy.lock_for(object, Some(local));
        permission::apply_lock(object, locked);
        let snapshot = object.clone();

        if locked {
            log::warn!("refusing to publish {id}: locked for this client");
            self.roll_back(scene, id, entry.as_ref());
            return Ok(Publish::Refused);
        }
        if entry.as_ref().is_some_and(|e| codec::matches(&snapshot, e)) {
            self.session.known_ids.insert(id);
            return Ok(Publish::Unchanged);
        }

        self.doc
            .map(OBJECTS_KEY)
            .set_entry(&id.to_string(), |map| codec::encode(&snapshot, map))?;
        self.session.known_ids.insert(id);
        log::debug!("published object {id}");
        Ok(Publish::Written)
    }

    /// Restore the scene's copy of `id` to the shared entry, or remove it if
    /// there is none.
    fn roll_back(&mut self, scene: &mut dyn Scene, id: ObjectId, entry: Option<&LoroValue>) {
        self.with_remote_guard(scene, |bridge, scene| {
            let Some(entry) = entry else {
                scene.remove(id);
                return;
            };
            if let Err(e) = bridge.patch_existing(scene, id, entry) {
                log::warn!("cannot restore object {id} ({e}); reloading it");
                scene.remove(id);
                if let Err(e) = bridge.materialize(scene, id, entry) {
                    log::warn!("skipping object {id}: {e}");
                }
            }
        });
    }

    /// Delete the shared entry of a locally removed object.
    pub fn publish_local_delete(&mut self, scene: &mut dyn Scene, id: ObjectId) -> SyncResult<Publish> {
        if self.session.applying_remote {
            return Ok(Publish::Suppressed);
        }
        self.session.awaiting_assets.remove(&id);
        let Some(entry) = self.entry(id) else {
            self.session.known_ids.remove(&id);
            return Ok(Publish::Unchanged);
        };

        let owner = codec::entry_owner(&entry);
        if permission::compute_lock(
            owner,
            self.policy.role,
            self.policy.global_read_only(),
            self.policy.enforce_ownership,
            self.local_client,
        ) {
            log::warn!("refusing to delete {id}: locked for this client");
            self.with_remote_guard(scene, |bridge, scene| {
                if let Err(e) = bridge.materialize(scene, id, &entry) {
                    log::warn!("cannot restore object {id}: {e}");
                }
            });
            return Ok(Publish::Refused);
        }

        self.doc.map(OBJECTS_KEY).delete(&id.to_string())?;
        self.session.known_ids.remove(&id);
        log::debug!("deleted object {id}");
        Ok(Publish::Written)
    }

    /// Apply one change of the shared `objects` map to the scene.
    pub fn on_remote_change(
        &mut self,
        scene: &mut dyn Scene,
        key: &str,
        kind: ChangeKind,
        origin: ClientId,
    ) {
        if origin == self.doc.client_id() {
            return;
        }
        let Ok(id) = Uuid::parse_str(key) else {
            log::warn!("ignoring change to malformed key {key:?}");
            return;
        };

        match kind {
            ChangeKind::Add | ChangeKind::Update => {
                // Apply the latest value; it may be newer than this change.
                let Some(entry) = self.entry(id) else {
                    return;
                };
                self.with_remote_guard(scene, |bridge, scene| {
                    if let Err(e) = bridge.refresh(scene, id, &entry) {
                        log::warn!("skipping object {id}: {e}");
                    }
                });
            }
            ChangeKind::Delete => {
                self.session.awaiting_assets.remove(&id);
                self.session.known_ids.remove(&id);
                self.with_remote_guard(scene, |_, scene| {
                    if scene.remove(id).is_some() {
                        log::debug!("removed object {id}");
                    }
                });
            }
        }
    }

    /// Finish materializing objects that were waiting for `src`.
    ///
    /// The current shared entry is used, not the one that started the load:
    /// deleted entries are skipped and objects that appeared meanwhile are
    /// left alone.
    pub fn asset_loaded(&mut self, scene: &mut dyn Scene, src: &str, ok: bool) -> usize {
        let waiting: Vec<ObjectId> = self
            .session
            .awaiting_assets
            .iter()
            .filter(|(_, s)| s.as_str() == src)
            .map(|(id, _)| *id)
            .collect();

        let mut inserted = 0;
        for id in waiting {
            self.session.awaiting_assets.remove(&id);
            if !ok {
                log::warn!("dropping object {id}: failed to load {src}");
                continue;
            }
            let Some(entry) = self.entry(id) else {
                continue;
            };
            if scene.contains(id) {
                continue;
            }
            let result = self.with_remote_guard(scene, |bridge, scene| {
                bridge.materialize(scene, id, &entry)
            });
            match result {
                Ok(true) => inserted += 1,
                Ok(false) => {}
                Err(e) => log::warn!("skipping object {id}: {e}"),
            }
        }
        inserted
    }

    /// Recompute the lock of every object in the scene.
    pub fn reapply_permissions(&mut self, scene: &mut dyn Scene) -> usize {
        permission::reapply_all(scene, &self.policy, self.local_client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::Role;
    use crate::scene::{ObjectKind, SceneGraph, SceneObject};
    use crate::shapes::{Circle, Image, Rectangle, Shape};
    use kurbo::{Affine, Point};

    struct Peer {
        doc: SharedDocument,
        session: SyncSession,
        scene: SceneGraph,
        policy: PermissionPolicy,
        assets: Box<dyn AssetLoader>,
    }

    impl Peer {
        fn new(role: Role) -> Self {
            let mut doc = SharedDocument::open("room");
            doc.observe(OBJECTS_KEY);
            Self {
                doc,
                session: SyncSession::new(),
                scene: SceneGraph::new(),
                policy: PermissionPolicy {
                    role,
                    read_only: false,
                    enforce_ownership: true,
                    allow_participant_draw: true,
                },
                assets: Box::new(InlineAssets),
            }
        }

        fn id(&self) -> ClientId {
            self.doc.client_id()
        }

        fn parts(&mut self) -> (Bridge<'_>, &mut SceneGraph) {
            let local = Some(self.doc.client_id());
            (
                Bridge::new(
                    &mut self.session,
                    &mut self.doc,
                    self.policy,
                    local,
                    self.assets.as_mut(),
                ),
                &mut self.scene,
            )
        }

        fn draw(&mut self) -> ObjectId {
            let id = self
                .scene
                .add(SceneObject::new(Shape::Rect(Rectangle::new(Point::ZERO, 10.0, 10.0))));
            self.scene.drain_events();
            let (mut bridge, scene) = self.parts();
            assert_eq!(bridge.publish_local_change(scene, id).unwrap(), Publish::Written);
            id
        }

        fn apply_changes(&mut self) {
            for change in self.doc.take_changes() {
                let (mut bridge, scene) = self.parts();
                bridge.on_remote_change(scene, &change.key, change.kind, change.origin);
            }
        }
    }

    fn sync(from: &mut Peer, to: &mut Peer) {
        let origin = from.id();
        if let Some(bytes) = from.doc.export_pending().unwrap() {
            to.doc.import(&bytes, origin).unwrap();
        }
        from.doc.take_changes();
        to.apply_changes();
    }

    #[test]
    fn test_publish_assigns_owner_once() {
        let mut peer = Peer::new(Role::Participant);
        let id = peer.draw();
        let owner = peer.id();
        assert_eq!(peer.scene.get(id).unwrap().created_by, Some(owner));
        assert!(peer.session.known_ids.contains(&id));

        let entry = peer.doc.map(OBJECTS_KEY).get(&id.to_string()).unwrap();
        assert_eq!(codec::entry_owner(&entry), Some(owner));

        // Unchanged republish writes nothing.
        let (mut bridge, scene) = peer.parts();
        assert_eq!(bridge.publish_local_change(scene, id).unwrap(), Publish::Unchanged);
    }

    #[test]
    fn test_publish_suppressed_while_applying_remote() {
        let mut peer = Peer::new(Role::Presenter);
        let id = peer
            .scene
            .add(SceneObject::new(Shape::Rect(Rectangle::new(Point::ZERO, 1.0, 1.0))));
        peer.session.applying_remote = true;
        let (mut bridge, scene) = peer.parts();
        assert_eq!(bridge.publish_local_change(scene, id).unwrap(), Publish::Suppressed);
        assert!(peer.doc.map(OBJECTS_KEY).is_empty());
    }

    #[test]
    fn test_remote_add_is_locked_for_non_owner() {
        let mut presenter = Peer::new(Role::Presenter);
        let mut student = Peer::new(Role::Participant);
        let id = presenter.draw();
        sync(&mut presenter, &mut student);

        let object = student.scene.get(id).unwrap();
        assert_eq!(object.created_by, Some(presenter.id()));
        assert!(object.is_locked());
        // Materializing is not a local add.
        assert!(student.scene.drain_events().is_empty());
        assert!(!student.session.applying_remote);
    }

    #[test]
    fn test_own_origin_ignored() {
        let mut peer = Peer::new(Role::Presenter);
        let id = peer.draw();
        peer.scene.remove(id);
        // The local commit's change carries our own origin.
        peer.apply_changes();
        assert!(!peer.scene.contains(id));
    }

    #[test]
    fn test_remote_update_keeps_owner() {
        let mut a = Peer::new(Role::Presenter);
        let mut b = Peer::new(Role::Presenter);
        let id = a.draw();
        sync(&mut a, &mut b);

        b.scene.modify(id, |o| o.shape.transform(Affine::translate((4.0, 0.0))));
        b.scene.drain_events();
        let (mut bridge, scene) = b.parts();
        assert_eq!(bridge.publish_local_change(scene, id).unwrap(), Publish::Written);
        sync(&mut b, &mut a);

        let object = a.scene.get(id).unwrap();
        assert_eq!(object.created_by, Some(a.id()));
        assert_eq!(object.version, 1);
        assert!((object.shape.bounds().x0 - 4.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_remote_delete_removes() {
        let mut a = Peer::new(Role::Presenter);
        let mut b = Peer::new(Role::Presenter);
        let id = a.draw();
        sync(&mut a, &mut b);

        a.scene.delete(id);
        a.scene.drain_events();
        let (mut bridge, scene) = a.parts();
        assert_eq!(bridge.publish_local_delete(scene, id).unwrap(), Publish::Written);
        sync(&mut a, &mut b);

        assert!(!b.scene.contains(id));
        assert!(!b.session.known_ids.contains(&id));
    }

    #[test]
    fn test_duplicate_materialize_is_noop() {
        let mut a = Peer::new(Role::Presenter);
        let mut b = Peer::new(Role::Participant);
        let id = a.draw();
        sync(&mut a, &mut b);

        let origin = a.id();
        let (mut bridge, scene) = b.parts();
        bridge.on_remote_change(scene, &id.to_string(), ChangeKind::Add, origin);
        bridge.on_remote_change(scene, &id.to_string(), ChangeKind::Add, origin);
        assert_eq!(b.scene.len(), 1);
    }

    #[test]
    fn test_bad_entry_skipped_and_guard_reset() {
        let mut b = Peer::new(Role::Participant);
        let good = Uuid::new_v4();
        let bad = Uuid::new_v4();
        let mut object = SceneObject::with_id(good, Shape::Rect(Rectangle::new(Point::ZERO, 1.0, 1.0)));
        object.created_by = Some(1);
        b.doc
            .map(OBJECTS_KEY)
            .set_entry(&bad.to_string(), |map| {
                map.insert("type", "hexagon")?;
                Ok(())
            })
            .unwrap();
        b.doc
            .map(OBJECTS_KEY)
            .set_entry(&good.to_string(), |map| codec::encode(&object, map))
            .unwrap();
        b.doc.take_changes();

        let (mut bridge, scene) = b.parts();
        assert_eq!(bridge.load_initial_state(scene), Some(1));
        assert!(!b.session.applying_remote);
        assert!(b.scene.contains(good));
        assert!(!b.scene.contains(bad));
    }

    #[test]
    fn test_initial_state_waits_for_client_id() {
        let mut peer = Peer::new(Role::Participant);
        let mut bridge = Bridge::new(
            &mut peer.session,
            &mut peer.doc,
            peer.policy,
            None,
            peer.assets.as_mut(),
        );
        assert_eq!(bridge.load_initial_state(&mut peer.scene), None);
        assert!(!peer.session.initial_loaded);
    }

    #[test]
    fn test_initial_state_rerun_has_no_duplicates() {
        let mut a = Peer::new(Role::Presenter);
        let mut b = Peer::new(Role::Participant);
        a.draw();
        a.draw();
        let origin = a.id();
        let bytes = a.doc.snapshot().unwrap();
        b.doc.import(&bytes, origin).unwrap();
        b.doc.take_changes();

        let (mut bridge, scene) = b.parts();
        assert_eq!(bridge.load_initial_state(scene), Some(2));
        b.session.reset();
        let (mut bridge, scene) = b.parts();
        assert_eq!(bridge.load_initial_state(scene), Some(0));
        assert_eq!(b.scene.len(), 2);
        assert_eq!(b.session.known_ids.len(), 2);
    }

    #[test]
    fn test_initial_state_drops_unpublished_objects() {
        let mut a = Peer::new(Role::Presenter);
        let mut b = Peer::new(Role::Participant);
        let shared = a.draw();
        sync(&mut a, &mut b);

        // Drawn while the room wasn't joined, so never published.
        let stray = b
            .scene
            .add(SceneObject::new(Shape::Rect(Rectangle::new(Point::ZERO, 3.0, 3.0))));
        b.scene.drain_events();

        b.session.reset();
        let (mut bridge, scene) = b.parts();
        assert_eq!(bridge.load_initial_state(scene), Some(0));
        assert!(b.scene.contains(shared));
        assert!(!b.scene.contains(stray));
        assert_eq!(b.scene.len(), b.doc.map(OBJECTS_KEY).len());
        assert!(b.scene.drain_events().is_empty());
    }

    #[test]
    fn test_remote_kind_change_replaces_object() {
        let mut a = Peer::new(Role::Presenter);
        let mut b = Peer::new(Role::Participant);
        let id = a.draw();
        sync(&mut a, &mut b);
        assert_eq!(b.scene.get(id).unwrap().kind(), ObjectKind::Rect);

        let mut circle = SceneObject::with_id(id, Shape::Circle(Circle::new(Point::ZERO, 4.0)));
        circle.created_by = Some(a.id());
        a.doc
            .map(OBJECTS_KEY)
            .set_entry(&id.to_string(), |map| codec::encode(&circle, map))
            .unwrap();
        sync(&mut a, &mut b);

        let replaced = b.scene.get(id).unwrap();
        assert_eq!(replaced.kind(), ObjectKind::Circle);
        assert_eq!(replaced.created_by, Some(a.id()));
        assert!(replaced.is_locked());
        assert_eq!(b.scene.len(), 1);
        assert!(b.scene.drain_events().is_empty());
    }

    #[test]
    fn test_read_only_delete_allowed_for_presenter_only() {
        let mut a = Peer::new(Role::Presenter);
        let mut b = Peer::new(Role::Participant);
        let board = a.draw();
        let drawn = b.draw();
        sync(&mut a, &mut b);
        sync(&mut b, &mut a);
        a.policy.read_only = true;
        b.policy.read_only = true;

        b.scene.remove(drawn);
        b.scene.drain_events();
        let (mut bridge, scene) = b.parts();
        assert_eq!(bridge.publish_local_delete(scene, drawn).unwrap(), Publish::Refused);
        assert!(b.scene.contains(drawn));

        a.scene.remove(drawn);
        a.scene.remove(board);
        a.scene.drain_events();
        let (mut bridge, scene) = a.parts();
        assert_eq!(bridge.publish_local_delete(scene, drawn).unwrap(), Publish::Written);
        assert_eq!(bridge.publish_local_delete(scene, board).unwrap(), Publish::Written);
        assert!(a.doc.map(OBJECTS_KEY).is_empty());
    }

    #[test]
    fn test_refused_add_is_rolled_back() {
        let mut peer = Peer::new(Role::Participant);
        peer.policy.allow_participant_draw = false;
        let id = peer
            .scene
            .add(SceneObject::new(Shape::Rect(Rectangle::new(Point::ZERO, 1.0, 1.0))));
        peer.scene.drain_events();

        let (mut bridge, scene) = peer.parts();
        assert_eq!(bridge.publish_local_change(scene, id).unwrap(), Publish::Refused);
        assert!(!peer.scene.contains(id));
        assert!(peer.doc.map(OBJECTS_KEY).is_empty());
        assert!(peer.scene.drain_events().is_empty());
    }

    #[test]
    fn test_refused_delete_restores_object() {
        let mut a = Peer::new(Role::Presenter);
        let mut b = Peer::new(Role::Participant);
        let id = a.draw();
        sync(&mut a, &mut b);

        // Bypass the scene's lock check, as a misbehaving tool would.
        b.scene.remove(id);
        b.scene.drain_events();
        let (mut bridge, scene) = b.parts();
        assert_eq!(bridge.publish_local_delete(scene, id).unwrap(), Publish::Refused);
        assert!(b.scene.get(id).unwrap().is_locked());
        assert!(b.doc.map(OBJECTS_KEY).contains(&id.to_string()));
    }

    struct SlowAssets {
        ready: HashSet<String>,
        requested: Vec<String>,
    }

    impl AssetLoader for SlowAssets {
        fn is_ready(&self, src: &str) -> bool {
            self.ready.contains(src)
        }

        fn request(&mut self, src: &str) {
            self.requested.push(src.to_string());
        }
    }

    #[test]
    fn test_image_waits_for_asset() {
        let mut a = Peer::new(Role::Presenter);
        let mut b = Peer::new(Role::Participant);
        b.assets = Box::new(SlowAssets {
            ready: HashSet::new(),
            requested: Vec::new(),
        });

        let src = "https://cdn.example/board.png";
        let id = a
            .scene
            .add(SceneObject::new(Shape::Image(Image::new(Point::ZERO, src, 64, 64))));
        a.scene.drain_events();
        let (mut bridge, scene) = a.parts();
        bridge.publish_local_change(scene, id).unwrap();
        sync(&mut a, &mut b);

        assert!(!b.scene.contains(id));
        assert_eq!(b.session.awaiting_assets.get(&id).map(String::as_str), Some(src));

        b.assets = Box::new(SlowAssets {
            ready: HashSet::from([src.to_string()]),
            requested: Vec::new(),
        });
        let (mut bridge, scene) = b.parts();
        assert_eq!(bridge.asset_loaded(scene, src, true), 1);
        assert!(b.scene.contains(id));
        assert!(b.session.awaiting_assets.is_empty());
    }

    #[test]
    fn test_asset_for_deleted_entry_is_dropped() {
        let mut b = Peer::new(Role::Participant);
        let id = Uuid::new_v4();
        b.session.awaiting_assets.insert(id, "a.png".to_string());
        let (mut bridge, scene) = b.parts();
        assert_eq!(bridge.asset_loaded(scene, "a.png", true), 0);
        assert!(b.session.awaiting_assets.is_empty());
        assert!(b.scene.is_empty());
    }
}
