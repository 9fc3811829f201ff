//! Room-scoped shared document backed by a Loro CRDT.

use std::collections::{BTreeMap, HashMap};

use loro::{ExportMode, LoroDoc, LoroList, LoroMap, LoroValue, VersionVector};

use crate::error::{SyncError, SyncResult};
use crate::scene::ClientId;

/// Map holding one nested map per scene object, keyed by object id.
pub const OBJECTS_KEY: &str = "objects";
/// Map holding session-wide permissions.
pub const SESSION_KEY: &str = "session";
/// Map holding the presenter's view transform.
pub const VIEWPORT_KEY: &str = "viewport";
/// Key of the participant draw permission inside [`SESSION_KEY`].
pub const ALLOW_DRAW_KEY: &str = "allowParticipantDraw";
/// Key of the 6-element affine transform inside [`VIEWPORT_KEY`].
pub const TRANSFORM_KEY: &str = "transform";

/// Connection state of the document's network session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// What happened to a key of an observed map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Add,
    Update,
    Delete,
}

/// One observed change to a key of a root map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapChange {
    /// Root map name.
    pub map: String,
    pub key: String,
    pub kind: ChangeKind,
    /// Client whose transaction produced the change.
    pub origin: ClientId,
}

/// A replicated document for one room.
///
/// Observers are pull-based: every local commit and every import diffs each
/// observed root map against its last observed state and queues [`MapChange`]s,
/// which the owner drains with [`SharedDocument::take_changes`].
pub struct SharedDocument {
    doc: LoroDoc,
    room: String,
    status: ConnectionState,
    /// Last observed contents of each observed root map.
    observed: HashMap<String, BTreeMap<String, LoroValue>>,
    changes: Vec<MapChange>,
    /// Version already handed out by `export_pending`.
    exported: VersionVector,
}

impl SharedDocument {
    /// Open an empty document for `room`.
    pub fn open(room: impl Into<String>) -> Self {
        let doc = LoroDoc::new();
        let exported = doc.oplog_vv();
        Self {
            doc,
            room: room.into(),
            status: ConnectionState::Disconnected,
            observed: HashMap::new(),
            changes: Vec::new(),
            exported,
        }
    }

    /// The room this document belongs to.
    pub fn room(&self) -> &str {
        &self.room
    }

    /// This client's identifier (the Loro peer id).
    pub fn client_id(&self) -> ClientId {
        self.doc.peer_id()
    }

    pub fn status(&self) -> ConnectionState {
        self.status
    }

    pub fn set_status(&mut self, status: ConnectionState) {
        if self.status != status {
            log::info!("room {}: connection {:?} -> {:?}", self.room, self.status, status);
            self.status = status;
        }
    }

    /// Access a root map.
    pub fn map<'a>(&'a mut self, name: &'a str) -> SharedMap<'a> {
        SharedMap { doc: self, name }
    }

    /// Number of keys in the root map `name`.
    pub fn entry_count(&self, name: &str) -> usize {
        self.doc.get_map(name).len()
    }

    /// Start reporting changes to `name`. Only changes after this call are reported.
    pub fn observe(&mut self, name: &str) {
        let current = self.read_map(name);
        self.observed.insert(name.to_string(), current);
    }

    /// Stop reporting changes to `name`.
    pub fn unobserve(&mut self, name: &str) {
        self.observed.remove(name);
    }

    pub fn is_observed(&self, name: &str) -> bool {
        self.observed.contains_key(name)
    }

    /// Drain changes queued since the last call.
    pub fn take_changes(&mut self) -> Vec<MapChange> {
        std::mem::take(&mut self.changes)
    }

    /// Merge an update produced by `origin`.
    pub fn import(&mut self, bytes: &[u8], origin: ClientId) -> SyncResult<()> {
        // If nothing local is pending, imported ops don't need to be re-exported.
        let clean = self.doc.oplog_vv() == self.exported;
        self.doc.import(bytes)?;
        if clean {
            self.exported = self.doc.oplog_vv();
        }
        self.collect(origin);
        Ok(())
    }

    /// Export everything not yet exported, or `None` if there is nothing new.
    pub fn export_pending(&mut self) -> SyncResult<Option<Vec<u8>>> {
        let current = self.doc.oplog_vv();
        if current == self.exported {
            return Ok(None);
        }
        let bytes = self
            .doc
            .export(ExportMode::updates(&self.exported))
            .map_err(|e| SyncError::Export(e.to_string()))?;
        self.exported = current;
        Ok(Some(bytes))
    }

    /// Export the full document state.
    pub fn snapshot(&self) -> SyncResult<Vec<u8>> {
        self.doc
            .export(ExportMode::Snapshot)
            .map_err(|e| SyncError::Export(e.to_string()))
    }

    /// Release all observers and mark the session as closed. Document content
    /// is kept so a later reconnect reuses the same client id.
    pub fn disconnect(&mut self) {
        self.observed.clear();
        self.changes.clear();
        self.set_status(ConnectionState::Disconnected);
    }

    fn read_map(&self, name: &str) -> BTreeMap<String, LoroValue> {
        match self.doc.get_map(name).get_deep_value() {
            LoroValue::Map(map) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            _ => BTreeMap::new(),
        }
    }

    fn commit_local(&mut self) {
        self.doc.commit();
        let origin = self.client_id();
        self.collect(origin);
    }

    fn collect(&mut self, origin: ClientId) {
        let names: Vec<String> = self.observed.keys().cloned().collect();
        for name in names {
            let current = self.read_map(&name);
            let Some(previous) = self.observed.get(&name) else {
                continue;
            };
            for (key, value) in &current {
                let kind = match previous.get(key) {
                    None => ChangeKind::Add,
                    Some(old) if old != value => ChangeKind::Update,
                    Some(_) => continue,
                };
                self.changes.push(MapChange {
                    map: name.clone(),
                    key: key.clone(),
                    kind,
                    origin,
                });
            }
            for key in previous.keys().filter(|k| !current.contains_key(*k)) {
                self.changes.push(MapChange {
                    map: name.clone(),
                    key: key.clone(),
                    kind: ChangeKind::Delete,
                    origin,
                });
            }
            self.observed.insert(name, current);
        }
    }
}

/// Key-value view of one root map. Every write commits immediately.
pub struct SharedMap<'a> {
    doc: &'a mut SharedDocument,
    name: &'a str,
}

impl SharedMap<'_> {
    fn handle(&self) -> LoroMap {
        self.doc.doc.get_map(self.name)
    }

    /// Deep value stored under `key`.
    pub fn get(&self, key: &str) -> Option<LoroValue> {
        match self.handle().get_deep_value() {
            LoroValue::Map(map) => map.get(key).cloned(),
            _ => None,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.handle().get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.handle().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<String> {
        self.doc.read_map(self.name).into_keys().collect()
    }

    pub fn for_each(&self, mut f: impl FnMut(&str, &LoroValue)) {
        for (key, value) in &self.doc.read_map(self.name) {
            f(key, value);
        }
    }

    /// Store a plain value.
    pub fn set(&mut self, key: &str, value: impl Into<LoroValue>) -> SyncResult<()> {
        self.handle().insert(key, value)?;
        self.doc.commit_local();
        Ok(())
    }

    /// Replace `key` with a fresh nested map filled by `fill`.
    pub fn set_entry(
        &mut self,
        key: &str,
        fill: impl FnOnce(&LoroMap) -> SyncResult<()>,
    ) -> SyncResult<()> {
        let child = self.handle().insert_container(key, LoroMap::new())?;
        fill(&child)?;
        self.doc.commit_local();
        Ok(())
    }

    /// Replace `key` with a fresh list of numbers.
    pub fn set_numbers(&mut self, key: &str, values: &[f64]) -> SyncResult<()> {
        let list = self.handle().insert_container(key, LoroList::new())?;
        for value in values {
            list.push(*value)?;
        }
        self.doc.commit_local();
        Ok(())
    }

    /// Delete `key`. Returns false if it wasn't present.
    pub fn delete(&mut self, key: &str) -> SyncResult<bool> {
        if !self.contains(key) {
            return Ok(false);
        }
        self.handle().delete(key)?;
        self.doc.commit_local();
        Ok(true)
    }
}
