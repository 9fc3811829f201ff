//! Room orchestration: one shared document, one bridge session and one
//! transport per room, driven by the host once per frame.

use kurbo::{Point, Vec2};
use loro::LoroValue;

use crate::bridge::{AssetLoader, Bridge, InlineAssets, SyncSession};
use crate::bus::{BridgeEvent, EventQueue};
use crate::camera::Camera;
use crate::config::RoomConfig;
use crate::crdt::{
    ALLOW_DRAW_KEY, ConnectionState, OBJECTS_KEY, SESSION_KEY, SharedDocument, VIEWPORT_KEY,
};
use crate::debounce::{Duration, Instant};
use crate::error::{SyncError, SyncResult, TransportError};
use crate::permission::{PermissionPolicy, Role};
use crate::presence::{Participants, PresenceTracker};
use crate::protocol::{AwarenessState, ClientMessage, CursorPosition, UserInfo, encode_payload};
use crate::scene::{ClientId, Scene};
use crate::transport::{Transport, TransportEvent};
use crate::viewport::ViewportMirror;

/// Origin recorded for state that arrives through the relay's join snapshot.
pub const RELAY_ORIGIN: ClientId = 0;

/// Root maps whose changes the room reacts to.
const OBSERVED_MAPS: [&str; 3] = [OBJECTS_KEY, SESSION_KEY, VIEWPORT_KEY];

/// A collaborative session in one room.
pub struct CollabRoom<T: Transport> {
    config: RoomConfig,
    transport: T,
    doc: SharedDocument,
    session: SyncSession,
    policy: PermissionPolicy,
    presence: PresenceTracker,
    viewport: ViewportMirror,
    queue: EventQueue,
    assets: Box<dyn AssetLoader>,
    /// The relay confirmed our join.
    joined: bool,
    on_draw_permission: Option<Box<dyn FnMut(bool)>>,
}

impl<T: Transport> CollabRoom<T> {
    pub fn new(config: RoomConfig, transport: T) -> Self {
        let policy = PermissionPolicy {
            role: config.role,
            read_only: config.read_only,
            enforce_ownership: config.enforce_ownership,
            allow_participant_draw: config.default_participant_draw,
        };
        let viewport = ViewportMirror::new(
            config.role,
            Duration::from_millis(config.viewport_debounce_ms),
        );
        Self {
            doc: SharedDocument::open(config.room.clone()),
            config,
            transport,
            session: SyncSession::new(),
            policy,
            presence: PresenceTracker::new(),
            viewport,
            queue: EventQueue::new(),
            assets: Box::new(InlineAssets),
            joined: false,
            on_draw_permission: None,
        }
    }

    /// Use a host loader for image sources.
    pub fn with_assets(mut self, assets: impl AssetLoader + 'static) -> Self {
        self.assets = Box::new(assets);
        self
    }

    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    pub fn document(&self) -> &SharedDocument {
        &self.doc
    }

    pub fn session(&self) -> &SyncSession {
        &self.session
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    // --- Host surface ---

    pub fn connection_status(&self) -> bool {
        self.doc.status() == ConnectionState::Connected
    }

    pub fn participants(&self) -> Participants {
        self.presence.snapshot()
    }

    pub fn local_client_id(&self) -> Option<ClientId> {
        self.presence.local_client_id()
    }

    /// Whether this client may currently draw.
    pub fn draw_allowed(&self) -> bool {
        self.policy.draw_allowed()
    }

    /// Called with the new draw permission after every permission re-scan.
    pub fn on_draw_permission_changed(&mut self, callback: impl FnMut(bool) + 'static) {
        self.on_draw_permission = Some(Box::new(callback));
    }

    /// Replicate the participant draw permission. Presenter only.
    pub fn set_session_draw_permission(&mut self, allow: bool) -> SyncResult<()> {
        if self.policy.role != Role::Presenter {
            return Err(SyncError::PermissionDenied);
        }
        self.doc.map(SESSION_KEY).set(ALLOW_DRAW_KEY, allow)
    }

    /// Report that an image source finished loading (or failed to).
    pub fn asset_loaded(&mut self, src: impl Into<String>, ok: bool) {
        self.queue.push(BridgeEvent::AssetLoaded {
            src: src.into(),
            ok,
        });
    }

    /// Drop every object waiting for `src`.
    pub fn asset_failed(&mut self, src: impl Into<String>) {
        self.asset_loaded(src, false);
    }

    pub fn camera(&self) -> &Camera {
        self.viewport.camera()
    }

    pub fn pan(&mut self, delta: Vec2, now: Instant) {
        self.viewport.pan(&self.session, delta, now);
    }

    pub fn zoom_at(&mut self, screen_point: Point, factor: f64, now: Instant) {
        self.viewport.zoom_at(&self.session, screen_point, factor, now);
    }

    pub fn set_view(&mut self, camera: Camera, now: Instant) {
        self.viewport.set_view(&self.session, camera, now);
    }

    /// Share the local cursor position (world coordinates). The position is
    /// kept locally even when it can't be sent.
    pub fn set_cursor(&mut self, cursor: Option<Point>) -> SyncResult<()> {
        let cursor = cursor.map(|p| CursorPosition { x: p.x, y: p.y });
        let changed = self.presence.set_local_cursor(cursor);
        if !self.joined {
            return Err(SyncError::NotConnected);
        }
        match changed {
            Some(state) => self.send_awareness(state),
            None => Ok(()),
        }
    }

    // --- Lifecycle ---

    /// Open the transport and start observing the document. The room is
    /// joined once the transport reports it is connected.
    pub fn connect(&mut self) -> SyncResult<()> {
        if self.doc.status() == ConnectionState::Connected {
            return Err(TransportError::AlreadyConnected.into());
        }
        self.transport.open(&self.config.server_url)?;
        for name in OBSERVED_MAPS {
            self.doc.observe(name);
        }
        self.doc.set_status(ConnectionState::Connecting);
        log::info!("connecting to {} (room {})", self.config.server_url, self.config.room);
        Ok(())
    }

    /// Tear the session down synchronously: scene events are dropped,
    /// observers released, the pending viewport broadcast cancelled, bridge
    /// state cleared and the transport closed. The document itself is kept,
    /// so a later [`connect`](Self::connect) reuses the same client id.
    pub fn disconnect(&mut self, scene: &mut dyn Scene) {
        scene.drain_events();
        self.viewport.cancel();
        self.session.reset();
        self.queue.clear();
        if self.joined {
            if let Err(e) = self.send(&ClientMessage::Leave) {
                log::debug!("leave not sent: {e}");
            }
        }
        self.joined = false;
        self.transport.close();
        self.presence.clear_remote();
        self.doc.disconnect();
        log::info!("left room {}", self.config.room);
    }

    /// Process everything that happened since the last call: local scene
    /// events, transport events, queued bridge events, the viewport debounce
    /// and outgoing CRDT updates.
    pub fn update(&mut self, scene: &mut dyn Scene, now: Instant) {
        self.pump_scene(scene, now);
        for event in self.transport.poll_events() {
            if let Err(e) = self.handle_transport_event(event) {
                log::warn!("room {}: {e}", self.config.room);
            }
        }
        self.dispatch(scene, now);
        self.tick(scene, now);
    }

    /// Forward local scene events to the shared document right away.
    pub fn pump_scene(&mut self, scene: &mut dyn Scene, now: Instant) {
        let events = scene.drain_events();
        if !self.joined {
            if !events.is_empty() {
                log::debug!("dropping {} scene events while not joined", events.len());
            }
            return;
        }
        self.queue.extend_scene(&events);
        self.dispatch(scene, now);
        self.flush_logged();
    }

    /// Publish a due viewport broadcast and flush outgoing updates.
    pub fn tick(&mut self, scene: &mut dyn Scene, now: Instant) {
        match self.viewport.publish_due(&mut self.doc, now) {
            Ok(true) => self.dispatch(scene, now),
            Ok(false) => {}
            Err(e) => log::warn!("viewport broadcast failed: {e}"),
        }
        self.flush_logged();
    }

    fn bridge(&mut self) -> Bridge<'_> {
        Bridge::new(
            &mut self.session,
            &mut self.doc,
            self.policy,
            self.presence.local_client_id(),
            self.assets.as_mut(),
        )
    }

    fn handle_transport_event(&mut self, event: TransportEvent) -> SyncResult<()> {
        match event {
            TransportEvent::Connected => {
                self.send(&ClientMessage::Join {
                    room: self.config.room.clone(),
                })?;
            }
            TransportEvent::Disconnected => {
                log::info!("room {}: connection lost", self.config.room);
                self.joined = false;
                self.session.initial_loaded = false;
                self.presence.clear_remote();
                self.queue.push(BridgeEvent::AwarenessChanged);
                self.doc.set_status(ConnectionState::Disconnected);
            }
            TransportEvent::Error { message } => {
                log::warn!("room {}: transport error: {message}", self.config.room);
                self.doc.set_status(ConnectionState::Error);
            }
            TransportEvent::JoinedRoom {
                room,
                peer_count,
                initial_sync,
            } => {
                log::info!("joined room {room} with {peer_count} peers");
                self.joined = true;
                self.doc.set_status(ConnectionState::Connected);

                let fresh_relay = initial_sync.is_none();
                if let Some(bytes) = initial_sync {
                    if let Err(e) = self.doc.import(&bytes, RELAY_ORIGIN) {
                        log::warn!("room {room}: initial state rejected: {e}");
                    }
                }

                let user = UserInfo {
                    name: self.config.user_name.clone(),
                    color: self.config.user_color.clone(),
                };
                let state = self.presence.publish_local(self.doc.client_id(), user);
                self.send_awareness(state)?;
                self.queue.push(BridgeEvent::AwarenessChanged);

                // A relay without history gets everything we have.
                if fresh_relay && self.doc.entry_count(OBJECTS_KEY) > 0 {
                    let snapshot = self.doc.snapshot()?;
                    self.send_sync(snapshot)?;
                }
            }
            TransportEvent::PeerJoined { peer_id } => {
                log::debug!("peer {peer_id} joined");
                let state = self.presence.local_state().clone();
                self.send_awareness(state)?;
            }
            TransportEvent::PeerLeft { peer_id, client_id } => {
                log::debug!("peer {peer_id} left");
                if self.presence.remove_connection(&peer_id, client_id) {
                    self.queue.push(BridgeEvent::AwarenessChanged);
                }
            }
            TransportEvent::SyncReceived {
                from,
                peer_id,
                data,
            } => {
                // Send our own pending ops first so they aren't mixed into the import.
                self.flush()?;
                log::debug!("sync from {from} ({} bytes)", data.len());
                self.doc.import(&data, peer_id)?;
            }
            TransportEvent::AwarenessReceived {
                from,
                peer_id,
                state,
            } => {
                if self.presence.apply_remote(&from, peer_id, state) {
                    self.queue.push(BridgeEvent::AwarenessChanged);
                }
            }
        }
        Ok(())
    }

    /// Drain the event queue, feeding document changes produced along the
    /// way back into it.
    fn dispatch(&mut self, scene: &mut dyn Scene, now: Instant) {
        self.queue.extend_changes(self.doc.take_changes());
        while let Some(event) = self.queue.pop() {
            self.handle_bridge_event(scene, event, now);
            self.queue.extend_changes(self.doc.take_changes());
        }
    }

    fn handle_bridge_event(&mut self, scene: &mut dyn Scene, event: BridgeEvent, now: Instant) {
        let result = match event {
            BridgeEvent::LocalObjectAdded(id) | BridgeEvent::LocalObjectModified(id) => {
                self.bridge().publish_local_change(scene, id).map(drop)
            }
            BridgeEvent::LocalObjectRemoved(id) => {
                self.bridge().publish_local_delete(scene, id).map(drop)
            }
            BridgeEvent::RemoteEntryChanged { key, kind, origin } => {
                self.bridge().on_remote_change(scene, &key, kind, origin);
                Ok(())
            }
            BridgeEvent::PermissionChanged { .. } => {
                self.on_permission_changed(scene);
                Ok(())
            }
            BridgeEvent::ViewportChanged { .. } => {
                self.viewport
                    .apply_remote(&mut self.doc, &mut self.session, now);
                Ok(())
            }
            BridgeEvent::AwarenessChanged => self.try_initial_load(scene),
            BridgeEvent::AssetLoaded { src, ok } => {
                self.bridge().asset_loaded(scene, &src, ok);
                Ok(())
            }
        };
        if let Err(e) = result {
            log::warn!("room {}: {e}", self.config.room);
        }
    }

    /// Run the initial-state pass once per join, as soon as the local client
    /// id is known.
    fn try_initial_load(&mut self, scene: &mut dyn Scene) -> SyncResult<()> {
        if self.session.initial_loaded || !self.joined {
            return Ok(());
        }
        if self.bridge().load_initial_state(scene).is_none() {
            return Ok(());
        }
        // The first presenter seeds the session permission.
        if self.policy.role == Role::Presenter
            && !self.doc.map(SESSION_KEY).contains(ALLOW_DRAW_KEY)
        {
            let allow = self.policy.allow_participant_draw;
            self.doc.map(SESSION_KEY).set(ALLOW_DRAW_KEY, allow)?;
        }
        Ok(())
    }

    /// Re-read the replicated draw permission and re-lock the whole scene.
    /// A missing or malformed value leaves the current permission in place.
    fn on_permission_changed(&mut self, scene: &mut dyn Scene) {
        let allow = match self.doc.map(SESSION_KEY).get(ALLOW_DRAW_KEY) {
            Some(LoroValue::Bool(allow)) => allow,
            other => {
                log::debug!("draw permission unreadable ({other:?}); keeping current");
                return;
            }
        };
        if allow == self.policy.allow_participant_draw {
            return;
        }
        self.policy.allow_participant_draw = allow;
        let relocked = self.bridge().reapply_permissions(scene);
        log::info!("participant draw {allow}: {relocked} objects re-locked");
        let draw_allowed = self.policy.draw_allowed();
        if let Some(callback) = self.on_draw_permission.as_mut() {
            callback(draw_allowed);
        }
    }

    // --- Outgoing ---

    fn send(&mut self, msg: &ClientMessage) -> SyncResult<()> {
        let json = serde_json::to_string(msg)?;
        self.transport.send(&json)?;
        Ok(())
    }

    fn send_awareness(&mut self, state: AwarenessState) -> SyncResult<()> {
        let peer_id = self.doc.client_id();
        self.send(&ClientMessage::Awareness { peer_id, state })
    }

    fn send_sync(&mut self, bytes: Vec<u8>) -> SyncResult<()> {
        let peer_id = self.doc.client_id();
        self.send(&ClientMessage::Sync {
            peer_id,
            data: encode_payload(&bytes),
        })
    }

    /// Send local ops not yet exported.
    fn flush(&mut self) -> SyncResult<()> {
        if !self.joined {
            return Ok(());
        }
        if let Some(bytes) = self.doc.export_pending()? {
            self.send_sync(bytes)?;
        }
        Ok(())
    }

    fn flush_logged(&mut self) {
        if let Err(e) = self.flush() {
            log::warn!("room {}: flush failed: {e}", self.config.room);
        }
    }
}
