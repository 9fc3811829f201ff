//! One-way mirroring of the presenter's view to participants.

use kurbo::{Point, Vec2};

use crate::bridge::SyncSession;
use crate::camera::Camera;
use crate::crdt::codec::decode_transform;
use crate::crdt::{SharedDocument, TRANSFORM_KEY, VIEWPORT_KEY};
use crate::debounce::{Debounce, Duration, Instant};
use crate::error::SyncResult;
use crate::permission::Role;

/// Owns the local camera. Presenters broadcast it (debounced), participants
/// follow the replicated transform and never write it.
pub struct ViewportMirror {
    role: Role,
    camera: Camera,
    debounce: Debounce<[f64; 6]>,
}

impl ViewportMirror {
    pub fn new(role: Role, delay: Duration) -> Self {
        Self {
            role,
            camera: Camera::new(),
            debounce: Debounce::new(delay),
        }
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    /// Pan gesture from the host.
    pub fn pan(&mut self, session: &SyncSession, delta: Vec2, now: Instant) {
        self.camera.pan(delta);
        self.view_changed(session, now);
    }

    /// Zoom gesture from the host.
    pub fn zoom_at(&mut self, session: &SyncSession, screen_point: Point, factor: f64, now: Instant) {
        self.camera.zoom_at(screen_point, factor);
        self.view_changed(session, now);
    }

    /// Replace the whole view (e.g. "reset view").
    pub fn set_view(&mut self, session: &SyncSession, camera: Camera, now: Instant) {
        self.camera = camera;
        self.view_changed(session, now);
    }

    fn view_changed(&mut self, session: &SyncSession, now: Instant) {
        if self.role == Role::Presenter && !session.applying_viewport {
            self.debounce.schedule(self.camera.to_coeffs(), now);
        }
    }

    pub fn is_pending(&self) -> bool {
        self.debounce.is_pending()
    }

    /// Write the debounced transform once its quiet period has passed.
    /// Returns whether anything was written.
    pub fn publish_due(&mut self, doc: &mut SharedDocument, now: Instant) -> SyncResult<bool> {
        if self.role != Role::Presenter {
            return Ok(false);
        }
        let Some(coeffs) = self.debounce.poll(now) else {
            return Ok(false);
        };
        log::debug!("broadcasting viewport {coeffs:?}");
        doc.map(VIEWPORT_KEY).set_numbers(TRANSFORM_KEY, &coeffs)?;
        Ok(true)
    }

    /// Follow the replicated transform. Only participants follow.
    pub fn apply_remote(
        &mut self,
        doc: &mut SharedDocument,
        session: &mut SyncSession,
        now: Instant,
    ) -> bool {
        if self.role == Role::Presenter {
            return false;
        }
        let Some(coeffs) = doc
            .map(VIEWPORT_KEY)
            .get(TRANSFORM_KEY)
            .as_ref()
            .and_then(decode_transform)
        else {
            return false;
        };

        session.applying_viewport = true;
        let applied = self.camera.set_from_coeffs(coeffs);
        if applied {
            // The host's view-change hook fires for self-applied updates too.
            self.view_changed(session, now);
        } else {
            log::warn!("ignoring invalid viewport transform {coeffs:?}");
        }
        session.applying_viewport = false;
        applied
    }

    /// Drop any pending broadcast.
    pub fn cancel(&mut self) {
        self.debounce.cancel();
    }
}
