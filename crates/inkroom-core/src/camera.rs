//! View transform for pan/zoom.

use kurbo::{Affine, Point, Vec2};
use serde::{Deserialize, Serialize};

/// Camera manages the view transform for the canvas.
///
/// The transform is always a uniform scale followed by a translation, so it
/// maps onto the 6-coefficient affine form `[zoom, 0, 0, zoom, x, y]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    /// Current translation offset (pan)
    pub offset: Vec2,
    /// Current zoom level (1.0 = 100%)
    pub zoom: f64,
    /// Minimum allowed zoom level
    pub min_zoom: f64,
    /// Maximum allowed zoom level
    pub max_zoom: f64,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            offset: Vec2::ZERO,
            zoom: 1.0,
            min_zoom: 0.1,
            max_zoom: 10.0,
        }
    }
}

impl Camera {
    pub fn new() -> Self {
        Self::default()
    }

    /// World to screen transform.
    pub fn transform(&self) -> Affine {
        Affine::translate(self.offset) * Affine::scale(self.zoom)
    }

    /// Screen to world transform.
    pub fn inverse_transform(&self) -> Affine {
        Affine::scale(1.0 / self.zoom) * Affine::translate(-self.offset)
    }

    pub fn screen_to_world(&self, screen_point: Point) -> Point {
        self.inverse_transform() * screen_point
    }

    pub fn world_to_screen(&self, world_point: Point) -> Point {
        self.transform() * world_point
    }

    /// Pan the camera by a delta in screen coordinates.
    pub fn pan(&mut self, delta: Vec2) {
        self.offset += delta;
    }

    /// Zoom the camera, keeping the given screen point fixed.
    pub fn zoom_at(&mut self, screen_point: Point, factor: f64) {
        let new_zoom = (self.zoom * factor).clamp(self.min_zoom, self.max_zoom);
        if (new_zoom - self.zoom).abs() < f64::EPSILON {
            return;
        }

        let world_point = self.screen_to_world(screen_point);
        self.zoom = new_zoom;

        // Adjust offset so world_point stays at screen_point
        let new_screen = self.world_to_screen(world_point);
        self.offset += screen_point - new_screen;
    }

    pub fn reset(&mut self) {
        self.offset = Vec2::ZERO;
        self.zoom = 1.0;
    }

    /// The transform as `[a, b, c, d, e, f]` affine coefficients.
    pub fn to_coeffs(&self) -> [f64; 6] {
        self.transform().as_coeffs()
    }

    /// Adopt a transform received from another client.
    ///
    /// Returns false (and leaves the camera unchanged) for transforms that
    /// aren't a finite, positive, uniform scale plus translation. The zoom
    /// limits are not applied: a mirrored view must match its source exactly.
    pub fn set_from_coeffs(&mut self, coeffs: [f64; 6]) -> bool {
        let [a, b, c, d, e, f] = coeffs;
        let valid = coeffs.iter().all(|v| v.is_finite())
            && a > 0.0
            && b == 0.0
            && c == 0.0
            && (a - d).abs() <= f64::EPSILON * a.max(1.0);
        if !valid {
            return false;
        }
        self.zoom = a;
        self.offset = Vec2::new(e, f);
        true
    }
}
