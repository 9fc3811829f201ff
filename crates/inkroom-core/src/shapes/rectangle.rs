//! Rectangles.

use super::{ShapeStyle, ShapeTrait};
use kurbo::{Affine, Point, Rect, Shape as _, Vec2};
use serde::{Deserialize, Serialize};

/// An axis-aligned box, optionally rounded and rotated about its center.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rectangle {
    /// Top-left corner before rotation.
    pub position: Point,
    pub width: f64,
    pub height: f64,
    #[serde(default)]
    pub corner_radius: f64,
    /// Radians, clockwise about the center.
    #[serde(default)]
    pub rotation: f64,
    pub style: ShapeStyle,
}

impl Rectangle {
    pub fn new(position: Point, width: f64, height: f64) -> Self {
        Self {
            position,
            width,
            height,
            corner_radius: 0.0,
            rotation: 0.0,
            style: ShapeStyle::default(),
        }
    }

    /// Box spanned by a drag from `start` to `end`, in any direction.
    pub fn from_corners(start: Point, end: Point) -> Self {
        let rect = Rect::from_points(start, end);
        Self::new(rect.origin(), rect.width(), rect.height())
    }

    pub fn with_corner_radius(mut self, radius: f64) -> Self {
        self.corner_radius = radius.max(0.0);
        self
    }

    /// Unrotated box.
    pub fn as_rect(&self) -> Rect {
        Rect::from_origin_size(self.position, (self.width, self.height))
    }

    pub fn center(&self) -> Point {
        self.position + Vec2::new(self.width / 2.0, self.height / 2.0)
    }
}

impl ShapeTrait for Rectangle {
    fn bounds(&self) -> Rect {
        if self.rotation == 0.0 {
            return self.as_rect();
        }
        let spin = Affine::rotate_about(self.rotation, self.center());
        (spin * self.as_rect().to_path(0.1)).bounding_box()
    }

    fn style(&self) -> &ShapeStyle {
        &self.style
    }

    fn style_mut(&mut self) -> &mut ShapeStyle {
        &mut self.style
    }

    fn transform(&mut self, affine: Affine) {
        // Rotation stays in `rotation`; only translation and scale apply here.
        let [sx, _, _, sy, _, _] = affine.as_coeffs();
        self.position = affine * self.position;
        self.width *= sx.abs();
        self.height *= sy.abs();
        self.corner_radius *= sx.abs().min(sy.abs());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_drag_up_and_left() {
        let rect = Rectangle::from_corners(Point::new(80.0, 60.0), Point::new(20.0, 10.0));
        assert_eq!(rect.position, Point::new(20.0, 10.0));
        assert!(close(rect.width, 60.0));
        assert!(close(rect.height, 50.0));
    }

    #[test]
    fn test_rotated_bounds_grow() {
        let mut rect = Rectangle::new(Point::ZERO, 20.0, 10.0);
        assert_eq!(rect.bounds(), Rect::new(0.0, 0.0, 20.0, 10.0));

        rect.rotation = std::f64::consts::FRAC_PI_2;
        let bounds = rect.bounds();
        assert!(close(bounds.width(), 10.0));
        assert!(close(bounds.height(), 20.0));
        assert!(close(bounds.center().x, 10.0));
    }

    #[test]
    fn test_move_and_scale() {
        let mut rect = Rectangle::new(Point::new(5.0, 5.0), 10.0, 4.0).with_corner_radius(2.0);
        rect.transform(Affine::translate((10.0, 0.0)) * Affine::scale(3.0));
        assert_eq!(rect.position, Point::new(25.0, 15.0));
        assert!(close(rect.width, 30.0));
        assert!(close(rect.height, 12.0));
        assert!(close(rect.corner_radius, 6.0));
    }
}
