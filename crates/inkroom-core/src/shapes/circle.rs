//! Circle shape.

use super::{ShapeStyle, ShapeTrait};
use kurbo::{Affine, Point, Rect};
use serde::{Deserialize, Serialize};

/// A circle defined by its center and radius.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Circle {
    /// Center point.
    pub center: Point,
    /// Radius.
    pub radius: f64,
    /// Style properties.
    pub style: ShapeStyle,
}

impl Circle {
    /// Create a new circle.
    pub fn new(center: Point, radius: f64) -> Self {
        Self {
            center,
            radius,
            style: ShapeStyle::default(),
        }
    }
}

impl ShapeTrait for Circle {
    fn bounds(&self) -> Rect {
        Rect::new(
            self.center.x - self.radius,
            self.center.y - self.radius,
            self.center.x + self.radius,
            self.center.y + self.radius,
        )
    }

    fn style(&self) -> &ShapeStyle {
        &self.style
    }

    fn style_mut(&mut self) -> &mut ShapeStyle {
        &mut self.style
    }

    fn transform(&mut self, affine: Affine) {
        self.center = affine * self.center;
        let coeffs = affine.as_coeffs();
        // A circle stays a circle: use the mean of both axis scales.
        self.radius *= (coeffs[0].abs() + coeffs[3].abs()) / 2.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circle_bounds() {
        let circle = Circle::new(Point::new(50.0, 50.0), 10.0);
        let bounds = circle.bounds();
        assert!((bounds.x0 - 40.0).abs() < f64::EPSILON);
        assert!((bounds.y1 - 60.0).abs() < f64::EPSILON);
    }
}
