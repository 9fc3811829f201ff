//! Straight line shape.

use super::{ShapeStyle, ShapeTrait};
use kurbo::{Affine, Point, Rect};
use serde::{Deserialize, Serialize};

/// A straight line segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Line {
    /// Start point.
    pub start: Point,
    /// End point.
    pub end: Point,
    /// Style properties.
    pub style: ShapeStyle,
}

impl Line {
    /// Create a new line.
    pub fn new(start: Point, end: Point) -> Self {
        Self {
            start,
            end,
            style: ShapeStyle::default(),
        }
    }

    /// Length of the segment.
    pub fn length(&self) -> f64 {
        (self.end - self.start).hypot()
    }
}

impl ShapeTrait for Line {
    fn bounds(&self) -> Rect {
        Rect::from_points(self.start, self.end)
    }

    fn style(&self) -> &ShapeStyle {
        &self.style
    }

    fn style_mut(&mut self) -> &mut ShapeStyle {
        &mut self.style
    }

    fn transform(&mut self, affine: Affine) {
        self.start = affine * self.start;
        self.end = affine * self.end;
    }
}
