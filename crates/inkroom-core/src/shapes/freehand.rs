//! Freehand stroke (path) shape.

use super::{ShapeStyle, ShapeTrait};
use kurbo::{Affine, Point, Rect};
use serde::{Deserialize, Serialize};

/// A freehand drawing (series of points).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Freehand {
    /// Points in the freehand path.
    pub points: Vec<Point>,
    /// Style properties.
    pub style: ShapeStyle,
}

impl Freehand {
    /// Create from existing points.
    pub fn from_points(points: Vec<Point>) -> Self {
        Self {
            points,
            style: ShapeStyle::default(),
        }
    }

    /// Add a point to the path.
    pub fn add_point(&mut self, point: Point) {
        self.points.push(point);
    }

    /// Check if the path is empty.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

impl ShapeTrait for Freehand {
    fn bounds(&self) -> Rect {
        let mut iter = self.points.iter();
        let Some(first) = iter.next() else {
            return Rect::ZERO;
        };
        iter.fold(Rect::from_points(*first, *first), |acc, p| acc.union_pt(*p))
    }

    fn style(&self) -> &ShapeStyle {
        &self.style
    }

    fn style_mut(&mut self) -> &mut ShapeStyle {
        &mut self.style
    }

    fn transform(&mut self, affine: Affine) {
        for point in &mut self.points {
            *point = affine * *point;
        }
    }
}
