//! Text shape.

use super::{ShapeStyle, ShapeTrait};
use kurbo::{Affine, Point, Rect};
use serde::{Deserialize, Serialize};

/// Average glyph advance relative to the font size, used for layout-free bounds.
const APPROX_CHAR_WIDTH: f64 = 0.6;
/// Line height relative to the font size.
const LINE_HEIGHT: f64 = 1.2;

/// A text label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Text {
    /// Position (top-left corner of text bounding box).
    pub position: Point,
    /// The text content.
    pub content: String,
    /// Font size in pixels.
    pub font_size: f64,
    /// Font family name.
    pub font_family: String,
    /// Style properties.
    pub style: ShapeStyle,
}

impl Text {
    /// Default font size in pixels.
    pub const DEFAULT_FONT_SIZE: f64 = 20.0;

    /// Create a new text label.
    pub fn new(position: Point, content: impl Into<String>) -> Self {
        Self {
            position,
            content: content.into(),
            font_size: Self::DEFAULT_FONT_SIZE,
            font_family: "sans-serif".to_string(),
            style: ShapeStyle::default(),
        }
    }
}

impl ShapeTrait for Text {
    fn bounds(&self) -> Rect {
        let lines = self.content.lines().count().max(1);
        let widest = self
            .content
            .lines()
            .map(|l| l.chars().count())
            .max()
            .unwrap_or(0);
        Rect::new(
            self.position.x,
            self.position.y,
            self.position.x + widest as f64 * self.font_size * APPROX_CHAR_WIDTH,
            self.position.y + lines as f64 * self.font_size * LINE_HEIGHT,
        )
    }

    fn style(&self) -> &ShapeStyle {
        &self.style
    }

    fn style_mut(&mut self) -> &mut ShapeStyle {
        &mut self.style
    }

    fn transform(&mut self, affine: Affine) {
        self.position = affine * self.position;
        self.font_size *= affine.as_coeffs()[3].abs();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multiline_bounds() {
        let text = Text::new(Point::ZERO, "ab\nabcd");
        let bounds = text.bounds();
        assert!((bounds.width() - 4.0 * 20.0 * APPROX_CHAR_WIDTH).abs() < 1e-9);
        assert!((bounds.height() - 2.0 * 20.0 * LINE_HEIGHT).abs() < 1e-9);
    }
}
