//! Image shape referencing an external or inline raster source.

use super::{ShapeStyle, ShapeTrait};
use kurbo::{Affine, Point, Rect};
use serde::{Deserialize, Serialize};

/// An image placed on the board.
///
/// `src` is either a URL or a `data:` URI. Remote peers must load it before the
/// image can be materialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    /// Top-left corner position.
    pub position: Point,
    /// Display width.
    pub width: f64,
    /// Display height.
    pub height: f64,
    /// Image source (URL or data URI).
    pub src: String,
    /// Original image width in pixels.
    pub source_width: u32,
    /// Original image height in pixels.
    pub source_height: u32,
    /// Style properties.
    pub style: ShapeStyle,
}

impl Image {
    /// Create an image displayed at its natural size.
    pub fn new(position: Point, src: impl Into<String>, source_width: u32, source_height: u32) -> Self {
        Self {
            position,
            width: source_width as f64,
            height: source_height as f64,
            src: src.into(),
            source_width,
            source_height,
            style: ShapeStyle::default(),
        }
    }

    /// Whether the source is embedded in the record.
    pub fn is_inline(&self) -> bool {
        self.src.starts_with("data:")
    }
}

impl ShapeTrait for Image {
    fn bounds(&self) -> Rect {
        Rect::new(
            self.position.x,
            self.position.y,
            self.position.x + self.width,
            self.position.y + self.height,
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
        let scale = affine.as_coeffs();
        self.width *= scale[0].abs();
        self.height *= scale[3].abs();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_natural_size() {
        let img = Image::new(Point::new(1.0, 2.0), "https://cdn.example/a.png", 640, 480);
        assert!((img.width - 640.0).abs() < f64::EPSILON);
        assert!(!img.is_inline());
        assert!(Image::new(Point::ZERO, "data:image/png;base64,AAAA", 1, 1).is_inline());
    }
}
