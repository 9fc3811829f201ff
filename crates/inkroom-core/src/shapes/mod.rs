//! Shape geometry and style for scene objects.

mod circle;
mod freehand;
mod image;
mod line;
mod rectangle;
mod text;

pub use circle::Circle;
pub use freehand::Freehand;
pub use image::Image;
pub use line::Line;
pub use rectangle::Rectangle;
pub use text::Text;

use kurbo::{Affine, Rect};
use serde::{Deserialize, Serialize};

use crate::scene::ObjectKind;

/// Serializable color representation (RGBA8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializableColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl SerializableColor {
    pub fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub fn black() -> Self {
        Self::new(0, 0, 0, 255)
    }
}

/// Style properties shared by every shape kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapeStyle {
    /// Stroke color.
    pub stroke_color: SerializableColor,
    /// Stroke width.
    pub stroke_width: f64,
    /// Fill color (None = no fill).
    pub fill_color: Option<SerializableColor>,
    /// Overall opacity (0.0 = fully transparent, 1.0 = fully opaque).
    #[serde(default = "default_opacity")]
    pub opacity: f64,
}

fn default_opacity() -> f64 {
    1.0
}

impl Default for ShapeStyle {
    fn default() -> Self {
        Self {
            stroke_color: SerializableColor::black(),
            stroke_width: 2.0,
            fill_color: None,
            opacity: 1.0,
        }
    }
}

/// Common behaviour of every shape kind.
pub trait ShapeTrait {
    /// Get the bounding box in world coordinates.
    fn bounds(&self) -> Rect;

    /// Get the style.
    fn style(&self) -> &ShapeStyle;

    /// Get mutable style.
    fn style_mut(&mut self) -> &mut ShapeStyle;

    /// Apply a transform to this shape.
    fn transform(&mut self, affine: Affine);
}

/// Geometry and style of a scene object, one variant per object kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Shape {
    Path(Freehand),
    Rect(Rectangle),
    Circle(Circle),
    Line(Line),
    Text(Text),
    Image(Image),
}

impl Shape {
    /// The kind tag used on the wire.
    pub fn kind(&self) -> ObjectKind {
        match self {
            Shape::Path(_) => ObjectKind::Path,
            Shape::Rect(_) => ObjectKind::Rect,
            Shape::Circle(_) => ObjectKind::Circle,
            Shape::Line(_) => ObjectKind::Line,
            Shape::Text(_) => ObjectKind::Text,
            Shape::Image(_) => ObjectKind::Image,
        }
    }

    fn as_trait(&self) -> &dyn ShapeTrait {
        match self {
            Shape::Path(s) => s,
            Shape::Rect(s) => s,
            Shape::Circle(s) => s,
            Shape::Line(s) => s,
            Shape::Text(s) => s,
            Shape::Image(s) => s,
        }
    }

    fn as_trait_mut(&mut self) -> &mut dyn ShapeTrait {
        match self {
            Shape::Path(s) => s,
            Shape::Rect(s) => s,
            Shape::Circle(s) => s,
            Shape::Line(s) => s,
            Shape::Text(s) => s,
            Shape::Image(s) => s,
        }
    }

    pub fn bounds(&self) -> Rect {
        self.as_trait().bounds()
    }

    pub fn style(&self) -> &ShapeStyle {
        self.as_trait().style()
    }

    pub fn style_mut(&mut self) -> &mut ShapeStyle {
        self.as_trait_mut().style_mut()
    }

    pub fn transform(&mut self, affine: Affine) {
        self.as_trait_mut().transform(affine);
    }

    /// Image source that must be loaded before the shape can be drawn.
    pub fn asset_source(&self) -> Option<&str> {
        match self {
            Shape::Image(img) if !img.is_inline() => Some(img.src.as_str()),
            _ => None,
        }
    }
}
