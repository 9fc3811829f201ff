//! Conversion between scene objects and Loro values.

use kurbo::Point;
use loro::{LoroList, LoroMap, LoroMapValue, LoroValue};
use uuid::Uuid;

use crate::error::{DecodeError, SyncError, SyncResult};
use crate::scene::{ClientId, ObjectKind, SceneObject};
use crate::shapes::{
    Circle, Freehand, Image, Line, Rectangle, SerializableColor, Shape, ShapeStyle, Text,
};

// Common keys
const KEY_TYPE: &str = "type";
const KEY_ID: &str = "id";
const KEY_CREATED_BY: &str = "createdBy";

// Style keys
const KEY_STROKE_R: &str = "stroke_r";
const KEY_STROKE_G: &str = "stroke_g";
const KEY_STROKE_B: &str = "stroke_b";
const KEY_STROKE_A: &str = "stroke_a";
const KEY_STROKE_WIDTH: &str = "stroke_width";
const KEY_HAS_FILL: &str = "has_fill";
const KEY_FILL_R: &str = "fill_r";
const KEY_FILL_G: &str = "fill_g";
const KEY_FILL_B: &str = "fill_b";
const KEY_FILL_A: &str = "fill_a";
const KEY_OPACITY: &str = "opacity";

// Box keys
const KEY_X: &str = "x";
const KEY_Y: &str = "y";
const KEY_WIDTH: &str = "width";
const KEY_HEIGHT: &str = "height";
const KEY_CORNER_RADIUS: &str = "corner_radius";
const KEY_ROTATION: &str = "rotation";
const KEY_RADIUS: &str = "radius";

// Line keys
const KEY_START_X: &str = "start_x";
const KEY_START_Y: &str = "start_y";
const KEY_END_X: &str = "end_x";
const KEY_END_Y: &str = "end_y";

// Path keys
const KEY_POINTS: &str = "points";

// Text keys
const KEY_CONTENT: &str = "content";
const KEY_FONT_SIZE: &str = "font_size";
const KEY_FONT_FAMILY: &str = "font_family";

// Image keys
const KEY_SRC: &str = "src";
const KEY_SOURCE_WIDTH: &str = "source_width";
const KEY_SOURCE_HEIGHT: &str = "source_height";

/// Keys that mark a record the scene can't draw (render-side objects that
/// were serialized by mistake).
const NON_MATERIALIZABLE_KEYS: [&str; 3] = ["gradient", "filters", "pattern"];

fn get_double(map: &LoroMapValue, key: &'static str) -> Result<f64, DecodeError> {
    match map.get(key) {
        Some(LoroValue::Double(d)) if d.is_finite() => Ok(*d),
        Some(LoroValue::I64(i)) => Ok(*i as f64),
        Some(_) => Err(DecodeError::InvalidField(key)),
        None => Err(DecodeError::MissingField(key)),
    }
}

fn get_double_or(map: &LoroMapValue, key: &'static str, default: f64) -> Result<f64, DecodeError> {
    match get_double(map, key) {
        Err(DecodeError::MissingField(_)) => Ok(default),
        other => other,
    }
}

fn get_i64(map: &LoroMapValue, key: &'static str) -> Result<i64, DecodeError> {
    match map.get(key) {
        Some(LoroValue::I64(i)) => Ok(*i),
        Some(LoroValue::Double(d)) if d.fract() == 0.0 => Ok(*d as i64),
        Some(_) => Err(DecodeError::InvalidField(key)),
        None => Err(DecodeError::MissingField(key)),
    }
}

fn get_string(map: &LoroMapValue, key: &'static str) -> Result<String, DecodeError> {
    match map.get(key) {
        Some(LoroValue::String(s)) => Ok(s.to_string()),
        Some(_) => Err(DecodeError::InvalidField(key)),
        None => Err(DecodeError::MissingField(key)),
    }
}

fn get_u8(map: &LoroMapValue, key: &'static str) -> Result<u8, DecodeError> {
    u8::try_from(get_i64(map, key)?).map_err(|_| DecodeError::InvalidField(key))
}

fn get_u32(map: &LoroMapValue, key: &'static str) -> Result<u32, DecodeError> {
    u32::try_from(get_i64(map, key)?).map_err(|_| DecodeError::InvalidField(key))
}

fn as_map(entry: &LoroValue) -> Result<&LoroMapValue, DecodeError> {
    match entry {
        LoroValue::Map(map) => Ok(map),
        _ => Err(DecodeError::NotAMap),
    }
}

/// Write `object` into an empty entry map.
///
/// The object must already carry an owner; lock attributes and the local
/// version counter are never written.
pub fn encode(object: &SceneObject, map: &LoroMap) -> SyncResult<()> {
    let created_by = object.created_by.ok_or(SyncError::Unowned(object.id))?;
    map.insert(KEY_TYPE, object.kind().as_str())?;
    map.insert(KEY_ID, object.id.to_string())?;
    // Peer ids use the full u64 range; stored bit-for-bit.
    map.insert(KEY_CREATED_BY, created_by as i64)?;
    shape_to_loro(&object.shape, map)?;
    Ok(())
}

fn shape_to_loro(shape: &Shape, map: &LoroMap) -> SyncResult<()> {
    match shape {
        Shape::Rect(rect) => {
            map.insert(KEY_X, rect.position.x)?;
            map.insert(KEY_Y, rect.position.y)?;
            map.insert(KEY_WIDTH, rect.width)?;
            map.insert(KEY_HEIGHT, rect.height)?;
            map.insert(KEY_CORNER_RADIUS, rect.corner_radius)?;
            map.insert(KEY_ROTATION, rect.rotation)?;
        }
        Shape::Circle(circle) => {
            map.insert(KEY_X, circle.center.x)?;
            map.insert(KEY_Y, circle.center.y)?;
            map.insert(KEY_RADIUS, circle.radius)?;
        }
        Shape::Line(line) => {
            map.insert(KEY_START_X, line.start.x)?;
            map.insert(KEY_START_Y, line.start.y)?;
            map.insert(KEY_END_X, line.end.x)?;
            map.insert(KEY_END_Y, line.end.y)?;
        }
        Shape::Path(path) => {
            // Points as a list of [x, y] pairs
            let points = map.insert_container(KEY_POINTS, LoroList::new())?;
            for point in &path.points {
                let pair = points.insert_container(points.len(), LoroList::new())?;
                pair.push(point.x)?;
                pair.push(point.y)?;
            }
        }
        Shape::Text(text) => {
            map.insert(KEY_X, text.position.x)?;
            map.insert(KEY_Y, text.position.y)?;
            map.insert(KEY_CONTENT, text.content.clone())?;
            map.insert(KEY_FONT_SIZE, text.font_size)?;
            map.insert(KEY_FONT_FAMILY, text.font_family.clone())?;
        }
        Shape::Image(image) => {
            map.insert(KEY_X, image.position.x)?;
            map.insert(KEY_Y, image.position.y)?;
            map.insert(KEY_WIDTH, image.width)?;
            map.insert(KEY_HEIGHT, image.height)?;
            map.insert(KEY_SRC, image.src.clone())?;
            map.insert(KEY_SOURCE_WIDTH, image.source_width as i64)?;
            map.insert(KEY_SOURCE_HEIGHT, image.source_height as i64)?;
        }
    }
    style_to_loro(shape.style(), map)
}

fn style_to_loro(style: &ShapeStyle, map: &LoroMap) -> SyncResult<()> {
    map.insert(KEY_STROKE_R, style.stroke_color.r as i64)?;
    map.insert(KEY_STROKE_G, style.stroke_color.g as i64)?;
    map.insert(KEY_STROKE_B, style.stroke_color.b as i64)?;
    map.insert(KEY_STROKE_A, style.stroke_color.a as i64)?;
    map.insert(KEY_STROKE_WIDTH, style.stroke_width)?;
    map.insert(KEY_OPACITY, style.opacity)?;

    if let Some(fill) = style.fill_color {
        map.insert(KEY_HAS_FILL, true)?;
        map.insert(KEY_FILL_R, fill.r as i64)?;
        map.insert(KEY_FILL_G, fill.g as i64)?;
        map.insert(KEY_FILL_B, fill.b as i64)?;
        map.insert(KEY_FILL_A, fill.a as i64)?;
    } else {
        map.insert(KEY_HAS_FILL, false)?;
    }
    Ok(())
}

/// Reconstruct a scene object from a shared entry.
///
/// The result is unlocked and has version 0; callers apply the permission
/// policy before inserting it.
pub fn decode(entry: &LoroValue) -> Result<SceneObject, DecodeError> {
    let map = as_map(entry)?;
    if let Some(key) = NON_MATERIALIZABLE_KEYS.iter().find(|k| map.contains_key(**k)) {
        return Err(DecodeError::NonMaterializable(*key));
    }

    let id_str = get_string(map, KEY_ID)?;
    let id = Uuid::parse_str(&id_str).map_err(|_| DecodeError::InvalidId(id_str))?;
    let created_by = get_i64(map, KEY_CREATED_BY)? as ClientId;
    let shape = shape_from_loro(map)?;

    let mut object = SceneObject::with_id(id, shape);
    object.created_by = Some(created_by);
    Ok(object)
}

fn kind_of(map: &LoroMapValue) -> Result<ObjectKind, DecodeError> {
    let tag = get_string(map, KEY_TYPE)?;
    ObjectKind::parse(&tag).ok_or(DecodeError::UnknownKind(tag))
}

fn shape_from_loro(map: &LoroMapValue) -> Result<Shape, DecodeError> {
    let style = style_from_loro(map)?;
    let mut shape = match kind_of(map)? {
        ObjectKind::Rect => {
            let mut rect = Rectangle::new(
                Point::new(get_double(map, KEY_X)?, get_double(map, KEY_Y)?),
                get_double(map, KEY_WIDTH)?,
                get_double(map, KEY_HEIGHT)?,
            );
            rect.corner_radius = get_double_or(map, KEY_CORNER_RADIUS, 0.0)?;
            rect.rotation = get_double_or(map, KEY_ROTATION, 0.0)?;
            Shape::Rect(rect)
        }
        ObjectKind::Circle => Shape::Circle(Circle::new(
            Point::new(get_double(map, KEY_X)?, get_double(map, KEY_Y)?),
            get_double(map, KEY_RADIUS)?,
        )),
        ObjectKind::Line => Shape::Line(Line::new(
            Point::new(get_double(map, KEY_START_X)?, get_double(map, KEY_START_Y)?),
            Point::new(get_double(map, KEY_END_X)?, get_double(map, KEY_END_Y)?),
        )),
        ObjectKind::Path => Shape::Path(Freehand::from_points(points_from_loro(map)?)),
        ObjectKind::Text => {
            let mut text = Text::new(
                Point::new(get_double(map, KEY_X)?, get_double(map, KEY_Y)?),
                get_string(map, KEY_CONTENT)?,
            );
            text.font_size = get_double_or(map, KEY_FONT_SIZE, Text::DEFAULT_FONT_SIZE)?;
            if let Ok(family) = get_string(map, KEY_FONT_FAMILY) {
                text.font_family = family;
            }
            Shape::Text(text)
        }
        ObjectKind::Image => {
            let mut image = Image::new(
                Point::new(get_double(map, KEY_X)?, get_double(map, KEY_Y)?),
                get_string(map, KEY_SRC)?,
                get_u32(map, KEY_SOURCE_WIDTH)?,
                get_u32(map, KEY_SOURCE_HEIGHT)?,
            );
            image.width = get_double(map, KEY_WIDTH)?;
            image.height = get_double(map, KEY_HEIGHT)?;
            Shape::Image(image)
        }
    };
    *shape.style_mut() = style;
    Ok(shape)
}

fn points_from_loro(map: &LoroMapValue) -> Result<Vec<Point>, DecodeError> {
    let Some(LoroValue::List(list)) = map.get(KEY_POINTS) else {
        return Err(DecodeError::MissingField(KEY_POINTS));
    };
    list.iter()
        .map(|pair| {
            let LoroValue::List(coords) = pair else {
                return Err(DecodeError::InvalidField(KEY_POINTS));
            };
            let coord = |i: usize| match coords.get(i) {
                Some(LoroValue::Double(d)) if d.is_finite() => Ok(*d),
                Some(LoroValue::I64(v)) => Ok(*v as f64),
                _ => Err(DecodeError::InvalidField(KEY_POINTS)),
            };
            Ok(Point::new(coord(0)?, coord(1)?))
        })
        .collect()
}

fn style_from_loro(map: &LoroMapValue) -> Result<ShapeStyle, DecodeError> {
    let stroke_color = SerializableColor::new(
        get_u8(map, KEY_STROKE_R)?,
        get_u8(map, KEY_STROKE_G)?,
        get_u8(map, KEY_STROKE_B)?,
        get_u8(map, KEY_STROKE_A)?,
    );
    let has_fill = matches!(map.get(KEY_HAS_FILL), Some(LoroValue::Bool(true)));
    let fill_color = if has_fill {
        Some(SerializableColor::new(
            get_u8(map, KEY_FILL_R)?,
            get_u8(map, KEY_FILL_G)?,
            get_u8(map, KEY_FILL_B)?,
            get_u8(map, KEY_FILL_A)?,
        ))
    } else {
        None
    };

    Ok(ShapeStyle {
        stroke_color,
        stroke_width: get_double(map, KEY_STROKE_WIDTH)?,
        fill_color,
        opacity: get_double_or(map, KEY_OPACITY, 1.0)?,
    })
}

/// Copy the mutable geometry and style of `entry` onto `existing`.
///
/// `id`, `created_by`, the kind tag, lock state and the version counter are
/// never taken from the entry. Returns whether anything changed; the version
/// is bumped only then.
pub fn apply_patch(existing: &mut SceneObject, entry: &LoroValue) -> Result<bool, DecodeError> {
    let map = as_map(entry)?;
    let found = kind_of(map)?;
    if found != existing.kind() {
        return Err(DecodeError::KindMismatch {
            expected: existing.kind(),
            found,
        });
    }
    let shape = shape_from_loro(map)?;
    if existing.created_by.is_none() {
        existing.created_by = entry_owner(entry);
    }
    if shape == existing.shape {
        return Ok(false);
    }
    existing.shape = shape;
    existing.version = existing.version.wrapping_add(1);
    Ok(true)
}

/// Owner recorded in an entry, if readable.
pub fn entry_owner(entry: &LoroValue) -> Option<ClientId> {
    let map = as_map(entry).ok()?;
    get_i64(map, KEY_CREATED_BY).ok().map(|v| v as ClientId)
}

/// Whether `entry` already holds exactly what [`encode`] would write for `object`.
pub fn matches(object: &SceneObject, entry: &LoroValue) -> bool {
    decode(entry).is_ok_and(|stored| {
        stored.id == object.id
            && stored.created_by == object.created_by
            && stored.shape == object.shape
    })
}

/// Read a 6-element affine transform stored as a list of numbers.
pub fn decode_transform(value: &LoroValue) -> Option<[f64; 6]> {
    let LoroValue::List(list) = value else {
        return None;
    };
    if list.len() != 6 {
        return None;
    }
    let mut coeffs = [0.0; 6];
    for (slot, item) in coeffs.iter_mut().zip(list.iter()) {
        *slot = match item {
            LoroValue::Double(d) => *d,
            LoroValue::I64(i) => *i as f64,
            _ => return None,
        };
    }
    coeffs.iter().all(|c| c.is_finite()).then_some(coeffs)
}
