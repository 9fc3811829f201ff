//! Shared-document layer backed by the Loro CRDT.
//!
//! Each room owns one document with three root maps:
//! ```text
//! LoroDoc
//! ├── "objects":  LoroMap<ObjectId, LoroMap> (one entry per scene object)
//! ├── "session":  LoroMap { "allowParticipantDraw": bool }
//! └── "viewport": LoroMap { "transform": LoroList<f64; 6> }
//! ```
//!
//! Each object entry is a LoroMap with:
//! - "type": kind tag ("path", "rect", "circle", "line", "text", "image")
//! - "id": UUID string
//! - "createdBy": owning client id
//! - kind-specific geometry and the shared style fields

pub mod codec;
mod document;

pub use document::{
    ALLOW_DRAW_KEY, ChangeKind, ConnectionState, MapChange, OBJECTS_KEY, SESSION_KEY,
    SharedDocument, SharedMap, TRANSFORM_KEY, VIEWPORT_KEY,
};
