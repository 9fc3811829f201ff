//! Inkroom Core Library
//!
//! Synchronization bridge between a local whiteboard scene and a room-scoped
//! Loro document: object codec, ownership permissions, presence and a
//! presenter-driven viewport.

pub mod bridge;
pub mod bus;
pub mod camera;
pub mod collaboration;
pub mod config;
pub mod crdt;
pub mod debounce;
pub mod error;
pub mod permission;
pub mod presence;
pub mod protocol;
pub mod scene;
pub mod shapes;
pub mod transport;
pub mod viewport;

pub use bridge::{AssetLoader, Bridge, InlineAssets, Publish, SyncSession};
pub use bus::{BridgeEvent, EventQueue};
pub use camera::Camera;
pub use collaboration::CollabRoom;
pub use config::RoomConfig;
pub use crdt::{ChangeKind, ConnectionState, MapChange, SharedDocument};
pub use error::{DecodeError, SyncError, SyncResult, TransportError};
pub use permission::{PermissionPolicy, Role, compute_lock};
pub use presence::{Participant, Participants, PresenceTracker};
pub use scene::{ClientId, ObjectId, ObjectKind, Scene, SceneEvent, SceneGraph, SceneObject};
pub use transport::{PlatformWebSocket, Transport, TransportEvent};
pub use viewport::ViewportMirror;
