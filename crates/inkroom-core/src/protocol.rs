//! Relay wire protocol: JSON text frames shared by clients and the server.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::scene::ClientId;

/// Messages sent to the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join a room
    Join { room: String },
    /// Leave current room
    Leave,
    /// CRDT update (base64 encoded Loro bytes) authored by `peer_id`
    Sync { peer_id: ClientId, data: String },
    /// Presence update
    Awareness {
        peer_id: ClientId,
        #[serde(flatten)]
        state: AwarenessState,
    },
}

/// Messages received from the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Confirm room join with current state
    Joined {
        room: String,
        peer_count: usize,
        /// Merged room snapshot (if room has history)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        initial_sync: Option<String>,
    },
    /// Peer joined the room
    PeerJoined { peer_id: String },
    /// Peer left the room; `client_id` is its last announced document client id
    PeerLeft {
        peer_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<ClientId>,
    },
    /// CRDT update relayed from another connection
    Sync {
        from: String,
        peer_id: ClientId,
        data: String,
    },
    /// Presence update relayed from another connection
    Awareness {
        from: String,
        peer_id: ClientId,
        #[serde(flatten)]
        state: AwarenessState,
    },
    /// Error message
    Error { message: String },
}

/// Ephemeral per-connection presence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AwarenessState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<CursorPosition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CursorPosition {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub name: String,
    pub color: String,
}

/// Encode CRDT bytes for a JSON frame.
pub fn encode_payload(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Decode CRDT bytes from a JSON frame.
pub fn decode_payload(data: &str) -> Option<Vec<u8>> {
    STANDARD.decode(data).ok()
}
