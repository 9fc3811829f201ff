//! Room connection settings supplied by the host application.

use serde::Deserialize;

use crate::permission::Role;

/// Default relay endpoint.
pub const DEFAULT_SERVER_URL: &str = "ws://localhost:3030/ws";

/// Settings for joining one room.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RoomConfig {
    pub server_url: String,
    pub room: String,
    pub role: Role,
    /// Display name published through awareness.
    pub user_name: String,
    /// Hex color (`#rrggbb`) published through awareness.
    pub user_color: String,
    /// Force this client's session into view-only mode.
    pub read_only: bool,
    /// Participants may only edit objects they created.
    pub enforce_ownership: bool,
    /// Draw permission assumed until the replicated value is seen.
    pub default_participant_draw: bool,
    /// Quiet period before a presenter viewport change is broadcast.
    pub viewport_debounce_ms: u64,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            room: "default".to_string(),
            role: Role::Participant,
            user_name: "Anonymous".to_string(),
            user_color: "#3b82f6".to_string(),
            read_only: false,
            enforce_ownership: true,
            default_participant_draw: false,
            viewport_debounce_ms: 50,
        }
    }
}

impl RoomConfig {
    /// Parse from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn presenter(room: impl Into<String>) -> Self {
        Self {
            room: room.into(),
            role: Role::Presenter,
            ..Self::default()
        }
    }

    pub fn participant(room: impl Into<String>) -> Self {
        Self {
            room: room.into(),
            ..Self::default()
        }
    }
}
