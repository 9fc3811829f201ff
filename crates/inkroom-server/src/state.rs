//! Room registry shared by all connections.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;

use dashmap::DashMap;
use inkroom_core::ClientId;
use inkroom_core::protocol::{AwarenessState, ServerMessage, decode_payload, encode_payload};
use loro::{ExportMode, LoroDoc};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};

const CHANNEL_CAPACITY: usize = 256;

/// A relayed frame tagged with the connection that sent it.
pub type RoomFrame = (String, ServerMessage);

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub max_peers_per_room: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 3030)),
            max_peers_per_room: 64,
        }
    }
}

impl ServerConfig {
    /// Read `INKROOM_BIND` and `INKROOM_MAX_PEERS_PER_ROOM`.
    pub fn from_env() -> Self {
        Self::from_vars(
            std::env::var("INKROOM_BIND").ok(),
            std::env::var("INKROOM_MAX_PEERS_PER_ROOM").ok(),
        )
    }

    /// Build from raw values; unparsable values fall back to the defaults.
    pub fn from_vars(bind: Option<String>, max_peers: Option<String>) -> Self {
        let defaults = Self::default();
        let bind = match bind.map(|b| b.parse::<SocketAddr>()) {
            Some(Ok(addr)) => addr,
            Some(Err(e)) => {
                warn!("Ignoring INKROOM_BIND: {}", e);
                defaults.bind
            }
            None => defaults.bind,
        };
        let max_peers_per_room = match max_peers.map(|m| m.parse::<usize>()) {
            Some(Ok(n)) if n > 0 => n,
            Some(_) => {
                warn!("Ignoring INKROOM_MAX_PEERS_PER_ROOM");
                defaults.max_peers_per_room
            }
            None => defaults.max_peers_per_room,
        };
        Self {
            bind,
            max_peers_per_room,
        }
    }
}

/// Room state
struct Room {
    /// Broadcast channel for this room
    tx: broadcast::Sender<RoomFrame>,
    /// Connected connection ids
    peers: HashSet<String>,
    /// Merge of every update seen, handed to joiners
    doc: LoroDoc,
    has_history: bool,
    /// Last awareness frame per connection
    awareness: HashMap<String, (ClientId, AwarenessState)>,
}

impl Room {
    fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            peers: HashSet::new(),
            doc: LoroDoc::new(),
            has_history: false,
            awareness: HashMap::new(),
        }
    }

    fn snapshot(&self) -> Option<String> {
        if !self.has_history {
            return None;
        }
        match self.doc.export(ExportMode::Snapshot) {
            Ok(bytes) => Some(encode_payload(&bytes)),
            Err(e) => {
                warn!("Failed to export room snapshot: {}", e);
                None
            }
        }
    }
}

/// Everything a connection needs after joining.
pub struct Joined {
    pub rx: broadcast::Receiver<RoomFrame>,
    pub initial_sync: Option<String>,
    pub peer_count: usize,
    /// Presence of the peers already in the room.
    pub awareness: Vec<ServerMessage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JoinError {
    #[error("Room is full ({max} peers)")]
    RoomFull { max: usize },
}

/// Shared application state
pub struct AppState {
    config: ServerConfig,
    /// Active rooms
    rooms: DashMap<String, Room>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            rooms: DashMap::new(),
        }
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn peer_count(&self, room_id: &str) -> usize {
        self.rooms.get(room_id).map_or(0, |room| room.peers.len())
    }

    /// Add a connection to a room
    pub fn join_room(&self, room_id: &str, conn_id: &str) -> Result<Joined, JoinError> {
        let mut room = self.rooms.entry(room_id.to_string()).or_insert_with(Room::new);
        if !room.peers.contains(conn_id) && room.peers.len() >= self.config.max_peers_per_room {
            return Err(JoinError::RoomFull {
                max: self.config.max_peers_per_room,
            });
        }
        room.peers.insert(conn_id.to_string());
        let awareness = room
            .awareness
            .iter()
            .filter(|(from, _)| from.as_str() != conn_id)
            .map(|(from, (peer_id, state))| ServerMessage::Awareness {
                from: from.clone(),
                peer_id: *peer_id,
                state: state.clone(),
            })
            .collect();
        Ok(Joined {
            rx: room.tx.subscribe(),
            initial_sync: room.snapshot(),
            peer_count: room.peers.len(),
            awareness,
        })
    }

    /// Remove a connection from a room. Returns the client id it last
    /// announced, if any.
    pub fn leave_room(&self, room_id: &str, conn_id: &str) -> Option<ClientId> {
        let mut room = self.rooms.get_mut(room_id)?;
        room.peers.remove(conn_id);
        let client_id = room.awareness.remove(conn_id).map(|(id, _)| id);
        // Clean up empty rooms
        if room.peers.is_empty() {
            drop(room);
            self.rooms.remove(room_id);
            debug!("Room {} closed", room_id);
        }
        client_id
    }

    /// Merge an update into the room document. Returns false if the payload
    /// isn't a valid update.
    pub fn apply_sync(&self, room_id: &str, data: &str) -> bool {
        let Some(mut room) = self.rooms.get_mut(room_id) else {
            return false;
        };
        let Some(bytes) = decode_payload(data) else {
            warn!("Rejecting sync for room {}: payload is not base64", room_id);
            return false;
        };
        match room.doc.import(&bytes) {
            Ok(_) => {
                room.has_history = true;
                true
            }
            Err(e) => {
                warn!("Rejecting sync for room {}: {}", room_id, e);
                false
            }
        }
    }

    /// Remember the latest presence of a connection.
    pub fn record_awareness(
        &self,
        room_id: &str,
        conn_id: &str,
        peer_id: ClientId,
        state: AwarenessState,
    ) {
        if let Some(mut room) = self.rooms.get_mut(room_id) {
            room.awareness.insert(conn_id.to_string(), (peer_id, state));
        }
    }

    /// Client id a connection announced through awareness.
    pub fn announced_client(&self, room_id: &str, conn_id: &str) -> Option<ClientId> {
        let room = self.rooms.get(room_id)?;
        room.awareness.get(conn_id).map(|(id, _)| *id)
    }

    /// Broadcast message to room
    pub fn broadcast(&self, room_id: &str, from: &str, msg: ServerMessage) {
        if let Some(room) = self.rooms.get(room_id) {
            let _ = room.tx.send((from.to_string(), msg));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inkroom_core::protocol::UserInfo;

    fn state_with(max_peers_per_room: usize) -> AppState {
        AppState::new(ServerConfig {
            max_peers_per_room,
            ..ServerConfig::default()
        })
    }

    fn update(key: &str, value: &str) -> String {
        let doc = LoroDoc::new();
        doc.get_map("objects").insert(key, value).unwrap();
        doc.commit();
        encode_payload(&doc.export(ExportMode::Snapshot).unwrap())
    }

    #[test]
    fn test_config_from_vars() {
        let config = ServerConfig::from_vars(Some("127.0.0.1:4000".into()), Some("8".into()));
        assert_eq!(config.bind, SocketAddr::from(([127, 0, 0, 1], 4000)));
        assert_eq!(config.max_peers_per_room, 8);

        let config = ServerConfig::from_vars(Some("nonsense".into()), Some("0".into()));
        assert_eq!(config, ServerConfig::default());
        assert_eq!(ServerConfig::from_vars(None, None), ServerConfig::default());
    }

    #[tokio::test]
    async fn test_join_and_leave() {
        let state = state_with(4);
        let first = state.join_room("r", "a").unwrap();
        assert_eq!(first.peer_count, 1);
        assert!(first.initial_sync.is_none());
        let second = state.join_room("r", "b").unwrap();
        assert_eq!(second.peer_count, 2);

        state.leave_room("r", "a");
        assert_eq!(state.peer_count("r"), 1);
        state.leave_room("r", "b");
        assert_eq!(state.room_count(), 0);
    }

    #[tokio::test]
    async fn test_room_full() {
        let state = state_with(1);
        let _a = state.join_room("r", "a").unwrap();
        let err = state.join_room("r", "b").err().unwrap();
        assert_eq!(err, JoinError::RoomFull { max: 1 });
        assert_eq!(err.to_string(), "Room is full (1 peers)");
        let boxed: Box<dyn std::error::Error> = Box::new(err);
        assert!(boxed.source().is_none());
        // Rejoining with the same connection is fine.
        assert!(state.join_room("r", "a").is_ok());
    }

    #[tokio::test]
    async fn test_joiner_gets_merged_state() {
        let state = state_with(4);
        let _a = state.join_room("r", "a").unwrap();
        assert!(state.apply_sync("r", &update("one", "1")));
        assert!(state.apply_sync("r", &update("two", "2")));
        assert!(!state.apply_sync("r", "not base64!"));

        let joined = state.join_room("r", "b").unwrap();
        let bytes = decode_payload(&joined.initial_sync.unwrap()).unwrap();
        let doc = LoroDoc::new();
        doc.import(&bytes).unwrap();
        assert_eq!(doc.get_map("objects").len(), 2);
    }

    #[tokio::test]
    async fn test_awareness_replayed_and_released() {
        let state = state_with(4);
        let _a = state.join_room("r", "a").unwrap();
        let presence = AwarenessState {
            cursor: None,
            user: Some(UserInfo {
                name: "Ann".into(),
                color: "#112233".into(),
            }),
        };
        state.record_awareness("r", "a", 42, presence.clone());
        assert_eq!(state.announced_client("r", "a"), Some(42));

        let joined = state.join_room("r", "b").unwrap();
        assert_eq!(
            joined.awareness,
            vec![ServerMessage::Awareness {
                from: "a".into(),
                peer_id: 42,
                state: presence,
            }]
        );
        assert_eq!(state.leave_room("r", "a"), Some(42));
        assert_eq!(state.leave_room("r", "b"), None);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_members() {
        let state = state_with(4);
        let mut a = state.join_room("r", "a").unwrap();
        state.broadcast(
            "r",
            "b",
            ServerMessage::PeerJoined {
                peer_id: "b".into(),
            },
        );
        let (from, msg) = a.rx.recv().await.unwrap();
        assert_eq!(from, "b");
        assert_eq!(
            msg,
            ServerMessage::PeerJoined {
                peer_id: "b".into()
            }
        );
    }
}
