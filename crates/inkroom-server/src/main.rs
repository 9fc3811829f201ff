//! Inkroom WebSocket Relay Server
//!
//! Relays CRDT updates and presence between the clients of a room. Each room
//! also merges every update into its own document so that late joiners
//! receive the full board in their `joined` frame.
//!
//! ## Protocol
//!
//! Messages are JSON with the following format:
//! ```json
//! { "type": "join", "room": "room-id" }
//! { "type": "sync", "peer_id": 123, "data": "<base64-encoded-loro-bytes>" }
//! { "type": "awareness", "peer_id": 123, "user": { "name": "Ann", "color": "#3b82f6" } }
//! ```

mod state;

use axum::{
    Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use inkroom_core::protocol::{ClientMessage, ServerMessage, encode_payload};
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info, warn};
use uuid::Uuid;

use state::{AppState, RoomFrame, ServerConfig};

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "inkroom_server=info,tower_http=info".into()),
        )
        .init();

    let config = ServerConfig::from_env();
    let addr = config.bind;
    let state = Arc::new(AppState::new(config));

    info!("Inkroom relay server listening on {}", addr);
    info!("WebSocket endpoint: ws://{}/ws", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app(state)).await
}

fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Index page
async fn index() -> &'static str {
    "Inkroom Relay Server - Connect via WebSocket at /ws"
}

/// Health check
async fn health() -> &'static str {
    "ok"
}

/// WebSocket upgrade handler
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

type Sender = SplitSink<WebSocket, Message>;

/// Serialize and send one frame. Returns false once the socket is gone.
async fn send_frame(sender: &mut Sender, msg: &ServerMessage) -> bool {
    match serde_json::to_string(msg) {
        Ok(json) => sender.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            warn!("Failed to encode frame: {}", e);
            true
        }
    }
}

/// Per-connection state
struct Connection {
    conn_id: String,
    room: Option<String>,
    rx: Option<broadcast::Receiver<RoomFrame>>,
}

impl Connection {
    fn leave(&mut self, state: &AppState) {
        let Some(room) = self.room.take() else {
            return;
        };
        self.rx = None;
        let client_id = state.leave_room(&room, &self.conn_id);
        state.broadcast(
            &room,
            &self.conn_id,
            ServerMessage::PeerLeft {
                peer_id: self.conn_id.clone(),
                client_id,
            },
        );
        info!(
            "Peer {} left room {} ({} peers remain)",
            self.conn_id,
            room,
            state.peer_count(&room)
        );
    }

    fn relay_sync(&self, state: &AppState, peer_id: u64, data: String) {
        let Some(ref room) = self.room else {
            return;
        };
        if !state.apply_sync(room, &data) {
            return;
        }
        state.broadcast(
            room,
            &self.conn_id,
            ServerMessage::Sync {
                from: self.conn_id.clone(),
                peer_id,
                data,
            },
        );
    }

    /// Handle one client frame. Returns false once the socket is gone.
    async fn handle(&mut self, state: &AppState, sender: &mut Sender, msg: ClientMessage) -> bool {
        match msg {
            ClientMessage::Join { room } => {
                // Leave current room if any
                self.leave(state);

                let joined = match state.join_room(&room, &self.conn_id) {
                    Ok(joined) => joined,
                    Err(e) => {
                        warn!("Peer {} cannot join {}: {}", self.conn_id, room, e);
                        let err = ServerMessage::Error {
                            message: e.to_string(),
                        };
                        return send_frame(sender, &err).await;
                    }
                };
                self.rx = Some(joined.rx);
                self.room = Some(room.clone());

                // Send joined confirmation, then the presence of everyone already here
                let confirm = ServerMessage::Joined {
                    room: room.clone(),
                    peer_count: joined.peer_count,
                    initial_sync: joined.initial_sync,
                };
                if !send_frame(sender, &confirm).await {
                    return false;
                }
                for presence in &joined.awareness {
                    if !send_frame(sender, presence).await {
                        return false;
                    }
                }

                // Notify others
                state.broadcast(
                    &room,
                    &self.conn_id,
                    ServerMessage::PeerJoined {
                        peer_id: self.conn_id.clone(),
                    },
                );
                info!("Peer {} joined room {} ({} peers)", self.conn_id, room, joined.peer_count);
                debug!("{} rooms active", state.room_count());
            }
            ClientMessage::Leave => self.leave(state),
            ClientMessage::Sync { peer_id, data } => self.relay_sync(state, peer_id, data),
            ClientMessage::Awareness {
                peer_id,
                state: awareness,
            } => {
                if let Some(ref room) = self.room {
                    state.record_awareness(room, &self.conn_id, peer_id, awareness.clone());
                    state.broadcast(
                        room,
                        &self.conn_id,
                        ServerMessage::Awareness {
                            from: self.conn_id.clone(),
                            peer_id,
                            state: awareness,
                        },
                    );
                }
            }
        }
        true
    }
}

/// Handle a WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let mut conn = Connection {
        conn_id: Uuid::new_v4().to_string(),
        room: None,
        rx: None,
    };
    info!("New connection: {}", conn.conn_id);

    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            // Handle incoming messages from client
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(client_msg) => {
                                if !conn.handle(&state, &mut sender, client_msg).await {
                                    break;
                                }
                            }
                            Err(e) => {
                                warn!("Invalid message from {}: {}", conn.conn_id, e);
                                let err = ServerMessage::Error {
                                    message: format!("Invalid message: {}", e),
                                };
                                if !send_frame(&mut sender, &err).await {
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        // Binary messages are treated as raw sync data
                        let peer_id = conn
                            .room
                            .as_deref()
                            .and_then(|room| state.announced_client(room, &conn.conn_id))
                            .unwrap_or(0);
                        conn.relay_sync(&state, peer_id, encode_payload(&data));
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        break;
                    }
                    Some(Ok(_)) => {} // Ignore ping/pong
                    Some(Err(e)) => {
                        warn!("WebSocket error for {}: {}", conn.conn_id, e);
                        break;
                    }
                }
            }

            // Handle broadcast messages from room
            msg = async {
                match &mut conn.rx {
                    Some(rx) => rx.recv().await,
                    None => {
                        // No room joined, just wait forever
                        std::future::pending().await
                    }
                }
            } => {
                match msg {
                    // Don't echo back to sender
                    Ok((from, server_msg)) if from != conn.conn_id => {
                        if !send_frame(&mut sender, &server_msg).await {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Peer {} lagged, {} frames dropped", conn.conn_id, skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Room channel closed for {}", conn.conn_id);
                        conn.rx = None;
                    }
                }
            }
        }
    }

    // Cleanup on disconnect
    conn.leave(&state);
    info!("Connection closed: {}", conn.conn_id);
}
