//! WebSocket transport to the relay server.
//!
//! Transports are poll-based: socket callbacks (wasm) or a background thread
//! (native) queue [`TransportEvent`]s that the room drains once per frame.
//! Transports never reconnect on their own.

use crate::crdt::ConnectionState;
use crate::error::TransportError;
use crate::protocol::{AwarenessState, ServerMessage, decode_payload};
use crate::scene::ClientId;

/// Events from a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected,
    Disconnected,
    JoinedRoom {
        room: String,
        peer_count: usize,
        initial_sync: Option<Vec<u8>>,
    },
    PeerJoined {
        peer_id: String,
    },
    PeerLeft {
        peer_id: String,
        client_id: Option<ClientId>,
    },
    SyncReceived {
        from: String,
        peer_id: ClientId,
        data: Vec<u8>,
    },
    AwarenessReceived {
        from: String,
        peer_id: ClientId,
        state: AwarenessState,
    },
    Error {
        message: String,
    },
}

/// Connection to a relay.
pub trait Transport {
    /// Start connecting. Completion is reported as [`TransportEvent::Connected`].
    fn open(&mut self, url: &str) -> Result<(), TransportError>;

    /// Queue a text frame.
    fn send(&mut self, frame: &str) -> Result<(), TransportError>;

    /// Drain pending events (non-blocking).
    fn poll_events(&mut self) -> Vec<TransportEvent>;

    /// Close the connection. No events are delivered afterwards.
    fn close(&mut self);

    fn state(&self) -> ConnectionState;

    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }
}

/// Parse a server frame into an event. Malformed frames and undecodable
/// payloads yield `None`.
pub fn parse_frame(text: &str) -> Option<TransportEvent> {
    let msg = match serde_json::from_str::<ServerMessage>(text) {
        Ok(msg) => msg,
        Err(e) => {
            log::warn!("Failed to parse server message: {e}");
            return None;
        }
    };
    let event = match msg {
        ServerMessage::Joined {
            room,
            peer_count,
            initial_sync,
        } => TransportEvent::JoinedRoom {
            room,
            peer_count,
            initial_sync: initial_sync.and_then(|s| decode_payload(&s)),
        },
        ServerMessage::PeerJoined { peer_id } => TransportEvent::PeerJoined { peer_id },
        ServerMessage::PeerLeft { peer_id, client_id } => {
            TransportEvent::PeerLeft { peer_id, client_id }
        }
        ServerMessage::Sync {
            from,
            peer_id,
            data,
        } => {
            let Some(data) = decode_payload(&data) else {
                log::warn!("Dropping sync from {from}: payload is not base64");
                return None;
            };
            TransportEvent::SyncReceived {
                from,
                peer_id,
                data,
            }
        }
        ServerMessage::Awareness {
            from,
            peer_id,
            state,
        } => TransportEvent::AwarenessReceived {
            from,
            peer_id,
            state,
        },
        ServerMessage::Error { message } => TransportEvent::Error { message },
    };
    Some(event)
}

fn track_state(state: &mut ConnectionState, event: &TransportEvent) {
    match event {
        TransportEvent::Connected => *state = ConnectionState::Connected,
        TransportEvent::Disconnected => *state = ConnectionState::Disconnected,
        TransportEvent::Error { .. } => *state = ConnectionState::Error,
        _ => {}
    }
}

// ============================================================================
// WASM WebSocket Client
// ============================================================================

#[cfg(target_arch = "wasm32")]
mod wasm_client {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;
    use wasm_bindgen::JsCast;
    use wasm_bindgen::prelude::*;
    use web_sys::{CloseEvent, ErrorEvent, MessageEvent, WebSocket};

    /// Browser WebSocket transport.
    pub struct WasmWebSocket {
        ws: Option<WebSocket>,
        state: ConnectionState,
        events: Rc<RefCell<Vec<TransportEvent>>>,
        // Keep closures alive while the socket is open
        _on_open: Option<Closure<dyn Fn()>>,
        _on_message: Option<Closure<dyn Fn(MessageEvent)>>,
        _on_close: Option<Closure<dyn Fn(CloseEvent)>>,
        _on_error: Option<Closure<dyn Fn(ErrorEvent)>>,
    }

    impl WasmWebSocket {
        pub fn new() -> Self {
            Self {
                ws: None,
                state: ConnectionState::Disconnected,
                events: Rc::new(RefCell::new(Vec::new())),
                _on_open: None,
                _on_message: None,
                _on_close: None,
                _on_error: None,
            }
        }
    }

    impl Default for WasmWebSocket {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Transport for WasmWebSocket {
        fn open(&mut self, url: &str) -> Result<(), TransportError> {
            if self.ws.is_some() {
                return Err(TransportError::AlreadyConnected);
            }

            let ws = WebSocket::new(url).map_err(|e| TransportError::InvalidUrl(format!("{e:?}")))?;
            ws.set_binary_type(web_sys::BinaryType::Arraybuffer);
            self.state = ConnectionState::Connecting;

            let events_open = self.events.clone();
            let on_open = Closure::wrap(Box::new(move || {
                events_open.borrow_mut().push(TransportEvent::Connected);
            }) as Box<dyn Fn()>);
            ws.set_onopen(Some(on_open.as_ref().unchecked_ref()));

            let events_msg = self.events.clone();
            let on_message = Closure::wrap(Box::new(move |e: MessageEvent| {
                if let Ok(txt) = e.data().dyn_into::<js_sys::JsString>() {
                    let text: String = txt.into();
                    if let Some(event) = parse_frame(&text) {
                        events_msg.borrow_mut().push(event);
                    }
                }
            }) as Box<dyn Fn(MessageEvent)>);
            ws.set_onmessage(Some(on_message.as_ref().unchecked_ref()));

            let events_close = self.events.clone();
            let on_close = Closure::wrap(Box::new(move |_e: CloseEvent| {
                events_close.borrow_mut().push(TransportEvent::Disconnected);
            }) as Box<dyn Fn(CloseEvent)>);
            ws.set_onclose(Some(on_close.as_ref().unchecked_ref()));

            let events_err = self.events.clone();
            let on_error = Closure::wrap(Box::new(move |_e: ErrorEvent| {
                events_err.borrow_mut().push(TransportEvent::Error {
                    message: "WebSocket error".to_string(),
                });
            }) as Box<dyn Fn(ErrorEvent)>);
            ws.set_onerror(Some(on_error.as_ref().unchecked_ref()));

            self.ws = Some(ws);
            self._on_open = Some(on_open);
            self._on_message = Some(on_message);
            self._on_close = Some(on_close);
            self._on_error = Some(on_error);
            Ok(())
        }

        fn send(&mut self, frame: &str) -> Result<(), TransportError> {
            let ws = self.ws.as_ref().ok_or(TransportError::NotConnected)?;
            ws.send_with_str(frame)
                .map_err(|e| TransportError::Send(format!("{e:?}")))
        }

        fn poll_events(&mut self) -> Vec<TransportEvent> {
            let events = std::mem::take(&mut *self.events.borrow_mut());
            for event in &events {
                track_state(&mut self.state, event);
            }
            if events.contains(&TransportEvent::Disconnected) {
                // Socket is gone; release it so `open` can run again.
                self.close();
            }
            events
        }

        fn close(&mut self) {
            if let Some(ws) = self.ws.take() {
                ws.set_onopen(None);
                ws.set_onmessage(None);
                ws.set_onclose(None);
                ws.set_onerror(None);
                let _ = ws.close();
            }
            self.events.borrow_mut().clear();
            self.state = ConnectionState::Disconnected;
            self._on_open = None;
            self._on_message = None;
            self._on_close = None;
            self._on_error = None;
        }

        fn state(&self) -> ConnectionState {
            self.state
        }
    }
}

#[cfg(target_arch = "wasm32")]
pub use wasm_client::WasmWebSocket;

// ============================================================================
// Native WebSocket Client
// ============================================================================

#[cfg(not(target_arch = "wasm32"))]
mod native_client {
    use super::*;
    use std::sync::mpsc::{Receiver, Sender, TryRecvError, channel};
    use std::thread::{self, JoinHandle};
    use std::time::Duration;
    use tungstenite::{Message, connect};
    use url::Url;

    enum WsCommand {
        Send(String),
        Close,
    }

    /// WebSocket transport running on a background thread.
    pub struct NativeWebSocket {
        state: ConnectionState,
        cmd_tx: Option<Sender<WsCommand>>,
        event_rx: Option<Receiver<TransportEvent>>,
        _thread: Option<JoinHandle<()>>,
    }

    impl NativeWebSocket {
        pub fn new() -> Self {
            Self {
                state: ConnectionState::Disconnected,
                cmd_tx: None,
                event_rx: None,
                _thread: None,
            }
        }
    }

    impl Default for NativeWebSocket {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Drop for NativeWebSocket {
        fn drop(&mut self) {
            self.close();
        }
    }

    fn run(url: String, cmd_rx: Receiver<WsCommand>, event_tx: Sender<TransportEvent>) {
        log::info!("WebSocket thread: connecting to {url}");
        let (mut socket, response) = match connect(&url) {
            Ok(ok) => ok,
            Err(e) => {
                log::error!("WebSocket connection failed: {e}");
                let _ = event_tx.send(TransportEvent::Error {
                    message: format!("Connection failed: {e}"),
                });
                return;
            }
        };
        log::info!("WebSocket connected, status: {}", response.status());
        let _ = event_tx.send(TransportEvent::Connected);

        // Short read timeout so commands are serviced between reads
        if let tungstenite::stream::MaybeTlsStream::Plain(tcp) = socket.get_mut() {
            let _ = tcp.set_read_timeout(Some(Duration::from_millis(50)));
            let _ = tcp.set_write_timeout(Some(Duration::from_secs(5)));
        }

        loop {
            match cmd_rx.try_recv() {
                Ok(WsCommand::Send(msg)) => {
                    if let Err(e) = socket.send(Message::Text(msg)) {
                        log::error!("WebSocket send error: {e}");
                        break;
                    }
                }
                Ok(WsCommand::Close) | Err(TryRecvError::Disconnected) => {
                    log::info!("WebSocket close requested");
                    let _ = socket.close(None);
                    // The owner is gone; nobody reads further events.
                    return;
                }
                Err(TryRecvError::Empty) => {}
            }

            match socket.read() {
                Ok(Message::Text(txt)) => {
                    if let Some(event) = parse_frame(&txt) {
                        let _ = event_tx.send(event);
                    }
                }
                Ok(Message::Ping(data)) => {
                    let _ = socket.send(Message::Pong(data));
                }
                Ok(Message::Close(_)) => {
                    log::info!("WebSocket received close frame");
                    break;
                }
                Ok(_) => {}
                Err(tungstenite::Error::Io(ref e))
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => {
                    log::error!("WebSocket read error: {e}");
                    break;
                }
            }
        }

        log::info!("WebSocket thread exiting");
        let _ = event_tx.send(TransportEvent::Disconnected);
    }

    impl Transport for NativeWebSocket {
        fn open(&mut self, url: &str) -> Result<(), TransportError> {
            if self.cmd_tx.is_some() {
                return Err(TransportError::AlreadyConnected);
            }
            let parsed = Url::parse(url).map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
            if parsed.scheme() != "ws" && parsed.scheme() != "wss" {
                return Err(TransportError::InvalidUrl(format!(
                    "unsupported scheme {}",
                    parsed.scheme()
                )));
            }

            self.state = ConnectionState::Connecting;
            let (cmd_tx, cmd_rx) = channel();
            let (event_tx, event_rx) = channel();
            let url = url.to_string();
            let handle = thread::spawn(move || run(url, cmd_rx, event_tx));

            self.cmd_tx = Some(cmd_tx);
            self.event_rx = Some(event_rx);
            self._thread = Some(handle);
            Ok(())
        }

        fn send(&mut self, frame: &str) -> Result<(), TransportError> {
            let tx = self.cmd_tx.as_ref().ok_or(TransportError::NotConnected)?;
            tx.send(WsCommand::Send(frame.to_string()))
                .map_err(|e| TransportError::Send(e.to_string()))
        }

        fn poll_events(&mut self) -> Vec<TransportEvent> {
            let Some(rx) = self.event_rx.as_ref() else {
                return Vec::new();
            };
            let mut events = Vec::new();
            let finished = loop {
                match rx.try_recv() {
                    Ok(event) => events.push(event),
                    Err(TryRecvError::Empty) => break false,
                    Err(TryRecvError::Disconnected) => break true,
                }
            };
            for event in &events {
                track_state(&mut self.state, event);
            }
            if finished {
                // The socket thread exited; allow a fresh `open`.
                self.cmd_tx = None;
                self.event_rx = None;
                self._thread = None;
            }
            events
        }

        fn close(&mut self) {
            if let Some(tx) = self.cmd_tx.take() {
                let _ = tx.send(WsCommand::Close);
            }
            self.event_rx = None;
            self._thread = None;
            self.state = ConnectionState::Disconnected;
        }

        fn state(&self) -> ConnectionState {
            self.state
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_rejects_bad_urls() {
            let mut ws = NativeWebSocket::new();
            assert!(matches!(ws.open("not a url"), Err(TransportError::InvalidUrl(_))));
            assert!(matches!(
                ws.open("http://localhost:3030/ws"),
                Err(TransportError::InvalidUrl(_))
            ));
            assert_eq!(ws.state(), ConnectionState::Disconnected);
            assert_eq!(ws.send("{}"), Err(TransportError::NotConnected));
        }
    }
}

#[cfg(not(target_arch = "wasm32"))]
pub use native_client::NativeWebSocket;

/// Platform-specific WebSocket transport.
#[cfg(target_arch = "wasm32")]
pub type PlatformWebSocket = WasmWebSocket;

#[cfg(not(target_arch = "wasm32"))]
pub type PlatformWebSocket = NativeWebSocket;
