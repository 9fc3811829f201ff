//! Live participant list built from awareness frames.

use std::collections::HashMap;

use serde::Serialize;

use crate::protocol::{AwarenessState, CursorPosition, UserInfo};
use crate::scene::ClientId;

/// One connected participant as shown to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Participant {
    pub client_id: ClientId,
    pub name: String,
    pub color: String,
}

/// Participant list with its count.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Participants {
    pub count: usize,
    pub list: Vec<Participant>,
}

/// Awareness states of this client and its peers.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    local_client: Option<ClientId>,
    local: AwarenessState,
    remote: HashMap<ClientId, AwarenessState>,
    /// Relay connection id -> announced client id.
    connections: HashMap<String, ClientId>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// The local client id, once published.
    pub fn local_client_id(&self) -> Option<ClientId> {
        self.local_client
    }

    /// Record the local identity. Returns the state to broadcast.
    pub fn publish_local(&mut self, client_id: ClientId, user: UserInfo) -> AwarenessState {
        self.local_client = Some(client_id);
        self.local.user = Some(user);
        self.local.clone()
    }

    /// Update the local cursor. Returns the state to broadcast once the local
    /// identity is published.
    pub fn set_local_cursor(&mut self, cursor: Option<CursorPosition>) -> Option<AwarenessState> {
        if self.local.cursor == cursor {
            return None;
        }
        self.local.cursor = cursor;
        self.local_client.map(|_| self.local.clone())
    }

    pub fn local_state(&self) -> &AwarenessState {
        &self.local
    }

    /// Apply a peer's awareness frame. Returns whether anything changed.
    pub fn apply_remote(&mut self, from: &str, client_id: ClientId, state: AwarenessState) -> bool {
        if Some(client_id) == self.local_client {
            return false;
        }
        match self.connections.insert(from.to_string(), client_id) {
            Some(previous) if previous != client_id => {
                self.remote.remove(&previous);
            }
            _ => {}
        }
        self.remote.insert(client_id, state.clone()) != Some(state)
    }

    /// Drop the state of a departed connection.
    pub fn remove_connection(&mut self, from: &str, client_id: Option<ClientId>) -> bool {
        let known = self.connections.remove(from);
        match client_id.or(known) {
            Some(id) => self.remote.remove(&id).is_some(),
            None => false,
        }
    }

    /// Forget every peer (local identity is kept).
    pub fn clear_remote(&mut self) {
        self.remote.clear();
        self.connections.clear();
    }

    /// Current participants, local client included, sorted by client id.
    /// Anonymous entries and entries with a malformed color are left out.
    pub fn snapshot(&self) -> Participants {
        let local = self.local_client.map(|id| (id, &self.local));
        let mut list: Vec<Participant> = local
            .into_iter()
            .chain(self.remote.iter().map(|(id, state)| (*id, state)))
            .filter_map(|(client_id, state)| {
                let user = state.user.as_ref()?;
                let name = user.name.trim();
                if name.is_empty() || !is_hex_color(&user.color) {
                    return None;
                }
                Some(Participant {
                    client_id,
                    name: name.to_string(),
                    color: user.color.clone(),
                })
            })
            .collect();
        list.sort_by_key(|p| p.client_id);
        Participants {
            count: list.len(),
            list,
        }
    }
}

fn is_hex_color(color: &str) -> bool {
    match color.strip_prefix('#') {
        Some(hex) => {
            matches!(hex.len(), 3 | 6) && hex.chars().all(|c| c.is_ascii_hexdigit())
        }
        None => false,
    }
}
