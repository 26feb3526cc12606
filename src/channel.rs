//! The channel/room registry.
//!
//! A room is a named, value-keyed broadcast group of connected identities;
//! its identity is the pair `(name, value)`, encoded on the wire as a
//! two-element JSON array. Membership changes arrive through the cookie
//! synchronizer; broadcasts arrive from backends via the push service.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::players::{Outbound, PlayerRegistry};
use crate::session::Session;
use crate::{Error, Result};

/// Encode a room identity for the wire.
#[must_use]
pub fn encode_name(name: &str, value: &str) -> String {
    serde_json::to_string(&[name, value]).unwrap_or_default()
}

/// Parse a wire-encoded room identity.
pub fn parse_name(encoded: &str) -> Result<(String, String)> {
    let parts: Vec<String> = serde_json::from_str(encoded)?;
    match <[String; 2]>::try_from(parts) {
        Ok([name, value]) => Ok((name, value)),
        Err(_) => Err(Error::Internal(format!("bad channel name: {encoded}"))),
    }
}

/// One broadcast group.
#[derive(Debug)]
pub struct Room {
    name: String,
    value: String,
    players: Arc<PlayerRegistry>,
    members: DashMap<String, ()>,
}

impl Room {
    /// The room's name component.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The room's value component.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Number of member identities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// True when the room has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Deliver a payload to every member with a live socket.
    pub fn broadcast(&self, path: &str, body: &[u8]) {
        let body = bytes::Bytes::copy_from_slice(body);
        for member in &self.members {
            let Some(player) = self.players.get(member.key()) else {
                continue;
            };
            let _ = player.sender.send(Outbound {
                request_id: 0,
                path: path.to_string(),
                body: body.clone(),
            });
        }
        debug!(room = %self.name, value = %self.value, path = %path, "channel broadcast");
    }
}

/// All rooms, keyed by `(name, value)`.
#[derive(Debug)]
pub struct ChannelRegistry {
    players: Arc<PlayerRegistry>,
    rooms: DashMap<(String, String), Arc<Room>>,
}

impl ChannelRegistry {
    /// Create a registry delivering through the given player registry.
    #[must_use]
    pub fn new(players: Arc<PlayerRegistry>) -> Self {
        Self {
            players,
            rooms: DashMap::new(),
        }
    }

    /// Add a session to a room, creating the room on first join. Joining a
    /// room twice is a no-op.
    pub fn join(&self, session: &Session, name: &str, value: &str) {
        let room = self
            .rooms
            .entry((name.to_string(), value.to_string()))
            .or_insert_with(|| {
                Arc::new(Room {
                    name: name.to_string(),
                    value: value.to_string(),
                    players: Arc::clone(&self.players),
                    members: DashMap::new(),
                })
            });
        room.members.insert(session.guid().to_string(), ());
    }

    /// Remove a session from a room.
    pub fn leave(&self, session: &Session, name: &str, value: &str) {
        if let Some(room) = self.get(name, value) {
            room.members.remove(session.guid());
        }
    }

    /// Look a room up.
    #[must_use]
    pub fn get(&self, name: &str, value: &str) -> Option<Arc<Room>> {
        self.rooms
            .get(&(name.to_string(), value.to_string()))
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Drop a room outright.
    pub fn delete(&self, name: &str, value: &str) {
        self.rooms.remove(&(name.to_string(), value.to_string()));
    }

    /// Remove a session from every room it joined. Called on session
    /// teardown.
    pub fn release(&self, session: &Session) {
        for room in &self.rooms {
            room.members.remove(session.guid());
        }
    }
}
