//! The player-connection registry.
//!
//! Tracks which identity is live on which persistent socket, with
//! at-most-one-active-socket-per-identity semantics: a second login for the
//! same guid replaces the first. Adapters register an outbound sender per
//! socket; backend push traffic is delivered through it.

use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;

use crate::session::{Session, SessionStore};
use crate::{Error, Result};

/// A message queued for delivery to a client socket.
#[derive(Debug, Clone)]
pub struct Outbound {
    /// Correlation id echoed back to the client (0 for unsolicited pushes).
    pub request_id: i32,
    /// Message path the client dispatches on.
    pub path: String,
    /// Payload bytes.
    pub body: Bytes,
}

/// Outbound delivery handle for one socket.
pub type PushSender = mpsc::UnboundedSender<Outbound>;

/// A live player: a session bound to a connected socket.
#[derive(Debug)]
pub struct Player {
    /// The bound session.
    pub session: Arc<Session>,
    /// Socket carrying the connection.
    pub socket_id: u64,
    /// Delivery handle.
    pub sender: PushSender,
}

/// Online-socket bookkeeping for all connected identities.
#[derive(Debug, Default)]
pub struct PlayerRegistry {
    by_guid: DashMap<String, Arc<Player>>,
    by_socket: DashMap<u64, PushSender>,
}

impl PlayerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a socket's outbound sender before any login happens. The
    /// `write` push operation targets sockets through this table.
    pub fn register_socket(&self, socket_id: u64, sender: PushSender) {
        self.by_socket.insert(socket_id, sender);
    }

    /// Drop a socket's outbound sender on disconnect.
    pub fn unregister_socket(&self, socket_id: u64) {
        self.by_socket.remove(&socket_id);
    }

    /// Outbound sender for a raw socket id.
    #[must_use]
    pub fn socket_sender(&self, socket_id: u64) -> Option<PushSender> {
        self.by_socket.get(&socket_id).map(|s| s.clone())
    }

    /// Bind an identity to a socket. Any prior binding for the same guid is
    /// replaced and returned so the adapter can notify the old socket.
    pub fn connect(
        &self,
        session: Arc<Session>,
        socket_id: u64,
        sender: PushSender,
    ) -> Option<Arc<Player>> {
        let player = Arc::new(Player {
            socket_id,
            sender,
            session: Arc::clone(&session),
        });
        let replaced = self.by_guid.insert(session.guid().to_string(), player);
        if replaced.is_some() {
            debug!(guid = %session.guid(), socket_id, "relogin replaces prior socket");
        }
        replaced
    }

    /// Re-bind an identity to a new socket using its session credential.
    pub async fn reconnect(
        &self,
        store: &dyn SessionStore,
        credential: &str,
        socket_id: u64,
        sender: PushSender,
    ) -> Result<Arc<Session>> {
        let Some(session) = store.verify(credential).await? else {
            return Err(Error::NotLoggedIn);
        };
        self.connect(Arc::clone(&session), socket_id, sender);
        Ok(session)
    }

    /// Live player for a guid, if connected.
    #[must_use]
    pub fn get(&self, guid: &str) -> Option<Arc<Player>> {
        self.by_guid.get(guid).map(|entry| Arc::clone(entry.value()))
    }

    /// Outbound sender for a session's live socket, if connected.
    #[must_use]
    pub fn sender(&self, session: &Session) -> Option<PushSender> {
        self.get(session.guid()).map(|player| player.sender.clone())
    }

    /// Drop the binding for a socket, but only when that socket still owns
    /// it — a relogin may already have claimed the guid for a newer socket.
    pub fn disconnect(&self, guid: &str, socket_id: u64) {
        self.by_guid
            .remove_if(guid, |_, player| player.socket_id == socket_id);
        self.by_socket.remove(&socket_id);
    }

    /// Remove an identity's live-connection binding. Returns whether a
    /// binding existed.
    pub fn delete(&self, session: &Session) -> bool {
        self.by_guid.remove(session.guid()).is_some()
    }

    /// Visit every live player; stop when `visit` returns false.
    pub fn range(&self, mut visit: impl FnMut(&Arc<Player>) -> bool) {
        for entry in &self.by_guid {
            if !visit(entry.value()) {
                break;
            }
        }
    }

    /// Number of live players.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_guid.len()
    }

    /// True when nobody is connected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_guid.is_empty()
    }
}
