//! Request/response metadata envelope and the reserved key vocabulary.
//!
//! Every request and every response carries an unordered string-to-string
//! dictionary. Keys are either free-form (routed opaquely to the backend) or
//! reserved: the forwarder and the cookie synchronizer attach protocol
//! meaning to the names in [`keys`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Reserved metadata keys understood by the gateway.
pub mod keys {
    /// Selected in-game role id.
    pub const UID: &str = "uid";
    /// Verified account identity.
    pub const GUID: &str = "guid";
    /// Server/shard id.
    pub const SERVER_ID: &str = "sid";
    /// Developer/master flag ("1" when set).
    pub const DEVELOPER: &str = "dev";
    /// Authorization level the call was cleared under.
    pub const PERMISSION: &str = "per";
    /// Numeric id of the persistent socket carrying the request.
    pub const SOCKET_ID: &str = "sock";
    /// Externally reachable address of this gateway instance.
    pub const GATEWAY: &str = "gate";
    /// Caller's remote address.
    pub const CLIENT_IP: &str = "_uip";
    /// Request correlation id (push acknowledgements use negated values).
    pub const REQUEST_ID: &str = "_rid";
    /// Response shape marker, see [`response_type`](super::response_type).
    pub const RESPONSE_TYPE: &str = "_res_type";
    /// Sticky backend address selected for this call.
    pub const ADDRESS: &str = "_address";
    /// Serialized login cookies attached by the HTTP adapter.
    pub const COOKIE: &str = "_player_cookie";
    /// Push target path.
    pub const MESSAGE_PATH: &str = "_msg_path";
    /// Channel name/value pair for channel push operations.
    pub const MESSAGE_CHANNEL: &str = "_msg_channel";
    /// Comma-separated uid list excluded from a broadcast.
    pub const MESSAGE_IGNORE: &str = "_msg_ignore";
    /// Backend directive: bind this connection to the given guid.
    pub const PLAYER_LOGIN: &str = "_player_login";
    /// Backend directive: tear the bound identity down.
    pub const PLAYER_LOGOUT: &str = "_player_logout";

    /// Marker prefix: join the channel named by the key remainder.
    pub const CHANNEL_JOIN: &str = "player.join.";
    /// Marker prefix: leave the channel named by the key remainder.
    pub const CHANNEL_LEAVE: &str = "player.leave.";
    /// Marker prefix: sticky-routing address persisted per service.
    pub const SELECTOR: &str = "player.selector.";
}

/// Values of the [`keys::RESPONSE_TYPE`] reserved key.
pub mod response_type {
    /// Regular request/response reply.
    pub const NONE: &str = "0";
    /// Push message acknowledged through the session counter.
    pub const RECEIVED: &str = "1";
    /// Broadcast payload, not bound to any one session.
    pub const BROADCAST: &str = "2";
}

/// Session key under which a backend address is persisted for sticky routing.
#[must_use]
pub fn selector_key(service_path: &str) -> String {
    format!("{}{}", keys::SELECTOR, service_path)
}

/// The metadata envelope attached to every request and response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(HashMap<String, String>);

impl Metadata {
    /// Create an empty envelope.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look a key up.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// True when the key is present.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Set a key, overwriting any previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Insert a key only if it is absent. Returns whether the value was
    /// written. Reserved keys are stamped through this so that a value set
    /// by an earlier pipeline stage is never overwritten by a later one.
    pub fn stamp(&mut self, key: impl Into<String>, value: impl Into<String>) -> bool {
        match self.0.entry(key.into()) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(value.into());
                true
            }
        }
    }

    /// Number of keys in the envelope.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when no keys are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over all entries.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl From<HashMap<String, String>> for Metadata {
    fn from(map: HashMap<String, String>) -> Self {
        Self(map)
    }
}

impl FromIterator<(String, String)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
