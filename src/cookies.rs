//! Cookie / session-metadata synchronization.
//!
//! Decides which response-side annotations become persistent session state
//! and which trigger channel membership changes. Anything not covered by a
//! marker prefix or the allow-list is dropped — response metadata never
//! silently becomes permanent session state.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::Result;
use crate::channel::ChannelRegistry;
use crate::metadata::{Metadata, keys};
use crate::session::{Session, SessionStore};

/// The synchronizer and its cookie allow-list.
pub struct CookieSync {
    allowed: RwLock<HashSet<String>>,
    channels: Arc<ChannelRegistry>,
    sessions: Arc<dyn SessionStore>,
}

impl CookieSync {
    /// Create a synchronizer with the default allow-list
    /// (`uid`, `sid`, `dev`).
    #[must_use]
    pub fn new(channels: Arc<ChannelRegistry>, sessions: Arc<dyn SessionStore>) -> Self {
        let allowed = HashSet::from([
            keys::UID.to_string(),
            keys::SERVER_ID.to_string(),
            keys::DEVELOPER.to_string(),
        ]);
        Self {
            allowed: RwLock::new(allowed),
            channels,
            sessions,
        }
    }

    /// Extend the allow-list. Intended for startup configuration.
    pub fn allow(&self, name: &str) {
        self.allowed.write().insert(name.to_string());
    }

    /// Project an envelope down to its allow-listed keys.
    #[must_use]
    pub fn filter(&self, meta: &Metadata) -> HashMap<String, String> {
        let allowed = self.allowed.read();
        meta.iter()
            .filter(|(k, _)| allowed.contains(*k))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    /// Apply response metadata to a bound session: channel markers drive
    /// membership changes, selector markers and allow-listed keys persist
    /// in one batched session update, everything else is dropped.
    pub async fn sync(&self, res: &Metadata, session: &Arc<Session>) -> Result<()> {
        let mut persist = HashMap::new();
        {
            let allowed = self.allowed.read();
            for (key, value) in res.iter() {
                if let Some(name) = key.strip_prefix(keys::CHANNEL_JOIN) {
                    self.channels.join(session, name, value);
                } else if let Some(name) = key.strip_prefix(keys::CHANNEL_LEAVE) {
                    self.channels.leave(session, name, value);
                } else if key.starts_with(keys::SELECTOR) {
                    persist.insert(key.to_string(), value.to_string());
                } else if allowed.contains(key) {
                    persist.insert(key.to_string(), value.to_string());
                }
            }
        }
        if !persist.is_empty() {
            self.sessions.update(session, persist).await?;
        }
        Ok(())
    }
}
