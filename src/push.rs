//! Backend-to-client push delivery.
//!
//! Backend services call these handlers to reach clients outside the
//! request/response cycle. Targets are addressed through request metadata:
//! a guid for per-player delivery, a raw socket id for pre-login delivery,
//! or nothing for a full broadcast. Offline targets are dropped silently —
//! push is best-effort by contract.

use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;

use crate::channel::{self, ChannelRegistry};
use crate::cookies::CookieSync;
use crate::metadata::{Metadata, keys};
use crate::players::{Outbound, PlayerRegistry, PushSender};
use crate::{Error, Result};

/// Gateway-side handlers for backend push traffic.
pub struct PushService {
    players: Arc<PlayerRegistry>,
    channels: Arc<ChannelRegistry>,
    cookies: Arc<CookieSync>,
}

impl PushService {
    /// Assemble the push service over the shared registries.
    #[must_use]
    pub fn new(
        players: Arc<PlayerRegistry>,
        channels: Arc<ChannelRegistry>,
        cookies: Arc<CookieSync>,
    ) -> Self {
        Self {
            players,
            channels,
            cookies,
        }
    }

    /// Push to one player by guid.
    ///
    /// When a uid is supplied it must match the player's selected role,
    /// otherwise the message is dropped — the backend may be pushing to a
    /// role the player has since switched away from. A logout directive in
    /// the metadata releases the player instead of delivering. An empty
    /// message path means "update session state only, send nothing".
    pub async fn send(&self, meta: &Metadata, body: &[u8]) -> Result<()> {
        let guid = meta.get(keys::GUID).unwrap_or_default();
        let uid = meta.get(keys::UID).unwrap_or_default();
        let Some(player) = self.players.get(guid) else {
            debug!(guid, uid, "push target offline, message dropped");
            return Ok(());
        };
        if !uid.is_empty() {
            if let Some(current) = player.session.uid() {
                if current != uid {
                    debug!(guid, uid, current = %current, "push target uid mismatch, message dropped");
                    return Ok(());
                }
            }
        }
        if meta.contains(keys::PLAYER_LOGOUT) {
            self.players.delete(&player.session);
            return Ok(());
        }
        self.cookies.sync(meta, &player.session).await?;
        let path = meta.get(keys::MESSAGE_PATH).unwrap_or_default();
        if path.is_empty() {
            return Ok(());
        }
        deliver(&player.sender, meta, path, body);
        Ok(())
    }

    /// Push to a raw socket by id, before any identity is bound. Used by
    /// login flows that must talk to the socket ahead of `connect`.
    pub fn write(&self, meta: &Metadata, body: &[u8]) -> Result<()> {
        let id = meta
            .get(keys::SOCKET_ID)
            .ok_or_else(|| Error::Transport("socket id not found".into()))?;
        let path = meta.get(keys::MESSAGE_PATH).unwrap_or_default();
        let Ok(socket_id) = id.parse::<u64>() else {
            debug!(socket = id, path, "malformed socket id, message dropped");
            return Ok(());
        };
        let Some(sender) = self.players.socket_sender(socket_id) else {
            debug!(socket_id, path, "socket offline, message dropped");
            return Ok(());
        };
        if path.is_empty() {
            return Ok(());
        }
        deliver(&sender, meta, path, body);
        Ok(())
    }

    /// Push to every connected player, skipping the uids listed in the
    /// comma-separated ignore key.
    pub fn broadcast(&self, meta: &Metadata, body: &[u8]) {
        let path = match meta.get(keys::MESSAGE_PATH) {
            Some(path) if !path.is_empty() => path,
            _ => return,
        };
        let ignored: HashSet<&str> = meta
            .get(keys::MESSAGE_IGNORE)
            .map(|list| list.split(',').filter(|uid| !uid.is_empty()).collect())
            .unwrap_or_default();
        let payload = Bytes::copy_from_slice(body);
        self.players.range(|player| {
            if let Some(uid) = player.session.uid() {
                if ignored.contains(uid.as_str()) {
                    return true;
                }
            }
            let _ = player.sender.send(Outbound {
                request_id: 0,
                path: path.to_string(),
                body: payload.clone(),
            });
            true
        });
    }

    /// Push to every member of one channel room.
    pub fn channel_broadcast(&self, meta: &Metadata, body: &[u8]) -> Result<()> {
        let Some((name, value)) = self.channel_target(meta)? else {
            return Ok(());
        };
        let path = meta.get(keys::MESSAGE_PATH).unwrap_or_default();
        let Some(room) = self.channels.get(&name, &value) else {
            debug!(channel = name, value, path, "room not found, broadcast dropped");
            return Ok(());
        };
        room.broadcast(path, body);
        Ok(())
    }

    /// Tear a channel room down. When a message path is present the room is
    /// broadcast to one final time before removal.
    pub fn channel_delete(&self, meta: &Metadata, body: &[u8]) -> Result<()> {
        let Some((name, value)) = self.channel_target(meta)? else {
            return Ok(());
        };
        let Some(room) = self.channels.get(&name, &value) else {
            debug!(channel = name, value, "room not found, nothing to delete");
            return Ok(());
        };
        if let Some(path) = meta.get(keys::MESSAGE_PATH) {
            if !path.is_empty() {
                room.broadcast(path, body);
            }
        }
        self.channels.delete(&name, &value);
        Ok(())
    }

    fn channel_target(&self, meta: &Metadata) -> Result<Option<(String, String)>> {
        match meta.get(keys::MESSAGE_CHANNEL) {
            Some(encoded) if !encoded.is_empty() => channel::parse_name(encoded).map(Some),
            _ => {
                debug!("channel name missing, message dropped");
                Ok(None)
            }
        }
    }
}

fn deliver(sender: &PushSender, meta: &Metadata, path: &str, body: &[u8]) {
    let request_id = meta
        .get(keys::REQUEST_ID)
        .and_then(|rid| rid.parse::<i32>().ok())
        .unwrap_or(0);
    let _ = sender.send(Outbound {
        request_id,
        path: path.to_string(),
        body: Bytes::copy_from_slice(body),
    });
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use tokio::sync::mpsc;

    use super::*;
    use crate::session::{MemoryStore, Session, SessionStore};

    fn service() -> (PushService, Arc<PlayerRegistry>) {
        let players = Arc::new(PlayerRegistry::new());
        let channels = Arc::new(ChannelRegistry::new(Arc::clone(&players)));
        let sessions: Arc<dyn SessionStore> = Arc::new(MemoryStore::new());
        let cookies = Arc::new(CookieSync::new(Arc::clone(&channels), sessions));
        (
            PushService::new(Arc::clone(&players), channels, cookies),
            players,
        )
    }

    fn online(
        players: &PlayerRegistry,
        guid: &str,
        uid: &str,
        socket_id: u64,
    ) -> (Arc<Session>, mpsc::UnboundedReceiver<Outbound>) {
        let session = Arc::new(Session::new(
            guid,
            HashMap::from([(keys::UID.to_string(), uid.to_string())]),
        ));
        let (tx, rx) = mpsc::unbounded_channel();
        players.register_socket(socket_id, tx.clone());
        players.connect(Arc::clone(&session), socket_id, tx);
        (session, rx)
    }

    fn push_meta(entries: &[(&str, &str)]) -> Metadata {
        let mut meta = Metadata::new();
        for (k, v) in entries {
            meta.set(*k, *v);
        }
        meta
    }

    #[tokio::test]
    async fn send_delivers_to_the_bound_socket() {
        let (svc, players) = service();
        let (_session, mut rx) = online(&players, "g1", "u1", 1);
        let meta = push_meta(&[
            (keys::GUID, "g1"),
            (keys::MESSAGE_PATH, "/mail/new"),
            (keys::REQUEST_ID, "7"),
        ]);
        svc.send(&meta, b"you have mail").await.unwrap();
        let out = rx.try_recv().unwrap();
        assert_eq!(out.path, "/mail/new");
        assert_eq!(out.request_id, 7);
        assert_eq!(&out.body[..], b"you have mail");
    }

    #[tokio::test]
    async fn send_to_offline_guid_is_a_silent_drop() {
        let (svc, _players) = service();
        let meta = push_meta(&[(keys::GUID, "ghost"), (keys::MESSAGE_PATH, "/mail/new")]);
        assert!(svc.send(&meta, b"x").await.is_ok());
    }

    #[tokio::test]
    async fn send_with_stale_uid_is_dropped() {
        let (svc, players) = service();
        let (_session, mut rx) = online(&players, "g1", "u1", 1);
        let meta = push_meta(&[
            (keys::GUID, "g1"),
            (keys::UID, "u-old"),
            (keys::MESSAGE_PATH, "/mail/new"),
        ]);
        svc.send(&meta, b"x").await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_logout_directive_releases_the_player() {
        let (svc, players) = service();
        let (_session, mut rx) = online(&players, "g1", "u1", 1);
        let meta = push_meta(&[(keys::GUID, "g1"), (keys::PLAYER_LOGOUT, "1")]);
        svc.send(&meta, b"").await.unwrap();
        assert!(players.get("g1").is_none());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_with_empty_path_only_updates_state() {
        let (svc, players) = service();
        let (session, mut rx) = online(&players, "g1", "u1", 1);
        let meta = push_meta(&[(keys::GUID, "g1"), (keys::SERVER_ID, "s3")]);
        svc.send(&meta, b"").await.unwrap();
        assert_eq!(session.get(keys::SERVER_ID).as_deref(), Some("s3"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn write_reaches_a_socket_without_identity() {
        let (svc, players) = service();
        let (tx, mut rx) = mpsc::unbounded_channel();
        players.register_socket(42, tx);
        let meta = push_meta(&[(keys::SOCKET_ID, "42"), (keys::MESSAGE_PATH, "/login/step2")]);
        svc.write(&meta, b"challenge").unwrap();
        assert_eq!(rx.try_recv().unwrap().path, "/login/step2");
    }

    #[tokio::test]
    async fn write_without_socket_id_is_an_error() {
        let (svc, _players) = service();
        let meta = push_meta(&[(keys::MESSAGE_PATH, "/login/step2")]);
        assert!(svc.write(&meta, b"x").is_err());
    }

    #[tokio::test]
    async fn broadcast_skips_ignored_uids() {
        let (svc, players) = service();
        let (_s1, mut rx1) = online(&players, "g1", "u1", 1);
        let (_s2, mut rx2) = online(&players, "g2", "u2", 2);
        let meta = push_meta(&[
            (keys::MESSAGE_PATH, "/notice"),
            (keys::MESSAGE_IGNORE, "u2,u9"),
        ]);
        svc.broadcast(&meta, b"maintenance at noon");
        assert_eq!(rx1.try_recv().unwrap().path, "/notice");
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn channel_broadcast_reaches_members_only() {
        let (svc, players) = service();
        let (s1, mut rx1) = online(&players, "g1", "u1", 1);
        let (_s2, mut rx2) = online(&players, "g2", "u2", 2);
        svc.channels.join(&s1, "guild", "42");
        let meta = push_meta(&[
            (keys::MESSAGE_PATH, "/guild/chat"),
            (keys::MESSAGE_CHANNEL, &channel::encode_name("guild", "42")),
        ]);
        svc.channel_broadcast(&meta, b"hello guild").unwrap();
        assert_eq!(rx1.try_recv().unwrap().path, "/guild/chat");
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn channel_delete_broadcasts_farewell_then_removes() {
        let (svc, players) = service();
        let (s1, mut rx1) = online(&players, "g1", "u1", 1);
        svc.channels.join(&s1, "guild", "42");
        let meta = push_meta(&[
            (keys::MESSAGE_PATH, "/guild/disband"),
            (keys::MESSAGE_CHANNEL, &channel::encode_name("guild", "42")),
        ]);
        svc.channel_delete(&meta, b"disbanded").unwrap();
        assert_eq!(rx1.try_recv().unwrap().path, "/guild/disband");
        assert!(svc.channels.get("guild", "42").is_none());
    }

    #[tokio::test]
    async fn malformed_channel_name_is_an_error() {
        let (svc, _players) = service();
        let meta = push_meta(&[(keys::MESSAGE_CHANNEL, "not-json")]);
        assert!(svc.channel_broadcast(&meta, b"x").is_err());
    }
}
