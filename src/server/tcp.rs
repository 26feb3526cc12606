//! Framed-TCP transport adapter.
//!
//! Each connection gets a numeric socket id, an outbound delivery queue,
//! and at most one bound session. Built-in routes (`ping`, the login route,
//! `reconnect`) are answered by the adapter itself; everything else goes
//! through the forwarder.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tracing::{debug, warn};

use crate::context::Context;
use crate::metadata::{Metadata, keys};
use crate::players::{Outbound, PushSender};
use crate::server::ServerState;
use crate::server::frame::{FLAG_BROADCAST, Frame, FrameCodec};
use crate::session::{CREDENTIAL_NAME, Session};
use crate::token::Credentials;
use crate::{Error, Result};

/// Push path announcing that another login took the identity over.
pub const REPLACED_PATH: &str = "replaced";

static NEXT_SOCKET_ID: AtomicU64 = AtomicU64::new(1);

fn next_socket_id() -> u64 {
    NEXT_SOCKET_ID.fetch_add(1, Ordering::Relaxed)
}

/// One live framed connection.
pub(crate) struct SocketConn {
    pub id: u64,
    pub addr: SocketAddr,
    pub session: RwLock<Option<Arc<Session>>>,
    pub sender: PushSender,
}

impl SocketConn {
    fn bound_guid(&self) -> Option<String> {
        self.session.read().as_ref().map(|s| s.guid().to_string())
    }
}

/// Drive one framed connection to completion.
pub(crate) async fn serve_connection(state: Arc<ServerState>, stream: TcpStream, addr: SocketAddr) {
    let (sender, mut outbound) = mpsc::unbounded_channel::<Outbound>();
    let conn = Arc::new(SocketConn {
        id: next_socket_id(),
        addr,
        session: RwLock::new(None),
        sender,
    });
    state.players.register_socket(conn.id, conn.sender.clone());
    debug!(socket_id = conn.id, addr = %addr, "socket connected");

    let mut framed = Framed::new(stream, FrameCodec::new());
    loop {
        tokio::select! {
            () = state.cancel.cancelled() => break,
            message = outbound.recv() => {
                let Some(out) = message else { break };
                let frame = Frame {
                    flag: if out.request_id == 0 { FLAG_BROADCAST } else { 0 },
                    request_id: out.request_id,
                    path: out.path,
                    body: out.body,
                };
                if let Err(err) = framed.send(frame).await {
                    debug!(socket_id = conn.id, error = %err, "outbound send failed");
                    break;
                }
            }
            frame = framed.next() => {
                let frame = match frame {
                    Some(Ok(frame)) => frame,
                    Some(Err(err)) => {
                        warn!(socket_id = conn.id, error = %err, "bad frame, closing");
                        break;
                    }
                    None => break,
                };
                let reply = handle_frame(&state, &conn, frame).await;
                if framed.send(reply).await.is_err() {
                    break;
                }
            }
        }
    }

    state.players.unregister_socket(conn.id);
    if let Some(guid) = conn.bound_guid() {
        state.players.disconnect(&guid, conn.id);
    }
    debug!(socket_id = conn.id, "socket disconnected");
}

/// Handle one inbound frame and produce the correlated reply.
pub(crate) async fn handle_frame(
    state: &Arc<ServerState>,
    conn: &Arc<SocketConn>,
    frame: Frame,
) -> Frame {
    let (route, _query) = split_query(&frame.path);
    let trimmed = route.trim_start_matches('/');

    let outcome = if trimmed == "ping" {
        Ok(Bytes::from(chrono::Utc::now().timestamp_millis().to_string()))
    } else if trimmed == state.oauth_path {
        login(state, conn, &frame).await
    } else if trimmed == "reconnect" {
        reconnect(state, conn, &frame)
            .await
            .map(|()| Bytes::from_static(b"true"))
    } else {
        let ctx = SocketContext {
            state: Arc::clone(state),
            conn: Arc::clone(conn),
            frame: frame.clone(),
        };
        state.forwarder.forward(&ctx, route).await
    };

    let body = outcome.unwrap_or_else(|err| {
        debug!(socket_id = conn.id, path = route, error = %err, "request failed");
        crate::proxy::default_errorf(&err)
    });
    Frame::reply(frame.request_id, route, body)
}

async fn login(state: &Arc<ServerState>, conn: &Arc<SocketConn>, frame: &Frame) -> Result<Bytes> {
    let creds: Credentials = serde_json::from_slice(&frame.body)?;
    let token = state.authenticator.verify(&creds)?;
    let seed = developer_seed(token.developer);
    let credential = bind(state, conn, &token.guid, seed).await?;
    let reply = json!({ "key": CREDENTIAL_NAME, "val": credential });
    Ok(Bytes::from(reply.to_string()))
}

async fn reconnect(
    state: &Arc<ServerState>,
    conn: &Arc<SocketConn>,
    frame: &Frame,
) -> Result<()> {
    let credential = std::str::from_utf8(&frame.body)
        .map_err(|_| Error::Transport("credential is not utf-8".into()))?;
    if credential.is_empty() {
        return Err(Error::SessionEmpty);
    }
    let session = state
        .players
        .reconnect(state.sessions.as_ref(), credential, conn.id, conn.sender.clone())
        .await?;
    *conn.session.write() = Some(session);
    Ok(())
}

/// Bind a verified identity to this connection, displacing any prior
/// socket holding the same guid.
pub(crate) async fn bind(
    state: &Arc<ServerState>,
    conn: &Arc<SocketConn>,
    guid: &str,
    values: HashMap<String, String>,
) -> Result<String> {
    let (session, credential) = state.sessions.create(guid, values).await?;
    if let Some(replaced) = state
        .players
        .connect(Arc::clone(&session), conn.id, conn.sender.clone())
    {
        if replaced.socket_id != conn.id {
            let _ = replaced.sender.send(Outbound {
                request_id: 0,
                path: REPLACED_PATH.to_string(),
                body: Bytes::from(conn.addr.to_string()),
            });
        }
    }
    *conn.session.write() = Some(session);
    Ok(credential)
}

/// Seed values for a fresh session.
pub(crate) fn developer_seed(developer: bool) -> HashMap<String, String> {
    let dev = if developer { "1" } else { "" };
    HashMap::from([(keys::DEVELOPER.to_string(), dev.to_string())])
}

fn split_query(path: &str) -> (&str, Option<&str>) {
    match path.split_once('?') {
        Some((route, query)) => (route, Some(query)),
        None => (path, None),
    }
}

/// [`Context`] implementation for one frame on one socket.
pub(crate) struct SocketContext {
    state: Arc<ServerState>,
    conn: Arc<SocketConn>,
    frame: Frame,
}

#[async_trait]
impl Context for SocketContext {
    fn metadata(&self) -> Metadata {
        let mut meta = Metadata::new();
        if let (_, Some(query)) = split_query(&self.frame.path) {
            for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
                meta.set(key.into_owned(), value.into_owned());
            }
        }
        meta.set(keys::REQUEST_ID, self.frame.request_id.to_string());
        meta
    }

    fn buffer(&self) -> Result<Bytes> {
        Ok(self.frame.body.clone())
    }

    fn remote_addr(&self) -> String {
        self.conn.addr.ip().to_string()
    }

    fn socket_id(&self) -> Option<u64> {
        Some(self.conn.id)
    }

    async fn login(&self, guid: &str, values: HashMap<String, String>) -> Result<String> {
        if let Some(current) = self.conn.bound_guid() {
            if current != guid {
                return Err(Error::Credential("already logged in".into()));
            }
        }
        bind(&self.state, &self.conn, guid, values).await
    }

    async fn logout(&self) -> Result<()> {
        let session = self.conn.session.write().take();
        if let Some(session) = session {
            self.state.sessions.delete(&session).await?;
        }
        Ok(())
    }

    async fn verify(&self) -> Result<Option<Arc<Session>>> {
        Ok(self.conn.session.read().clone())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::access::AccessDispatcher;
    use crate::authorize::Authorizer;
    use crate::backend::NullClient;
    use crate::channel::ChannelRegistry;
    use crate::config::Config;
    use crate::cookies::CookieSync;
    use crate::players::PlayerRegistry;
    use crate::proxy::{Forwarder, ProxyOptions};
    use crate::server::ServerState;
    use crate::session::{MemoryStore, SessionStore};
    use crate::token::TokenAuthenticator;

    fn state() -> Arc<ServerState> {
        let players = Arc::new(PlayerRegistry::new());
        let channels = Arc::new(ChannelRegistry::new(Arc::clone(&players)));
        let sessions: Arc<dyn SessionStore> = Arc::new(MemoryStore::new());
        let cookies = Arc::new(CookieSync::new(channels, Arc::clone(&sessions)));
        let access = Arc::new(AccessDispatcher::with_defaults(Arc::new(Authorizer::new())));
        let forwarder = Arc::new(Forwarder::new(
            ProxyOptions::default(),
            access,
            Arc::new(NullClient),
            Arc::clone(&players),
            cookies,
        ));
        Arc::new(ServerState {
            forwarder,
            authenticator: Arc::new(TokenAuthenticator::from_config(&Config::default())),
            sessions,
            players,
            oauth_path: "oauth".to_string(),
            websocket_path: "ws".to_string(),
            cancel: CancellationToken::new(),
        })
    }

    fn conn(id: u64) -> (Arc<SocketConn>, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Arc::new(SocketConn {
            id,
            addr: "127.0.0.1:4000".parse().expect("socket addr"),
            session: RwLock::new(None),
            sender: tx,
        });
        (conn, rx)
    }

    #[tokio::test]
    async fn logout_unbinds_and_deletes_the_stored_session() {
        let state = state();
        let (conn, _rx) = conn(1);
        let credential = bind(&state, &conn, "acct-1", HashMap::new()).await.unwrap();
        assert!(state.sessions.verify(&credential).await.unwrap().is_some());

        let ctx = SocketContext {
            state: Arc::clone(&state),
            conn: Arc::clone(&conn),
            frame: Frame::reply(1, "/game/quit", Bytes::new()),
        };
        ctx.logout().await.unwrap();
        assert!(conn.session.read().is_none());
        assert!(state.sessions.verify(&credential).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn second_login_notifies_the_replaced_socket() {
        let state = state();
        let (first, mut first_rx) = conn(1);
        bind(&state, &first, "acct-1", HashMap::new()).await.unwrap();
        let (second, _rx) = conn(2);
        bind(&state, &second, "acct-1", HashMap::new()).await.unwrap();

        let notice = first_rx.try_recv().unwrap();
        assert_eq!(notice.path, REPLACED_PATH);
    }
}
