//! WebSocket transport adapter.
//!
//! A WebSocket connection behaves exactly like a framed TCP socket: each
//! binary message carries one wire frame, the connection gets a socket id
//! and an outbound queue, and frames run through the same handler. Login
//! may additionally happen during the upgrade, via query parameters.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::metadata::keys;
use crate::players::Outbound;
use crate::server::ServerState;
use crate::server::frame::{FLAG_BROADCAST, Frame};
use crate::server::tcp::{self, SocketConn};
use crate::token::Credentials;

static NEXT_WS_ID: AtomicU64 = AtomicU64::new(1 << 32);

/// Credentials carried in the upgrade request's query string, if any.
#[must_use]
pub fn upgrade_credentials(query: &HashMap<String, String>) -> Option<Credentials> {
    let access = query.get("access").cloned().unwrap_or_default();
    let guid = query.get(keys::GUID).cloned().unwrap_or_default();
    if access.is_empty() && guid.is_empty() {
        return None;
    }
    Some(Credentials {
        guid,
        access,
        secret: query.get("secret").cloned().unwrap_or_default(),
    })
}

/// Drive one upgraded WebSocket connection to completion.
pub(crate) async fn serve_connection(
    state: Arc<ServerState>,
    socket: WebSocket,
    addr: SocketAddr,
    credentials: Option<Credentials>,
) {
    let (sender, mut outbound) = mpsc::unbounded_channel::<Outbound>();
    let conn = Arc::new(SocketConn {
        id: NEXT_WS_ID.fetch_add(1, Ordering::Relaxed),
        addr,
        session: RwLock::new(None),
        sender,
    });
    state.players.register_socket(conn.id, conn.sender.clone());
    debug!(socket_id = conn.id, addr = %addr, "websocket connected");

    // Upgrade-time login: verified before any frame is accepted.
    if let Some(creds) = credentials {
        match state.authenticator.verify(&creds) {
            Ok(token) => {
                let seed = tcp::developer_seed(token.developer);
                if let Err(err) = tcp::bind(&state, &conn, &token.guid, seed).await {
                    warn!(socket_id = conn.id, error = %err, "websocket login failed");
                }
            }
            Err(err) => {
                warn!(socket_id = conn.id, error = %err, "websocket credentials rejected");
            }
        }
    }

    let (mut sink, mut stream) = socket.split();
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
                let Ok(encoded) = frame.encode() else { break };
                if sink.send(Message::Binary(encoded)).await.is_err() {
                    break;
                }
            }
            message = stream.next() => {
                let frame = match message {
                    Some(Ok(Message::Binary(buf))) => match Frame::decode(&buf) {
                        Ok(frame) => frame,
                        Err(err) => {
                            warn!(socket_id = conn.id, error = %err, "bad frame, closing");
                            break;
                        }
                    },
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Text(_))) => {
                        warn!(socket_id = conn.id, "text message on binary channel, closing");
                        break;
                    }
                    Some(Err(err)) => {
                        debug!(socket_id = conn.id, error = %err, "websocket error");
                        break;
                    }
                };
                let reply = tcp::handle_frame(&state, &conn, frame).await;
                let Ok(encoded) = reply.encode() else { break };
                if sink.send(Message::Binary(encoded)).await.is_err() {
                    break;
                }
            }
        }
    }

    state.players.unregister_socket(conn.id);
    if let Some(session) = conn.session.read().clone() {
        state.players.disconnect(session.guid(), conn.id);
    }
    debug!(socket_id = conn.id, "websocket disconnected");
}
