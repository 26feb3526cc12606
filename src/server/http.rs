//! HTTP transport adapter.
//!
//! Every POST runs through the forwarder; a reply is always `200 OK` with
//! the reply body, errors included — transport status codes never carry
//! application failures. The login route is handled by the gateway itself
//! and hands the session credential back as a cookie, a header pair, and
//! the reply body. The WebSocket route upgrades into the framed adapter.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Router,
    extract::{ConnectInfo, Query, State, WebSocketUpgrade},
    http::{HeaderMap, StatusCode, Uri, header},
    response::{IntoResponse, Response},
    routing::{any, get},
};
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::Result;
use crate::context::Context;
use crate::metadata::{Metadata, keys};
use crate::players::Outbound;
use crate::server::tcp::REPLACED_PATH;
use crate::server::demux::ClientAddr;
use crate::server::{ServerState, ws};
use crate::session::{CREDENTIAL_NAME, Session};
use crate::token::Credentials;

/// Header pair mirroring the session cookie for clients that cannot read
/// `Set-Cookie` (some game engines' HTTP stacks).
const FORWARDED_KEY: &str = "x-forwarded-key";
const FORWARDED_VAL: &str = "x-forwarded-val";

/// Build the HTTP router over the shared gateway state.
pub(crate) fn router(state: Arc<ServerState>, websocket_enabled: bool) -> Router {
    let mut router = Router::new();
    if websocket_enabled {
        router = router.route(&format!("/{}", state.websocket_path), get(upgrade));
    }
    router = router
        .route(&format!("/{}", state.oauth_path), any(oauth))
        .fallback(any(forward));
    router
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn upgrade(
    State(state): State<Arc<ServerState>>,
    ConnectInfo(ClientAddr(addr)): ConnectInfo<ClientAddr>,
    Query(query): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    let credentials = ws::upgrade_credentials(&query);
    ws.on_upgrade(move |socket| ws::serve_connection(state, socket, addr, credentials))
}

async fn oauth(
    State(state): State<Arc<ServerState>>,
    ConnectInfo(ClientAddr(addr)): ConnectInfo<ClientAddr>,
    body: Bytes,
) -> Response {
    match oauth_login(&state, addr, &body).await {
        Ok(credential) => {
            let reply = json!({ "key": CREDENTIAL_NAME, "val": credential }).to_string();
            with_credential(reply.into(), Some(&credential))
        }
        Err(err) => {
            debug!(addr = %addr, error = %err, "login rejected");
            with_credential(crate::proxy::default_errorf(&err), None)
        }
    }
}

async fn oauth_login(state: &Arc<ServerState>, addr: SocketAddr, body: &[u8]) -> Result<String> {
    let creds: Credentials = serde_json::from_slice(body)?;
    let token = state.authenticator.verify(&creds)?;
    let seed = super::tcp::developer_seed(token.developer);
    let (session, credential) = state.sessions.create(&token.guid, seed).await?;
    displace_socket(state, &session, addr);
    Ok(credential)
}

/// A fresh HTTP login displaces any live socket holding the same identity.
fn displace_socket(state: &Arc<ServerState>, session: &Session, addr: SocketAddr) {
    if let Some(player) = state.players.get(session.guid()) {
        let _ = player.sender.send(Outbound {
            request_id: 0,
            path: REPLACED_PATH.to_string(),
            body: Bytes::from(addr.to_string()),
        });
        state.players.delete(session);
    }
}

async fn forward(
    State(state): State<Arc<ServerState>>,
    ConnectInfo(ClientAddr(addr)): ConnectInfo<ClientAddr>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = uri.path().to_string();
    let ctx = HttpContext {
        state: Arc::clone(&state),
        addr,
        query: query_pairs(&uri),
        credential: extract_credential(&headers, &uri),
        body,
        issued: Mutex::new(None),
    };
    match state.forwarder.forward(&ctx, &path).await {
        Ok(reply) => {
            let issued = ctx.issued.lock().clone();
            with_credential(reply, issued.as_deref())
        }
        // Only reachable without an error formatter configured.
        Err(err) => with_credential(crate::proxy::default_errorf(&err), None),
    }
}

fn with_credential(body: Bytes, credential: Option<&str>) -> Response {
    let mut response = (StatusCode::OK, body).into_response();
    if let Some(credential) = credential {
        let cookie = format!("{CREDENTIAL_NAME}={credential}; Path=/");
        let headers = response.headers_mut();
        if let Ok(value) = cookie.parse() {
            headers.insert(header::SET_COOKIE, value);
        }
        if let (Ok(key), Ok(val)) = (CREDENTIAL_NAME.parse(), credential.parse()) {
            headers.insert(FORWARDED_KEY, key);
            headers.insert(FORWARDED_VAL, val);
        }
    }
    response
}

fn query_pairs(uri: &Uri) -> Vec<(String, String)> {
    let Some(query) = uri.query() else {
        return Vec::new();
    };
    url::form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

/// Session credential lookup order: cookie, query, header.
fn extract_credential(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    if let Some(cookies) = headers.get(header::COOKIE).and_then(|v| v.to_str().ok()) {
        for pair in cookies.split(';') {
            if let Some((name, value)) = pair.trim().split_once('=') {
                if name == CREDENTIAL_NAME && !value.is_empty() {
                    return Some(value.to_string());
                }
            }
        }
    }
    if let Some(query) = uri.query() {
        for (name, value) in url::form_urlencoded::parse(query.as_bytes()) {
            if name == CREDENTIAL_NAME && !value.is_empty() {
                return Some(value.into_owned());
            }
        }
    }
    headers
        .get(CREDENTIAL_NAME)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// [`Context`] implementation for one HTTP request.
struct HttpContext {
    state: Arc<ServerState>,
    addr: SocketAddr,
    query: Vec<(String, String)>,
    credential: Option<String>,
    body: Bytes,
    /// Credential created by a login directive, surfaced as a cookie.
    issued: Mutex<Option<String>>,
}

/// Request metadata for one HTTP call. Authenticated requests carry the
/// session cookie pair to the backend, which echoes the token in the
/// reply body for clients whose HTTP stacks cannot read cookies.
fn request_metadata(query: &[(String, String)], credential: Option<&str>) -> Metadata {
    let mut meta = Metadata::new();
    for (key, value) in query {
        meta.set(key.clone(), value.clone());
    }
    if let Some(credential) = credential {
        let pair = json!({ "name": CREDENTIAL_NAME, "value": credential });
        meta.set(keys::COOKIE, pair.to_string());
    }
    meta
}

#[async_trait]
impl Context for HttpContext {
    fn metadata(&self) -> Metadata {
        request_metadata(&self.query, self.credential.as_deref())
    }

    fn buffer(&self) -> Result<Bytes> {
        Ok(self.body.clone())
    }

    fn remote_addr(&self) -> String {
        self.addr.ip().to_string()
    }

    async fn login(&self, guid: &str, values: HashMap<String, String>) -> Result<String> {
        let (session, credential) = self.state.sessions.create(guid, values).await?;
        displace_socket(&self.state, &session, self.addr);
        *self.issued.lock() = Some(credential.clone());
        Ok(credential)
    }

    async fn logout(&self) -> Result<()> {
        if let Some(session) = self.verify().await? {
            self.state.sessions.delete(&session).await?;
        }
        Ok(())
    }

    async fn verify(&self) -> Result<Option<Arc<Session>>> {
        let credential = match (self.issued.lock().clone(), &self.credential) {
            (Some(issued), _) => issued,
            (None, Some(credential)) => credential.clone(),
            (None, None) => return Ok(None),
        };
        self.state.sessions.verify(&credential).await
    }
}
