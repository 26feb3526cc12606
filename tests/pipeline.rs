//! End-to-end pipeline tests
//!
//! Drives the forwarder through a scripted backend and a connection-like
//! context: anonymous traffic, backend-directed login, role selection,
//! sticky routing, developer elevation, and push delivery.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use gamegate::access::AccessDispatcher;
use gamegate::authorize::{AuthLevel, Authorizer};
use gamegate::backend::RpcClient;
use gamegate::channel::ChannelRegistry;
use gamegate::context::Context;
use gamegate::cookies::CookieSync;
use gamegate::metadata::{Metadata, keys, selector_key};
use gamegate::players::{Outbound, PlayerRegistry};
use gamegate::proxy::{Forwarder, ProxyOptions};
use gamegate::push::PushService;
use gamegate::session::{MemoryStore, Session, SessionStore};
use gamegate::{Error, Result};

/// Scripted backend: each call pops the next `(reply, response metadata)`.
struct ScriptedBackend {
    script: Mutex<Vec<(Bytes, Vec<(String, String)>)>>,
    requests: Mutex<Vec<(String, String, Metadata)>>,
}

impl ScriptedBackend {
    fn new(script: Vec<(&'static [u8], Vec<(&str, &str)>)>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(
                script
                    .into_iter()
                    .rev()
                    .map(|(reply, res)| {
                        (
                            Bytes::from_static(reply),
                            res.into_iter()
                                .map(|(k, v)| (k.to_string(), v.to_string()))
                                .collect(),
                        )
                    })
                    .collect(),
            ),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn request(&self, index: usize) -> (String, String, Metadata) {
        self.requests.lock()[index].clone()
    }
}

#[async_trait]
impl RpcClient for ScriptedBackend {
    async fn call(
        &self,
        req: &Metadata,
        res: &mut Metadata,
        service_path: &str,
        service_method: &str,
        _body: &[u8],
    ) -> Result<Bytes> {
        self.requests.lock().push((
            service_path.to_string(),
            service_method.to_string(),
            req.clone(),
        ));
        let (reply, entries) = self
            .script
            .lock()
            .pop()
            .ok_or_else(|| Error::Backend("script exhausted".into()))?;
        for (k, v) in entries {
            res.set(k, v);
        }
        Ok(reply)
    }
}

/// Connection-like context: the bound session persists across requests,
/// the way a socket adapter keeps it for the connection's lifetime.
struct Conn {
    sessions: Arc<MemoryStore>,
    session: Mutex<Option<Arc<Session>>>,
    body: Mutex<Bytes>,
}

impl Conn {
    fn new(sessions: Arc<MemoryStore>) -> Self {
        Self {
            sessions,
            session: Mutex::new(None),
            body: Mutex::new(Bytes::new()),
        }
    }

    fn session(&self) -> Option<Arc<Session>> {
        self.session.lock().clone()
    }
}

#[async_trait]
impl Context for Conn {
    fn metadata(&self) -> Metadata {
        Metadata::new()
    }

    fn buffer(&self) -> Result<Bytes> {
        Ok(self.body.lock().clone())
    }

    fn remote_addr(&self) -> String {
        "203.0.113.7".to_string()
    }

    async fn login(&self, guid: &str, values: HashMap<String, String>) -> Result<String> {
        let (session, credential) = self.sessions.create(guid, values).await?;
        *self.session.lock() = Some(session);
        Ok(credential)
    }

    async fn logout(&self) -> Result<()> {
        let session = self.session.lock().take();
        if let Some(session) = session {
            self.sessions.delete(&session).await?;
        }
        Ok(())
    }

    async fn verify(&self) -> Result<Option<Arc<Session>>> {
        Ok(self.session())
    }
}

struct World {
    forwarder: Forwarder,
    sessions: Arc<MemoryStore>,
    players: Arc<PlayerRegistry>,
    channels: Arc<ChannelRegistry>,
    cookies: Arc<CookieSync>,
}

fn world(backend: Arc<ScriptedBackend>) -> World {
    let authorizer = Arc::new(Authorizer::new());
    authorizer.set("passport", "/login", AuthLevel::OAuth);
    authorizer.set("passport", "/select", AuthLevel::OAuth);
    authorizer.set_prefix("open", "", AuthLevel::None);
    authorizer.set_prefix("admin", "", AuthLevel::Player);
    authorizer.require_elevated("admin", "");
    let access = Arc::new(AccessDispatcher::with_defaults(authorizer));

    let players = Arc::new(PlayerRegistry::new());
    let channels = Arc::new(ChannelRegistry::new(Arc::clone(&players)));
    let sessions = Arc::new(MemoryStore::new());
    let cookies = Arc::new(CookieSync::new(
        Arc::clone(&channels),
        Arc::clone(&sessions) as Arc<dyn SessionStore>,
    ));
    let options = ProxyOptions {
        gateway_addr: "gate-1:80".to_string(),
        ..ProxyOptions::default()
    };
    let forwarder = Forwarder::new(
        options,
        access,
        backend,
        Arc::clone(&players),
        Arc::clone(&cookies),
    );
    World {
        forwarder,
        sessions,
        players,
        channels,
        cookies,
    }
}

fn error_code(reply: &[u8]) -> i64 {
    let body: serde_json::Value = serde_json::from_slice(reply).unwrap();
    body["code"].as_i64().unwrap()
}

#[tokio::test]
async fn anonymous_traffic_is_rejected_before_the_backend() {
    let backend = ScriptedBackend::new(vec![]);
    let w = world(Arc::clone(&backend));
    let conn = Conn::new(Arc::clone(&w.sessions));

    let reply = w.forwarder.forward(&conn, "/game/attack").await.unwrap();
    assert_eq!(error_code(&reply), 501);
    assert!(backend.requests.lock().is_empty());
}

#[tokio::test]
async fn open_endpoints_pass_with_client_ip_stamped() {
    let backend = ScriptedBackend::new(vec![(b"pong", vec![])]);
    let w = world(Arc::clone(&backend));
    let conn = Conn::new(Arc::clone(&w.sessions));

    let reply = w.forwarder.forward(&conn, "/open/time").await.unwrap();
    assert_eq!(&reply[..], b"pong");
    let (service, _, req) = backend.request(0);
    assert_eq!(service, "open");
    assert_eq!(req.get(keys::CLIENT_IP), Some("203.0.113.7"));
    assert_eq!(req.get(keys::GATEWAY), Some("gate-1:80"));
    assert_eq!(req.get(keys::PERMISSION), Some("0"));
}

#[tokio::test]
async fn backend_login_directive_then_role_selection_then_play() {
    let backend = ScriptedBackend::new(vec![
        // 1: open login endpoint replies with a login directive
        (
            b"logged-in",
            vec![(keys::PLAYER_LOGIN, "acct-7"), (keys::DEVELOPER, "")],
        ),
        // 2: select a role, synced through the cookie allow-list
        (b"selected", vec![(keys::UID, "hero-1")]),
        // 3: a player-level call now passes
        (b"hit", vec![]),
    ]);
    let w = world(Arc::clone(&backend));
    let conn = Conn::new(Arc::clone(&w.sessions));

    let reply = w.forwarder.forward(&conn, "/open/login").await.unwrap();
    assert_eq!(&reply[..], b"logged-in");
    let session = conn.session().unwrap();
    assert_eq!(session.guid(), "acct-7");

    // Player-level still blocked: no role selected yet.
    let reply = w.forwarder.forward(&conn, "/game/attack").await.unwrap();
    assert_eq!(error_code(&reply), 502);

    let reply = w.forwarder.forward(&conn, "/passport/select").await.unwrap();
    assert_eq!(&reply[..], b"selected");
    assert_eq!(session.uid().as_deref(), Some("hero-1"));

    let reply = w.forwarder.forward(&conn, "/game/attack").await.unwrap();
    assert_eq!(&reply[..], b"hit");
    let (_, _, req) = backend.request(2);
    assert_eq!(req.get(keys::UID), Some("hero-1"));
    assert_eq!(req.get(keys::GUID), Some("acct-7"));
    assert_eq!(req.get(keys::PERMISSION), Some("3"));
}

#[tokio::test]
async fn selector_cookie_establishes_sticky_routing() {
    let backend = ScriptedBackend::new(vec![
        (
            b"ok",
            vec![
                (keys::UID, "hero-1"),
                ("player.selector.game", "10.0.0.9:9100"),
            ],
        ),
        (b"ok", vec![]),
    ]);
    let w = world(Arc::clone(&backend));
    let conn = Conn::new(Arc::clone(&w.sessions));
    conn.login("acct-1", HashMap::new()).await.unwrap();

    w.forwarder.forward(&conn, "/passport/select").await.unwrap();
    let session = conn.session().unwrap();
    assert_eq!(
        session.get(&selector_key("game")).as_deref(),
        Some("10.0.0.9:9100")
    );

    w.forwarder.forward(&conn, "/game/attack").await.unwrap();
    let (_, _, req) = backend.request(1);
    assert_eq!(req.get(keys::ADDRESS), Some("10.0.0.9:9100"));
}

#[tokio::test]
async fn elevated_endpoints_require_a_developer_session() {
    let backend = ScriptedBackend::new(vec![(b"done", vec![])]);
    let w = world(Arc::clone(&backend));

    let conn = Conn::new(Arc::clone(&w.sessions));
    conn.login(
        "acct-1",
        HashMap::from([(keys::UID.to_string(), "hero-1".to_string())]),
    )
    .await
    .unwrap();
    let reply = w.forwarder.forward(&conn, "/admin/reload").await.unwrap();
    assert_eq!(error_code(&reply), 503);

    let dev = Conn::new(Arc::clone(&w.sessions));
    dev.login(
        "acct-dev",
        HashMap::from([
            (keys::UID.to_string(), "gm-1".to_string()),
            (keys::DEVELOPER.to_string(), "1".to_string()),
        ]),
    )
    .await
    .unwrap();
    let reply = w.forwarder.forward(&dev, "/admin/reload").await.unwrap();
    assert_eq!(&reply[..], b"done");
}

#[tokio::test]
async fn logout_directive_tears_the_connection_binding_down() {
    let backend = ScriptedBackend::new(vec![(b"bye", vec![(keys::PLAYER_LOGOUT, "1")])]);
    let w = world(backend);
    let conn = Conn::new(Arc::clone(&w.sessions));
    conn.login(
        "acct-1",
        HashMap::from([(keys::UID.to_string(), "hero-1".to_string())]),
    )
    .await
    .unwrap();
    let session = conn.session().unwrap();
    let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
    w.players.connect(Arc::clone(&session), 5, tx);

    let reply = w.forwarder.forward(&conn, "/game/quit").await.unwrap();
    assert_eq!(&reply[..], b"bye");
    assert!(conn.session().is_none());
    assert!(w.players.is_empty());
}

#[tokio::test]
async fn channel_join_cookie_then_push_broadcast() {
    let backend = ScriptedBackend::new(vec![(
        b"joined",
        vec![(keys::UID, "hero-1"), ("player.join.guild", "g-42")],
    )]);
    let w = world(backend);
    let conn = Conn::new(Arc::clone(&w.sessions));
    conn.login("acct-1", HashMap::new()).await.unwrap();
    let session = conn.session().unwrap();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Outbound>();
    w.players.connect(Arc::clone(&session), 5, tx);

    w.forwarder.forward(&conn, "/passport/select").await.unwrap();
    assert!(w.channels.get("guild", "g-42").is_some());

    let push = PushService::new(
        Arc::clone(&w.players),
        Arc::clone(&w.channels),
        Arc::clone(&w.cookies),
    );
    let mut meta = Metadata::new();
    meta.set(keys::MESSAGE_PATH, "/guild/chat");
    meta.set(
        keys::MESSAGE_CHANNEL,
        gamegate::channel::encode_name("guild", "g-42"),
    );
    push.channel_broadcast(&meta, b"welcome").unwrap();
    let out = rx.try_recv().unwrap();
    assert_eq!(out.path, "/guild/chat");
    assert_eq!(&out.body[..], b"welcome");
}
