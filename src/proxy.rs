//! The forwarding pipeline.
//!
//! One inbound request becomes one backend RPC call. The forwarder routes
//! the path, authorizes the caller, stamps gateway and sticky-routing
//! metadata, invokes the backend, and interprets the reply's metadata for
//! session side effects (login/logout directives, cookie synchronization).
//!
//! Every failure — including recovered panics — funnels through a single
//! boundary at the public entry point and, when an error formatter is
//! configured, comes back to the transport as a well-formed reply body.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::FutureExt;
use serde_json::json;
use tracing::{debug, warn};

use crate::access::AccessDispatcher;
use crate::authorize::join_path;
use crate::backend::RpcClient;
use crate::context::Context;
use crate::cookies::CookieSync;
use crate::metadata::{Metadata, keys, response_type, selector_key};
use crate::players::PlayerRegistry;
use crate::session::Session;
use crate::{Error, Result};

/// Splits a request path into `(service_path, service_method)`.
pub type RouterFn = Arc<dyn Fn(&str, &Metadata) -> Result<(String, String)> + Send + Sync>;

/// Pre-forward body transform (e.g. payload decryption).
pub type RequestHook =
    Arc<dyn Fn(Option<&Arc<Session>>, &str, &Metadata, Bytes) -> Result<Bytes> + Send + Sync>;

/// Post-forward reply transform; may also annotate response metadata.
pub type ResponseHook =
    Arc<dyn Fn(Option<&Arc<Session>>, &str, &mut Metadata, Bytes) -> Result<Bytes> + Send + Sync>;

/// Converts a pipeline error into reply bytes.
pub type ErrorFormatter = Arc<dyn Fn(&Error) -> Bytes + Send + Sync>;

/// Pluggable strategies and tunables for the forwarder.
#[derive(Clone)]
pub struct ProxyOptions {
    /// Path-to-endpoint routing rule.
    pub router: RouterFn,
    /// Pre-forward body transform.
    pub request: RequestHook,
    /// Post-forward reply transform.
    pub response: ResponseHook,
    /// Error-to-reply formatter; `None` propagates errors to the adapter.
    pub errorf: Option<ErrorFormatter>,
    /// Route prefix prepended to the service method.
    pub prefix: Option<String>,
    /// Externally reachable address of this gateway instance.
    pub gateway_addr: String,
    /// Upstream calls slower than this are logged as operational warnings.
    pub slow_threshold: Duration,
}

impl Default for ProxyOptions {
    fn default() -> Self {
        Self {
            router: Arc::new(default_router),
            request: Arc::new(|_, _, _, body| Ok(body)),
            response: Arc::new(default_response),
            errorf: Some(Arc::new(default_errorf)),
            prefix: None,
            gateway_addr: String::new(),
            slow_threshold: Duration::from_millis(500),
        }
    }
}

/// Default routing rule: `/<service>/<method...>`, method keeps its
/// remaining segments.
pub fn default_router(path: &str, _req: &Metadata) -> Result<(String, String)> {
    let trimmed = path.trim_start_matches('/');
    match trimmed.split_once('/') {
        Some((service, method)) if !service.is_empty() && !method.is_empty() => {
            Ok((service.to_string(), method.to_string()))
        }
        _ => Err(Error::NotFound(path.to_string())),
    }
}

/// Default response hook: push-acknowledged replies carry a negated
/// per-session counter so the client can order them against requests.
pub fn default_response(
    session: Option<&Arc<Session>>,
    _path: &str,
    res: &mut Metadata,
    reply: Bytes,
) -> Result<Bytes> {
    if res.get(keys::RESPONSE_TYPE) == Some(response_type::RECEIVED) {
        if let Some(session) = session {
            res.set(keys::REQUEST_ID, (-session.next_push_id()).to_string());
        }
    }
    Ok(reply)
}

/// Default error formatter: `{"code": n, "message": s}` JSON bytes.
#[must_use]
pub fn default_errorf(err: &Error) -> Bytes {
    let body = json!({ "code": err.code(), "message": err.to_string() });
    Bytes::from(body.to_string())
}

/// The request forwarder. Stateless and re-entrant: any number of requests
/// may run through one instance concurrently.
pub struct Forwarder {
    options: ProxyOptions,
    access: Arc<AccessDispatcher>,
    backend: Arc<dyn RpcClient>,
    players: Arc<PlayerRegistry>,
    cookies: Arc<CookieSync>,
}

impl Forwarder {
    /// Assemble a forwarder.
    #[must_use]
    pub fn new(
        options: ProxyOptions,
        access: Arc<AccessDispatcher>,
        backend: Arc<dyn RpcClient>,
        players: Arc<PlayerRegistry>,
        cookies: Arc<CookieSync>,
    ) -> Self {
        Self {
            options,
            access,
            backend,
            players,
            cookies,
        }
    }

    /// The access dispatcher backing this forwarder.
    #[must_use]
    pub fn access(&self) -> &Arc<AccessDispatcher> {
        &self.access
    }

    /// The cookie synchronizer backing this forwarder.
    #[must_use]
    pub fn cookies(&self) -> &Arc<CookieSync> {
        &self.cookies
    }

    /// Forward one request. The single failure boundary: panics inside the
    /// pipeline become internal errors, and any error is converted into
    /// reply bytes when an error formatter is configured — transports always
    /// receive a body.
    pub async fn forward(&self, ctx: &dyn Context, path: &str) -> Result<Bytes> {
        let outcome = std::panic::AssertUnwindSafe(self.dispatch(ctx, path))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(Error::Internal(panic_message(&*panic))));
        match outcome {
            Ok(reply) => Ok(reply),
            Err(err) => match &self.options.errorf {
                Some(errorf) => {
                    debug!(path = %path, error = %err, "request failed, formatting reply");
                    Ok(errorf(&err))
                }
                None => Err(err),
            },
        }
    }

    async fn dispatch(&self, ctx: &dyn Context, path: &str) -> Result<Bytes> {
        let mut req = ctx.metadata();
        let mut res = Metadata::new();

        let (service_path, service_method) = (self.options.router)(path, &req)?;

        let session = self
            .access
            .verify(ctx, &mut req, &service_path, &service_method)
            .await?;

        if !self.options.gateway_addr.is_empty() {
            req.stamp(keys::GATEWAY, self.options.gateway_addr.clone());
        }
        // Session affinity: steer the call to the backend instance that
        // previously claimed this (user, service) pair.
        if let Some(session) = &session {
            if let Some(address) = session.get(&selector_key(&service_path)) {
                if !address.is_empty() {
                    req.stamp(keys::ADDRESS, address);
                }
            }
        }

        let body = ctx.buffer()?;
        let body = (self.options.request)(session.as_ref(), path, &req, body)?;

        let method = match &self.options.prefix {
            Some(prefix) if !prefix.is_empty() => join_path(prefix, &service_method),
            _ => service_method.clone(),
        };

        let started = Instant::now();
        let call = self
            .backend
            .call(&req, &mut res, &service_path, &method, &body)
            .await;
        let elapsed = started.elapsed();
        if elapsed > self.options.slow_threshold {
            warn!(path = %path, elapsed = ?elapsed, "slow upstream call");
        }
        let reply = call?;

        // Default, overridable by the backend.
        res.stamp(keys::RESPONSE_TYPE, response_type::NONE);

        let reply = (self.options.response)(session.as_ref(), path, &mut res, reply)?;

        // Pure data path, no session side effects: the common case.
        if res.len() == 1 {
            return Ok(reply);
        }

        if let Some(guid) = res.get(keys::PLAYER_LOGIN) {
            // A backend service instructs the gateway to bind this
            // connection to an identity it has validated.
            ctx.login(guid, self.cookies.filter(&res)).await?;
        }
        let mut session = session;
        if res.contains(keys::PLAYER_LOGOUT) {
            ctx.logout().await?;
            if let Some(session) = &session {
                self.players.delete(session);
            }
            session = None;
        }
        if let Some(session) = &session {
            self.cookies.sync(&res, session).await?;
        }

        Ok(reply)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "request handler panicked".to_string()
    }
}
