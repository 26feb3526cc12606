//! Gateway assembly and lifecycle.
//!
//! [`Gateway`] wires the registries, the forwarder, and the transport
//! adapters together over one listen address, and drives them until a
//! shutdown signal arrives.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::access::AccessDispatcher;
use crate::authorize::Authorizer;
use crate::backend::{NullClient, RpcClient};
use crate::channel::ChannelRegistry;
use crate::config::Config;
use crate::cookies::CookieSync;
use crate::players::PlayerRegistry;
use crate::proxy::{Forwarder, ProxyOptions};
use crate::push::PushService;
use crate::session::{MemoryStore, SessionStore};
use crate::token::TokenAuthenticator;
use crate::{Error, Result};

mod demux;
pub mod frame;
mod http;
mod tcp;
mod ws;

/// Shared state every transport adapter works against.
pub struct ServerState {
    pub(crate) forwarder: Arc<Forwarder>,
    pub(crate) authenticator: Arc<TokenAuthenticator>,
    pub(crate) sessions: Arc<dyn SessionStore>,
    pub(crate) players: Arc<PlayerRegistry>,
    pub(crate) oauth_path: String,
    pub(crate) websocket_path: String,
    pub(crate) cancel: CancellationToken,
}

/// The assembled gateway.
pub struct Gateway {
    config: Config,
    state: Arc<ServerState>,
    authorizer: Arc<Authorizer>,
    channels: Arc<ChannelRegistry>,
    push: Arc<PushService>,
}

impl Gateway {
    /// Assemble a gateway from configuration, forwarding to `backend`.
    #[must_use]
    pub fn new(config: Config, backend: Arc<dyn RpcClient>) -> Self {
        let players = Arc::new(PlayerRegistry::new());
        let channels = Arc::new(ChannelRegistry::new(Arc::clone(&players)));
        let sessions: Arc<dyn SessionStore> = Arc::new(MemoryStore::new());
        let cookies = Arc::new(CookieSync::new(
            Arc::clone(&channels),
            Arc::clone(&sessions),
        ));
        let authorizer = Arc::new(Authorizer::new());
        let access = Arc::new(AccessDispatcher::with_defaults(Arc::clone(&authorizer)));
        let authenticator = Arc::new(TokenAuthenticator::from_config(&config));
        let push = Arc::new(PushService::new(
            Arc::clone(&players),
            Arc::clone(&channels),
            Arc::clone(&cookies),
        ));

        let options = ProxyOptions {
            prefix: Some(config.gate.prefix.clone()),
            gateway_addr: config.gate.address.clone(),
            slow_threshold: config.gate.slow_threshold(),
            ..ProxyOptions::default()
        };
        let forwarder = Arc::new(Forwarder::new(
            options,
            access,
            backend,
            Arc::clone(&players),
            Arc::clone(&cookies),
        ));

        let state = Arc::new(ServerState {
            forwarder,
            authenticator,
            sessions,
            players,
            oauth_path: config.gate.oauth.clone(),
            websocket_path: config.gate.websocket.clone(),
            cancel: CancellationToken::new(),
        });

        Self {
            config,
            state,
            authorizer,
            channels,
            push,
        }
    }

    /// Assemble a gateway with no backend wired yet.
    #[must_use]
    pub fn without_backend(config: Config) -> Self {
        Self::new(config, Arc::new(NullClient))
    }

    /// Per-endpoint authorization table, for host configuration.
    #[must_use]
    pub fn authorizer(&self) -> &Arc<Authorizer> {
        &self.authorizer
    }

    /// The push service backend services deliver through.
    #[must_use]
    pub fn push(&self) -> &Arc<PushService> {
        &self.push
    }

    /// Channel-room registry.
    #[must_use]
    pub fn channels(&self) -> &Arc<ChannelRegistry> {
        &self.channels
    }

    /// Request a graceful shutdown.
    pub fn shutdown(&self) {
        self.state.cancel.cancel();
    }

    /// Bind the listen address and serve until shutdown.
    pub async fn run(&self) -> Result<()> {
        let protocols = self.config.gate.protocol;
        if protocols.is_empty() {
            return Err(Error::Config(
                "gate.protocol must enable at least one of ws(1), tcp(2), http(4)".into(),
            ));
        }
        let listener = TcpListener::bind(&self.config.gate.address)
            .await
            .map_err(|e| Error::Config(format!("bind {}: {e}", self.config.gate.address)))?;
        let local = listener.local_addr()?;
        info!(addr = %local, protocols = protocols.0, "gateway listening");

        let cancel = self.state.cancel.clone();
        tokio::spawn(shutdown_signal(cancel));

        let mut http_task = None;
        let http_tx = if protocols.http_enabled() {
            let (tx, rx) = mpsc::channel(self.config.gate.capacity);
            let app = http::router(Arc::clone(&self.state), protocols.has(crate::config::Protocols::WS));
            let http_listener = demux::ChannelListener::new(rx, local);
            let cancel = self.state.cancel.clone();
            http_task = Some(tokio::spawn(async move {
                axum::serve(
                    http_listener,
                    app.into_make_service_with_connect_info::<demux::ClientAddr>(),
                )
                .with_graceful_shutdown(cancel.cancelled_owned())
                .await
            }));
            Some(tx)
        } else {
            None
        };

        demux::run(listener, protocols, Arc::clone(&self.state), http_tx).await;

        if let Some(task) = http_task {
            task.await
                .map_err(|e| Error::Internal(e.to_string()))?
                .map_err(|e| Error::Transport(e.to_string()))?;
        }
        info!("gateway stopped");
        Ok(())
    }
}


/// Cancel on Ctrl+C or SIGTERM.
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received");
    cancel.cancel();
}
