//! Single-port protocol demultiplexing.
//!
//! When the binary-frame and HTTP families share one listen address, each
//! accepted connection is classified by peeking its first byte: the frame
//! magic is outside the ASCII range, so anything else is an HTTP request
//! line. Classified connections are handed to the owning family without
//! consuming any bytes.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::connect_info::Connected;
use axum::serve::{IncomingStream, Listener};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::Protocols;
use crate::server::frame::FRAME_MAGIC;
use crate::server::{ServerState, tcp};

/// A connection that sends nothing for this long is dropped unclassified.
const CLASSIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection family selected by the first byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Family {
    /// Binary-frame protocol.
    Socket,
    /// HTTP request line (plain HTTP or a WebSocket upgrade).
    Http,
}

/// Peek the first byte without consuming it.
pub(crate) async fn classify(stream: &TcpStream) -> io::Result<Family> {
    let mut first = [0u8; 1];
    let n = stream.peek(&mut first).await?;
    if n == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed before first byte",
        ));
    }
    Ok(if first[0] == FRAME_MAGIC {
        Family::Socket
    } else {
        Family::Http
    })
}

/// Accept loop over the shared listener, routing each connection to its
/// family until shutdown.
pub(crate) async fn run(
    listener: TcpListener,
    protocols: Protocols,
    state: Arc<ServerState>,
    http_tx: Option<mpsc::Sender<(TcpStream, SocketAddr)>>,
) {
    info!(
        socket = protocols.socket_enabled(),
        http = protocols.http_enabled(),
        "accept loop running"
    );
    loop {
        let accepted = tokio::select! {
            () = state.cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        let (stream, addr) = match accepted {
            Ok(pair) => pair,
            Err(err) => {
                warn!(error = %err, "accept failed");
                continue;
            }
        };
        let state = Arc::clone(&state);
        let http_tx = http_tx.clone();
        tokio::spawn(async move {
            let family = if protocols.needs_demux() {
                let peek = tokio::time::timeout(CLASSIFY_TIMEOUT, classify(&stream)).await;
                match peek {
                    Ok(Ok(family)) => family,
                    Ok(Err(err)) => {
                        debug!(addr = %addr, error = %err, "dropping unclassifiable connection");
                        return;
                    }
                    Err(_) => {
                        debug!(addr = %addr, "dropping silent connection");
                        return;
                    }
                }
            } else if protocols.socket_enabled() {
                Family::Socket
            } else {
                Family::Http
            };
            match family {
                Family::Socket => tcp::serve_connection(state, stream, addr).await,
                Family::Http => {
                    if let Some(tx) = http_tx {
                        if tx.send((stream, addr)).await.is_err() {
                            debug!(addr = %addr, "http listener gone, dropping connection");
                        }
                    } else {
                        debug!(addr = %addr, "http family disabled, dropping connection");
                    }
                }
            }
        });
    }
}

/// [`Listener`] fed by the demux accept loop, so axum can serve the HTTP
/// family of a shared port.
pub(crate) struct ChannelListener {
    rx: mpsc::Receiver<(TcpStream, SocketAddr)>,
    local: SocketAddr,
}

impl ChannelListener {
    pub(crate) fn new(rx: mpsc::Receiver<(TcpStream, SocketAddr)>, local: SocketAddr) -> Self {
        Self { rx, local }
    }
}

impl Listener for ChannelListener {
    type Io = TcpStream;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        match self.rx.recv().await {
            Some(pair) => pair,
            // Feeder gone: park until graceful shutdown completes.
            None => std::future::pending().await,
        }
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        Ok(self.local)
    }
}

/// Peer address attached to each HTTP connection by axum's connect-info
/// machinery. A local wrapper, since [`Connected`] cannot be implemented
/// for [`SocketAddr`] over a custom listener.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ClientAddr(pub SocketAddr);

impl Connected<IncomingStream<'_, ChannelListener>> for ClientAddr {
    fn connect_info(stream: IncomingStream<'_, ChannelListener>) -> Self {
        Self(*stream.remote_addr())
    }
}
