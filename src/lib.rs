//! Game Edge Gateway Library
//!
//! Session-aware edge gateway for multiplayer game backends.
//!
//! # Features
//!
//! - **One pipeline, many transports**: HTTP, WebSocket, and binary-frame TCP
//!   all feed one request-forwarding pipeline
//! - **Per-endpoint authorization**: exact and prefix rules over four access
//!   levels, with developer-only elevation
//! - **Backend-driven sessions**: backends bind and tear down identities
//!   through reply metadata directives
//! - **Push delivery**: targeted, broadcast, and channel-room push from
//!   backend services to connected clients
//! - **Single-port multiplexing**: TCP and HTTP families can share one
//!   listen address via first-byte sniffing

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod access;
pub mod authorize;
pub mod backend;
pub mod channel;
pub mod cli;
pub mod config;
pub mod context;
pub mod cookies;
pub mod error;
pub mod metadata;
pub mod players;
pub mod proxy;
pub mod push;
pub mod server;
pub mod session;
pub mod token;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
