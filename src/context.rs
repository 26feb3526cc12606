//! The per-request context contract every transport adapter implements.
//!
//! One context exists per inbound request and is never shared across
//! requests. The forwarder and the access strategies consume this trait
//! only; they never see the adapter behind it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::Result;
use crate::metadata::Metadata;
use crate::session::Session;

/// Capability set a transport adapter exposes for one request.
#[async_trait]
pub trait Context: Send + Sync {
    /// Snapshot of the request's metadata envelope.
    fn metadata(&self) -> Metadata;

    /// The raw request body.
    fn buffer(&self) -> Result<Bytes>;

    /// The caller's remote address.
    fn remote_addr(&self) -> String;

    /// Identity of the persistent socket carrying this request, when the
    /// adapter is socket-based. Explicit optional capability — adapters
    /// without a persistent socket return `None`.
    fn socket_id(&self) -> Option<u64> {
        None
    }

    /// Bind this connection to `guid`, seeding the new session with
    /// `values`. Returns the session-binding credential.
    async fn login(&self, guid: &str, values: HashMap<String, String>) -> Result<String>;

    /// Tear the bound identity down.
    async fn logout(&self) -> Result<()>;

    /// Resolve the bound session, if any.
    async fn verify(&self) -> Result<Option<Arc<Session>>>;
}
