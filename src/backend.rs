//! The backend RPC boundary.
//!
//! The gateway is a pure client of this trait. Service discovery, connection
//! pooling, and retry policy all live in the implementation behind it.

use async_trait::async_trait;
use bytes::Bytes;

use crate::metadata::Metadata;
use crate::{Error, Result};

/// One call into the internal service mesh.
#[async_trait]
pub trait RpcClient: Send + Sync {
    /// Invoke `service_path`/`service_method` with the request envelope and
    /// body, collecting response metadata into `res` and returning the reply
    /// bytes. Errors propagate verbatim through the forwarder.
    async fn call(
        &self,
        req: &Metadata,
        res: &mut Metadata,
        service_path: &str,
        service_method: &str,
        body: &[u8],
    ) -> Result<Bytes>;
}

/// Stand-in client used when the gateway runs without a mesh client wired
/// in. Every call fails with a backend error, which the forwarder formats
/// into a reply like any other failure.
#[derive(Debug, Default)]
pub struct NullClient;

#[async_trait]
impl RpcClient for NullClient {
    async fn call(
        &self,
        _req: &Metadata,
        _res: &mut Metadata,
        service_path: &str,
        service_method: &str,
        _body: &[u8],
    ) -> Result<Bytes> {
        Err(Error::Backend(format!(
            "no route to {service_path}{service_method}"
        )))
    }
}
