//! Error types for the gateway

use std::io;

use thiserror::Error;

/// Result type alias for the gateway
pub type Result<T> = std::result::Result<T, Error>;

/// Gateway errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// No verified identity bound to the connection
    #[error("not login")]
    NotLoggedIn,

    /// Identity verified but no in-game role selected
    #[error("not select role")]
    RoleNotSelected,

    /// Endpoint requires the developer/master flag
    #[error("developer permission is required")]
    DeveloperRequired,

    /// Login request carried no access credential
    #[error("session empty")]
    SessionEmpty,

    /// Access credential expired
    #[error("session expired")]
    SessionExpired,

    /// Maintenance mode active and the caller is not a developer
    #[error("server maintenance in progress")]
    Maintenance,

    /// Developer bypass attempted but no developer secret is configured
    #[error("GM commands are disabled")]
    GmDisabled,

    /// Developer bypass secret mismatch
    #[error("GM commands error")]
    GmWrongSecret,

    /// Access credential failed decoding or validation
    #[error("invalid access credential: {0}")]
    Credential(String),

    /// Request path did not resolve to a service endpoint
    #[error("page not found: {0}")]
    NotFound(String),

    /// Backend RPC failure, propagated verbatim
    #[error("Backend error: {0}")]
    Backend(String),

    /// Transport-level failure in an adapter
    #[error("Transport error: {0}")]
    Transport(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error (recovered runtime faults included)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Numeric code carried in formatted error replies.
    ///
    /// The 5xx-range auth codes match the wire contract clients already
    /// understand; everything else collapses to 404 or 500.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::NotLoggedIn => 501,
            Self::RoleNotSelected => 502,
            Self::DeveloperRequired => 503,
            Self::Maintenance => 505,
            Self::SessionEmpty | Self::SessionExpired | Self::Credential(_) => 506,
            Self::GmDisabled | Self::GmWrongSecret => 507,
            Self::NotFound(_) => 404,
            _ => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_errors_keep_their_wire_codes() {
        assert_eq!(Error::NotLoggedIn.code(), 501);
        assert_eq!(Error::RoleNotSelected.code(), 502);
        assert_eq!(Error::DeveloperRequired.code(), 503);
        assert_eq!(Error::Maintenance.code(), 505);
        assert_eq!(Error::NotFound("/nope".into()).code(), 404);
    }

    #[test]
    fn unexpected_errors_collapse_to_500() {
        assert_eq!(Error::Internal("boom".into()).code(), 500);
        assert_eq!(Error::Backend("down".into()).code(), 500);
    }
}
