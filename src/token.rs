//! Login credential authentication.
//!
//! A login request carries `{guid, access, secret}`. `access` is an opaque
//! HS256 compact token minted by the platform with the shared platform
//! secret; its claims are the [`Token`] payload. `secret` is the developer
//! bypass phrase — when it matches the configured developer secret, a
//! non-empty `guid` logs in directly without a platform credential
//! (operational/test use only).

use std::sync::OnceLock;

use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use regex::Regex;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::config::Config;
use crate::{Error, Result};

/// The trusted identity claim recovered from an access credential.
///
/// Ephemeral: exists only during the login handshake, never persisted and
/// never forwarded to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// Account identity.
    #[serde(default)]
    pub guid: String,
    /// Application the credential was minted for.
    #[serde(default)]
    pub appid: String,
    /// Unix expiry in seconds, 0 = no expiry.
    #[serde(default)]
    pub expire: i64,
    /// Developer/master flag.
    #[serde(default)]
    pub developer: bool,
}

/// The login request body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
    /// Account identity (developer fast-path only).
    #[serde(default)]
    pub guid: String,
    /// Opaque access credential.
    #[serde(default)]
    pub access: String,
    /// Developer bypass phrase.
    #[serde(default)]
    pub secret: String,
}

/// Allowed characters for a developer fast-path guid.
fn guid_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"^[a-zA-Z0-9~!@#$%^&*()_+\-=\[\]\\{}|;':",./<>?]{2,64}$"#)
            .expect("static pattern")
    })
}

/// Validates login credentials into a trusted [`Token`].
#[derive(Debug, Clone)]
pub struct TokenAuthenticator {
    appid: String,
    secret: String,
    developer_secret: String,
    maintenance: bool,
}

impl TokenAuthenticator {
    /// Create an authenticator from explicit parameters.
    #[must_use]
    pub fn new(appid: &str, secret: &str, developer_secret: &str, maintenance: bool) -> Self {
        Self {
            appid: appid.to_string(),
            secret: secret.to_string(),
            developer_secret: developer_secret.to_string(),
            maintenance,
        }
    }

    /// Create an authenticator from the loaded configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.appid,
            &config.secret,
            &config.developer,
            config.maintenance,
        )
    }

    /// Validate a login request into a trusted identity claim.
    pub fn verify(&self, creds: &Credentials) -> Result<Token> {
        let mut developer = false;
        if !creds.secret.is_empty() {
            if self.developer_secret.is_empty() {
                return Err(Error::GmDisabled);
            }
            let matches: bool = creds
                .secret
                .as_bytes()
                .ct_eq(self.developer_secret.as_bytes())
                .into();
            if !matches {
                return Err(Error::GmWrongSecret);
            }
            developer = true;
        }

        // Developer fast-path: log in by bare guid, no platform credential.
        if developer && !creds.guid.is_empty() {
            if !guid_pattern().is_match(&creds.guid) {
                return Err(Error::Credential(format!(
                    "guid does not match {}",
                    guid_pattern().as_str()
                )));
            }
            return Ok(Token {
                guid: creds.guid.clone(),
                appid: self.appid.clone(),
                expire: 0,
                developer: true,
            });
        }

        if creds.access.is_empty() {
            return Err(Error::SessionEmpty);
        }
        if self.secret.is_empty() {
            return Err(Error::Config("platform secret is not configured".into()));
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.set_required_spec_claims::<&str>(&[]);
        let data = decode::<Token>(
            &creds.access,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .map_err(|e| Error::Credential(e.to_string()))?;

        let mut token = data.claims;
        token.developer = token.developer || developer;

        if token.guid.is_empty() {
            return Err(Error::Credential("access guid empty".into()));
        }
        if token.expire > 0 && token.expire < Utc::now().timestamp() {
            return Err(Error::SessionExpired);
        }
        if token.appid != self.appid {
            return Err(Error::Credential("access appid mismatch".into()));
        }
        if self.maintenance && !token.developer {
            return Err(Error::Maintenance);
        }
        Ok(token)
    }

    /// Mint an access credential for a token payload with the platform
    /// secret. The platform normally does this out of process; the gateway
    /// exposes it for the `token` CLI subcommand and tests.
    pub fn issue(&self, token: &Token) -> Result<String> {
        if self.secret.is_empty() {
            return Err(Error::Config("platform secret is not configured".into()));
        }
        encode(
            &Header::new(Algorithm::HS256),
            token,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| Error::Credential(e.to_string()))
    }
}
