//! Endpoint authorization table.
//!
//! Maps a normalized endpoint path (`/<service>/<method>`, lower-cased,
//! single leading slash) to the authentication strength required to call it,
//! plus an orthogonal set of prefixes that additionally require the
//! developer/master flag.
//!
//! Resolution order: exact match wins; else the longest matching prefix;
//! else the table default. The default is never [`AuthLevel::None`] — an
//! unclassified endpoint must never be treated as public.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Required authentication strength for an endpoint, ordered by trust.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[repr(u8)]
#[serde(rename_all = "lowercase")]
pub enum AuthLevel {
    /// No identity required.
    None = 0,
    /// A verified account identity required.
    OAuth = 1,
    /// Identity plus a selected role. Behaviourally identical to `Player`.
    Select = 2,
    /// Identity plus a selected role. The strictest non-privileged level.
    #[default]
    Player = 3,
}

impl AuthLevel {
    /// All levels, in trust order. Dispatcher construction validates against
    /// this list.
    pub const ALL: [AuthLevel; 4] = [Self::None, Self::OAuth, Self::Select, Self::Player];

    /// Numeric wire value stamped into request metadata.
    #[must_use]
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Normalize path segments: join with `/`, lower-case, single leading slash.
#[must_use]
pub fn normalize(segments: &[&str]) -> String {
    let mut path = String::new();
    for segment in segments {
        for part in segment.split('/').filter(|p| !p.is_empty()) {
            path.push('/');
            path.push_str(part);
        }
    }
    path.make_ascii_lowercase();
    path
}

/// Join two path fragments with a single separator, keeping case.
#[must_use]
pub fn join_path(prefix: &str, path: &str) -> String {
    let mut joined = String::new();
    for part in prefix.split('/').chain(path.split('/')) {
        if !part.is_empty() {
            joined.push('/');
            joined.push_str(part);
        }
    }
    joined
}

#[derive(Debug)]
struct Inner {
    default: AuthLevel,
    exact: HashMap<String, AuthLevel>,
    prefix: HashMap<String, AuthLevel>,
    elevated: Vec<String>,
}

/// The authorization table. Lookups happen on every request; registration is
/// normally done at startup but runtime updates are safe.
#[derive(Debug)]
pub struct Authorizer {
    inner: RwLock<Inner>,
}

impl Default for Authorizer {
    fn default() -> Self {
        Self {
            inner: RwLock::new(Inner {
                default: AuthLevel::Player,
                exact: HashMap::new(),
                prefix: HashMap::new(),
                elevated: Vec::new(),
            }),
        }
    }
}

impl Authorizer {
    /// Create a table with the default fallback level (`Player`).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an exact-path override.
    pub fn set(&self, service_path: &str, service_method: &str, level: AuthLevel) {
        let path = normalize(&[service_path, service_method]);
        self.inner.write().exact.insert(path, level);
    }

    /// Register a prefix override.
    pub fn set_prefix(&self, service_path: &str, service_method: &str, level: AuthLevel) {
        let path = normalize(&[service_path, service_method]);
        self.inner.write().prefix.insert(path, level);
    }

    /// Current fallback level.
    #[must_use]
    pub fn default_level(&self) -> AuthLevel {
        self.inner.read().default
    }

    /// Change the fallback level. `None` is rejected: an endpoint without an
    /// explicit entry must never resolve to public access.
    pub fn set_default(&self, level: AuthLevel) -> Result<()> {
        if level == AuthLevel::None {
            return Err(Error::Config(
                "authorization default level must not be None".into(),
            ));
        }
        self.inner.write().default = level;
        Ok(())
    }

    /// Mark a path prefix as requiring the developer flag.
    pub fn require_elevated(&self, service_path: &str, service_method: &str) {
        let path = normalize(&[service_path, service_method]);
        self.inner.write().elevated.push(path);
    }

    /// Resolve the required level for an endpoint. Returns the level and the
    /// normalized path used for the lookup.
    ///
    /// Exact match beats prefix match; among matching prefixes the longest
    /// one wins; otherwise the default applies.
    #[must_use]
    pub fn resolve(&self, service_path: &str, service_method: &str) -> (AuthLevel, String) {
        let path = normalize(&[service_path, service_method]);
        let inner = self.inner.read();
        if let Some(level) = inner.exact.get(&path) {
            return (*level, path);
        }
        let best = inner
            .prefix
            .iter()
            .filter(|(prefix, _)| path.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len());
        match best {
            Some((_, level)) => (*level, path),
            None => (inner.default, path),
        }
    }

    /// Whether any elevated prefix covers the normalized path.
    #[must_use]
    pub fn is_elevated(&self, path: &str) -> bool {
        self.inner
            .read()
            .elevated
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_lowers_and_slashes() {
        assert_eq!(normalize(&["Game", "Attack"]), "/game/attack");
        assert_eq!(normalize(&["/game/", "/attack"]), "/game/attack");
        assert_eq!(normalize(&["game/attack"]), "/game/attack");
    }

    #[test]
    fn unclassified_endpoints_resolve_to_default_never_none() {
        let auth = Authorizer::new();
        let (level, path) = auth.resolve("shop", "buy");
        assert_eq!(level, AuthLevel::Player);
        assert_eq!(path, "/shop/buy");
        assert!(auth.set_default(AuthLevel::None).is_err());
        assert_eq!(auth.default_level(), AuthLevel::Player);
    }

    #[test]
    fn exact_beats_prefix() {
        let auth = Authorizer::new();
        auth.set("game", "attack", AuthLevel::None);
        auth.set_prefix("game", "", AuthLevel::Player);
        let (level, _) = auth.resolve("game", "attack");
        assert_eq!(level, AuthLevel::None);
    }

    #[test]
    fn longest_prefix_wins() {
        let auth = Authorizer::new();
        auth.set_prefix("game", "", AuthLevel::Player);
        auth.set_prefix("game", "admin", AuthLevel::OAuth);
        let (level, _) = auth.resolve("game", "admin/reload");
        assert_eq!(level, AuthLevel::OAuth);
        let (level, _) = auth.resolve("game", "attack");
        assert_eq!(level, AuthLevel::Player);
    }

    #[test]
    fn elevated_is_an_or_over_prefixes() {
        let auth = Authorizer::new();
        auth.require_elevated("gm", "");
        auth.require_elevated("game", "debug");
        assert!(auth.is_elevated("/gm/anything"));
        assert!(auth.is_elevated("/game/debug/dump"));
        assert!(!auth.is_elevated("/game/attack"));
    }

    #[test]
    fn resolution_is_case_insensitive() {
        let auth = Authorizer::new();
        auth.set("Game", "Attack", AuthLevel::OAuth);
        let (level, _) = auth.resolve("GAME", "ATTACK");
        assert_eq!(level, AuthLevel::OAuth);
    }

    #[test]
    fn join_path_keeps_case_and_single_slashes() {
        assert_eq!(join_path("handle", "Attack"), "/handle/Attack");
        assert_eq!(join_path("/handle/", "/attack"), "/handle/attack");
    }
}
