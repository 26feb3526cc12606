//! Configuration management

use std::path::Path;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Loaded in order, later files override earlier. Missing files are
    /// skipped.
    #[serde(default)]
    pub env_files: Vec<String>,
    /// Listener and routing configuration
    pub gate: GateConfig,
    /// Application id stamped into and checked against login tokens
    pub appid: String,
    /// Shared secret for login-token verification
    pub secret: String,
    /// Developer-mode secret; empty disables the developer login path
    pub developer: String,
    /// Maintenance mode: only developers may authenticate
    pub maintenance: bool,
}

/// Listener and routing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Bind address shared by every enabled protocol
    pub address: String,
    /// Enabled protocol mask, see [`Protocols`]
    pub protocol: Protocols,
    /// Route prefix prepended to every backend service method
    pub prefix: String,
    /// WebSocket upgrade route (under the HTTP listener)
    pub websocket: String,
    /// Login route handled by the gateway itself
    pub oauth: String,
    /// Outbound queue capacity hint per connection
    pub capacity: usize,
    /// Upstream calls slower than this many milliseconds are logged
    pub slow_call_ms: u64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0:80".to_string(),
            protocol: Protocols::default(),
            prefix: "handle".to_string(),
            websocket: "ws".to_string(),
            oauth: "oauth".to_string(),
            capacity: 10_240,
            slow_call_ms: 500,
        }
    }
}

impl GateConfig {
    /// Slow-call threshold as a [`Duration`].
    #[must_use]
    pub fn slow_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_call_ms)
    }
}

/// Protocol bitmask selecting which listeners to run on the shared address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Protocols(pub u8);

impl Protocols {
    /// WebSocket listener bit.
    pub const WS: u8 = 1;
    /// Binary-frame TCP listener bit.
    pub const TCP: u8 = 1 << 1;
    /// Plain HTTP listener bit.
    pub const HTTP: u8 = 1 << 2;

    /// Whether a protocol bit is enabled.
    #[must_use]
    pub fn has(self, bit: u8) -> bool {
        self.0 & bit != 0
    }

    /// Whether the binary-frame TCP listener runs.
    #[must_use]
    pub fn socket_enabled(self) -> bool {
        self.has(Self::TCP)
    }

    /// Whether the HTTP family (plain HTTP and/or WebSocket) runs.
    #[must_use]
    pub fn http_enabled(self) -> bool {
        self.has(Self::WS) || self.has(Self::HTTP)
    }

    /// Whether both families share the address and incoming connections
    /// must be sniffed apart.
    #[must_use]
    pub fn needs_demux(self) -> bool {
        self.socket_enabled() && self.http_enabled()
    }

    /// True when no protocol bit is set.
    #[must_use]
    pub fn is_empty(self) -> bool {
        self.0 & (Self::WS | Self::TCP | Self::HTTP) == 0
    }
}

impl Default for Protocols {
    fn default() -> Self {
        Self(Self::TCP)
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (GAMEGATE_ prefix)
        figment = figment.merge(Env::prefixed("GAMEGATE_").split("__"));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.load_env_files();
        config.validate()?;

        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let path = Path::new(path_str);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => {
                        tracing::info!("Loaded env file: {path_str}");
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load env file {path_str}: {e}");
                    }
                }
            } else {
                tracing::debug!("Env file not found (skipped): {path_str}");
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.gate.address.is_empty() {
            return Err(Error::Config("gate.address must not be empty".into()));
        }
        if self.gate.protocol.is_empty() {
            return Err(Error::Config(
                "gate.protocol must enable at least one of ws(1), tcp(2), http(4)".into(),
            ));
        }
        Ok(())
    }
}
