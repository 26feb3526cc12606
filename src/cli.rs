//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Game edge gateway - session-aware request forwarding for game backends
#[derive(Parser, Debug)]
#[command(name = "gamegate")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "GAMEGATE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Bind address, overrides the configured one
    #[arg(short, long, env = "GAMEGATE_ADDRESS")]
    pub address: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "GAMEGATE_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "GAMEGATE_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the gateway server (default)
    Serve,

    /// Issue a signed login token for manual testing
    Token {
        /// Account identity to embed in the token
        #[arg(required = true)]
        guid: String,

        /// Expiry as a unix timestamp (0 = never expires)
        #[arg(short, long, default_value_t = 0)]
        expire: i64,

        /// Mark the token as a developer token
        #[arg(short, long)]
        developer: bool,
    },
}
