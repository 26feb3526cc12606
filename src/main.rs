//! Game Edge Gateway - session-aware request forwarding for game backends

use std::process::ExitCode;

use clap::Parser;
use tracing::error;

use gamegate::{
    cli::{Cli, Command},
    config::Config,
    server::Gateway,
    setup_tracing,
    token::{Token, TokenAuthenticator},
};

#[tokio::main]
async fn main() -> ExitCode {
    let mut cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    match cli.command.take() {
        Some(Command::Token {
            guid,
            expire,
            developer,
        }) => run_token(&cli, &guid, expire, developer),
        Some(Command::Serve) | None => run_server(&cli).await,
    }
}

fn run_token(cli: &Cli, guid: &str, expire: i64, developer: bool) -> ExitCode {
    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load config: {e}");
            return ExitCode::FAILURE;
        }
    };
    let authenticator = TokenAuthenticator::from_config(&config);
    let token = Token {
        guid: guid.to_string(),
        appid: config.appid.clone(),
        expire,
        developer,
    };
    match authenticator.issue(&token) {
        Ok(access) => {
            println!("{access}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Failed to issue token: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run_server(cli: &Cli) -> ExitCode {
    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load config: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Some(address) = &cli.address {
        config.gate.address.clone_from(address);
    }

    let gateway = Gateway::without_backend(config);
    match gateway.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Gateway failed: {e}");
            ExitCode::FAILURE
        }
    }
}
