//! moray — reverse-tunnel cluster access plane.

mod cli;
mod commands;
mod config;
mod wiring;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command};
use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Command::Serve => commands::serve::run(config).await,
        Command::Token { command } => commands::token::run(command),
        Command::Ca { command } => commands::ca::run(command),
        Command::Agent { command } => commands::agent::run(command).await,
    }
}
