//! Command-line interface definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "moray", about = "Reverse-tunnel cluster access plane", version)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the proxy: tunnel server plus join API.
    Serve,

    /// Join-token management (against a running proxy).
    Token {
        #[command(subcommand)]
        command: TokenCommand,
    },

    /// Certificate authority management (against a running proxy).
    Ca {
        #[command(subcommand)]
        command: CaCommand,
    },

    /// Edge agent operations.
    Agent {
        #[command(subcommand)]
        command: AgentCommand,
    },
}

#[derive(Subcommand)]
pub enum TokenCommand {
    /// Mint a single-use join token for an edge cluster.
    Generate {
        /// Domain name the joining edge will declare.
        node_name: String,
        /// Role granted by the token.
        #[arg(long, default_value = "node")]
        role: String,
        /// Token lifetime in seconds.
        #[arg(long, default_value_t = 3600)]
        ttl_secs: i64,
        /// Join API endpoint.
        #[arg(long, default_value = "http://127.0.0.1:3025")]
        endpoint: String,
    },
    /// Check a token against a domain without consuming it.
    Validate {
        token: String,
        domain_name: String,
        #[arg(long, default_value = "http://127.0.0.1:3025")]
        endpoint: String,
    },
}

#[derive(Subcommand)]
pub enum CaCommand {
    /// Print the trusted host authority keys.
    Show {
        #[arg(long, default_value = "http://127.0.0.1:3025")]
        endpoint: String,
    },
}

#[derive(Subcommand)]
pub enum AgentCommand {
    /// Exchange a join token for key material and store it.
    Join {
        /// Join token from `moray token generate`.
        token: String,
        /// Domain name this edge declares.
        node_name: String,
        /// Join API endpoint.
        #[arg(long, default_value = "http://127.0.0.1:3025")]
        endpoint: String,
        /// Directory for the identity files.
        #[arg(long, default_value = ".")]
        identity_dir: PathBuf,
    },
    /// Run the edge agent against a stored identity.
    Run {
        /// Proxy tunnel endpoint, host:port.
        proxy_addr: String,
        /// Domain name this edge declares.
        node_name: String,
        /// Directory holding the identity files.
        #[arg(long, default_value = ".")]
        identity_dir: PathBuf,
        /// Local control API address bridged over access-point channels.
        #[arg(long)]
        access_point: Option<String>,
    },
}
