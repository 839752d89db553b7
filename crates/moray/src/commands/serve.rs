//! The `serve` command: tunnel server plus join API in one process.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use russh::keys::PrivateKey;
use tokio::net::TcpListener;
use tracing::info;

use moray_auth::backend::MemoryBackend;
use moray_auth::ca::CaType;
use moray_auth::AuthServer;
use moray_crypto::keys::generate_keypair;
use moray_crypto::secrets::SecretService;
use moray_tunnel::server::{TunnelConfig, TunnelServer};

use crate::config::Config;
use crate::wiring::AuthorityAdapter;

pub async fn run(config: Config) -> anyhow::Result<()> {
    let backend = Arc::new(MemoryBackend::new());
    let auth = Arc::new(AuthServer::new(
        backend,
        config.hostname.clone(),
        SecretService::ephemeral(),
        config.ca_passphrase.clone(),
    ));

    // First start: initialize the authorities.
    if auth.ca_service().local_ca(CaType::Host).await.is_err() {
        auth.reset_host_ca().await?;
    }
    if auth.ca_service().local_ca(CaType::User).await.is_err() {
        auth.reset_user_ca().await?;
    }

    let host_key = PrivateKey::from_openssh(&generate_keypair()?.private_key)
        .context("generating tunnel host key")?;
    let tunnel = TunnelServer::new(
        TunnelConfig {
            host_keys: vec![host_key],
            heartbeat_period: Duration::from_secs(config.heartbeat_period_secs),
        },
        Arc::new(AuthorityAdapter(auth.clone())),
    );
    let tunnel_addr = tunnel.start(&config.tunnel_addr).await?;
    info!(addr = %tunnel_addr, "tunnel listening");

    let api_listener = TcpListener::bind(&config.api_addr)
        .await
        .with_context(|| format!("binding join API on {}", config.api_addr))?;
    info!(addr = %api_listener.local_addr()?, "join API listening");

    let router = moray_auth::http::routes(auth);
    tokio::select! {
        result = axum::serve(api_listener, router) => {
            result.context("join API server")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
        }
    }

    tunnel.shutdown();
    Ok(())
}
