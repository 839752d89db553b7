//! Agent subcommands: join a proxy, then run against the stored identity.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use russh::keys::{Certificate, PrivateKey};
use tracing::{info, warn};

use moray_auth::client::AuthClient;
use moray_tunnel::agent::{Agent, AgentConfig};

use crate::cli::AgentCommand;

const IDENTITY_FILE: &str = "identity";
const CERTIFICATE_FILE: &str = "identity-cert.pub";

/// Delay between reconnect attempts after a dropped tunnel.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

pub async fn run(command: AgentCommand) -> anyhow::Result<()> {
    match command {
        AgentCommand::Join {
            token,
            node_name,
            endpoint,
            identity_dir,
        } => join(&token, &node_name, &endpoint, &identity_dir),
        AgentCommand::Run {
            proxy_addr,
            node_name,
            identity_dir,
            access_point,
        } => serve(&proxy_addr, &node_name, &identity_dir, access_point).await,
    }
}

fn join(token: &str, node_name: &str, endpoint: &str, identity_dir: &Path) -> anyhow::Result<()> {
    let client = AuthClient::new(endpoint);
    let packed = client.join(token, node_name, moray_auth::ROLE_NODE)?;

    std::fs::create_dir_all(identity_dir)
        .with_context(|| format!("creating {}", identity_dir.display()))?;
    let key_path = identity_dir.join(IDENTITY_FILE);
    let cert_path = identity_dir.join(CERTIFICATE_FILE);
    std::fs::write(&key_path, &packed.private_key)
        .with_context(|| format!("writing {}", key_path.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&key_path, std::fs::Permissions::from_mode(0o600))?;
    }
    std::fs::write(&cert_path, &packed.certificate)
        .with_context(|| format!("writing {}", cert_path.display()))?;

    info!(node = %node_name, dir = %identity_dir.display(), "joined, identity stored");
    Ok(())
}

async fn serve(
    proxy_addr: &str,
    node_name: &str,
    identity_dir: &Path,
    access_point: Option<String>,
) -> anyhow::Result<()> {
    let key_path = identity_dir.join(IDENTITY_FILE);
    let cert_path = identity_dir.join(CERTIFICATE_FILE);
    let private_key = PrivateKey::from_openssh(
        &std::fs::read_to_string(&key_path)
            .with_context(|| format!("reading {}", key_path.display()))?,
    )
    .context("parsing identity key")?;
    let certificate = Certificate::from_openssh(
        &std::fs::read_to_string(&cert_path)
            .with_context(|| format!("reading {}", cert_path.display()))?,
    )
    .context("parsing identity certificate")?;

    let private_key = Arc::new(private_key);
    loop {
        let agent = Agent::new(AgentConfig {
            proxy_addr: proxy_addr.to_string(),
            domain_name: node_name.to_string(),
            private_key: private_key.clone(),
            certificate: certificate.clone(),
            access_point_addr: access_point.clone(),
            heartbeat_period: moray_tunnel::DEFAULT_HEARTBEAT_PERIOD,
        });
        match agent.run().await {
            Ok(()) => return Ok(()),
            Err(e) => {
                warn!(error = %e, "tunnel lost, reconnecting");
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}
