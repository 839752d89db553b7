//! The reverse-tunnel server.
//!
//! Listens for inbound SSH from edge agents, authenticates them by host
//! certificate, and maintains the site registry. One task per accepted
//! connection; each connection's lifetime is governed by a cancellation
//! token chained off the server's shutdown token, so supersede and
//! shutdown are both a synchronous cancel.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use russh::keys::{Certificate, PrivateKey, PublicKey};
use russh::server::{Auth, Msg, Session};
use russh::{Channel, ChannelId, MethodKind, MethodSet};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use moray_crypto::certs;

use crate::error::TunnelError;
use crate::registry::SiteRegistry;
use crate::site::{RemoteSite, SiteConn, TunnelSite};
use crate::trust::{AuthorityProvider, TrustOracle};
use crate::{ACCESS_POINT_ADDR, CHAN_HEARTBEAT, CHAN_TRANSPORT, EXT_HOST};

/// Tunnel server settings.
pub struct TunnelConfig {
    /// Keys the server presents to dialing agents.
    pub host_keys: Vec<PrivateKey>,
    /// Expected agent ping cadence; sites go offline after 2× silence.
    pub heartbeat_period: Duration,
}

/// Process-wide reverse-tunnel server: owns the listener, the trust
/// oracle, and the set of sites.
pub struct TunnelServer {
    registry: SiteRegistry,
    oracle: TrustOracle,
    ssh_config: Arc<russh::server::Config>,
    shutdown: CancellationToken,
}

impl TunnelServer {
    pub fn new(config: TunnelConfig, provider: Arc<dyn AuthorityProvider>) -> Arc<Self> {
        let mut ssh_config = russh::server::Config {
            auth_rejection_time: Duration::from_millis(250),
            auth_rejection_time_initial: Some(Duration::ZERO),
            nodelay: true,
            ..Default::default()
        };
        ssh_config.keys = config.host_keys;
        ssh_config.methods = MethodSet::from([MethodKind::PublicKey].as_slice());

        Arc::new(Self {
            registry: SiteRegistry::new(config.heartbeat_period),
            oracle: TrustOracle::new(provider),
            ssh_config: Arc::new(ssh_config),
            shutdown: CancellationToken::new(),
        })
    }

    /// Bind `addr` and serve in a background task. Returns the bound
    /// address (useful with port 0).
    pub async fn start(self: &Arc<Self>, addr: &str) -> Result<SocketAddr, TunnelError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let server = self.clone();
        tokio::spawn(async move {
            if let Err(e) = server.run(listener).await {
                warn!(error = %e, "tunnel server terminated");
            }
        });
        Ok(local_addr)
    }

    /// Accept loop. Returns when the server is shut down.
    pub async fn run(self: Arc<Self>, listener: TcpListener) -> Result<(), TunnelError> {
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "reverse tunnel server listening");
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("reverse tunnel server shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (stream, peer_addr) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    let local_addr = stream.local_addr().unwrap_or(local_addr);
                    self.spawn_connection(stream, local_addr, peer_addr);
                }
            }
        }
    }

    fn spawn_connection(
        self: &Arc<Self>,
        stream: tokio::net::TcpStream,
        local_addr: SocketAddr,
        peer_addr: SocketAddr,
    ) {
        debug!(peer = %peer_addr, "agent connected");
        let cancel = self.shutdown.child_token();
        let handler = ConnHandler::new(self.clone(), local_addr, peer_addr, cancel.clone());
        let config = self.ssh_config.clone();
        tokio::spawn(async move {
            match russh::server::run_stream(config, stream, handler).await {
                Ok(session) => {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            debug!(peer = %peer_addr, "connection closed by server");
                        }
                        result = session => {
                            if let Err(e) = result {
                                debug!(peer = %peer_addr, error = %e, "ssh session ended");
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(peer = %peer_addr, error = %e, "ssh handshake failed");
                }
            }
        });
    }

    /// Close the listener and every tracked connection. In-flight
    /// operations against the tunnels fail promptly.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Every registered site.
    pub async fn sites(&self) -> Vec<Arc<dyn RemoteSite>> {
        self.registry
            .list()
            .await
            .into_iter()
            .map(|s| s as Arc<dyn RemoteSite>)
            .collect()
    }

    /// Exact site lookup by domain name.
    pub async fn site(&self, domain_name: &str) -> Result<Arc<dyn RemoteSite>, TunnelError> {
        Ok(self.registry.get_exact(domain_name).await? as Arc<dyn RemoteSite>)
    }

    /// Most-specific site lookup (longest suffix match, best effort).
    pub async fn find_similar_site(
        &self,
        domain_name: &str,
    ) -> Result<Arc<dyn RemoteSite>, TunnelError> {
        Ok(self.registry.find_similar(domain_name).await? as Arc<dyn RemoteSite>)
    }

    pub(crate) fn registry(&self) -> &SiteRegistry {
        &self.registry
    }
}

/// Per-connection SSH handler.
pub(crate) struct ConnHandler {
    server: Arc<TunnelServer>,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
    cancel: CancellationToken,
    /// Declared site identity; set on successful authentication.
    site_domain: Option<String>,
    /// Permissions extensions attached at authentication time.
    permissions: HashMap<String, String>,
    /// The admitted heartbeat channel, if any. At most one per
    /// connection; later requests are rejected.
    heartbeat_channel: Option<ChannelId>,
    site: Option<Arc<TunnelSite>>,
}

impl ConnHandler {
    fn new(
        server: Arc<TunnelServer>,
        local_addr: SocketAddr,
        peer_addr: SocketAddr,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            server,
            local_addr,
            peer_addr,
            cancel,
            site_domain: None,
            permissions: HashMap::new(),
            heartbeat_channel: None,
            site: None,
        }
    }

    /// Extensions attached to this connection's permissions record.
    #[cfg_attr(not(test), allow(dead_code))]
    pub(crate) fn permissions(&self) -> &HashMap<String, String> {
        &self.permissions
    }

    fn reject() -> Auth {
        Auth::Reject {
            proceed_with_methods: None,
            partial_success: false,
        }
    }
}

impl russh::server::Handler for ConnHandler {
    type Error = russh::Error;

    // Plain public keys are never admitted; agents must present a host
    // certificate chaining to a trusted authority.
    async fn auth_publickey(
        &mut self,
        user: &str,
        _public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        warn!(peer = %self.peer_addr, user = %user, "rejecting plain public key auth");
        Ok(Self::reject())
    }

    async fn auth_openssh_certificate(
        &mut self,
        user: &str,
        certificate: &Certificate,
    ) -> Result<Auth, Self::Error> {
        info!(
            peer = %self.peer_addr,
            user = %user,
            "auth attempt with certificate"
        );

        if !self.server.oracle.is_trusted(certificate.signature_key()).await {
            warn!(
                peer = %self.peer_addr,
                user = %user,
                "certificate not signed by a trusted authority"
            );
            return Ok(Self::reject());
        }

        let trusted = match self.server.oracle.trusted_keys().await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(peer = %self.peer_addr, error = %e, "failed to load trusted authorities");
                return Ok(Self::reject());
            }
        };
        if let Err(e) = certs::check_host_cert(certificate, user, &trusted) {
            warn!(
                peer = %self.peer_addr,
                user = %user,
                error = %e,
                "failed to authorize user"
            );
            return Ok(Self::reject());
        }

        self.site_domain = Some(user.to_string());
        self.permissions
            .insert(EXT_HOST.to_string(), user.to_string());
        info!(peer = %self.peer_addr, site = %user, "agent authenticated");
        Ok(Auth::Accept)
    }

    async fn channel_open_session(
        &mut self,
        _channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }

    async fn subsystem_request(
        &mut self,
        channel: ChannelId,
        name: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        debug!(peer = %self.peer_addr, subsystem = %name, "new channel request");
        match name {
            CHAN_HEARTBEAT => {
                if self.heartbeat_channel.is_some() {
                    warn!(
                        peer = %self.peer_addr,
                        "heartbeat channel already active, rejecting another"
                    );
                    session.channel_failure(channel)?;
                    return Ok(());
                }
                let Some(domain) = self.site_domain.clone() else {
                    warn!(peer = %self.peer_addr, "heartbeat before authentication");
                    session.channel_failure(channel)?;
                    return Ok(());
                };
                let conn = SiteConn {
                    domain_name: domain.clone(),
                    handle: session.handle(),
                    local_addr: self.local_addr,
                    peer_addr: self.peer_addr,
                    cancel: self.cancel.clone(),
                };
                let site = self.server.registry().upsert(conn).await;
                site.record_heartbeat();
                self.site = Some(site);
                self.heartbeat_channel = Some(channel);
                session.channel_success(channel)?;
                info!(site = %domain, "heartbeat channel established");
            }
            CHAN_TRANSPORT | ACCESS_POINT_ADDR => {
                // Outbound-only channel kinds; agents never open these.
                warn!(
                    peer = %self.peer_addr,
                    subsystem = %name,
                    "agent tried to open a server-side channel kind"
                );
                session.channel_failure(channel)?;
            }
            other => {
                warn!(peer = %self.peer_addr, subsystem = %other, "unknown channel type");
                session.channel_failure(channel)?;
            }
        }
        Ok(())
    }

    async fn data(
        &mut self,
        channel: ChannelId,
        _data: &[u8],
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        if self.heartbeat_channel == Some(channel) {
            if let Some(site) = &self.site {
                trace!(site = %site.name(), "ping");
                site.record_heartbeat();
            }
        }
        Ok(())
    }

    async fn channel_eof(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        if self.heartbeat_channel.take_if(|c| *c == channel).is_some() {
            info!(peer = %self.peer_addr, "agent disconnected");
        }
        Ok(())
    }

    async fn channel_close(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        if self.heartbeat_channel.take_if(|c| *c == channel).is_some() {
            info!(peer = %self.peer_addr, "agent disconnected");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use russh::server::Handler as _;

    use moray_crypto::certs::generate_host_cert;
    use moray_crypto::keys::generate_keypair;

    struct StaticProvider(Vec<String>);

    #[async_trait]
    impl AuthorityProvider for StaticProvider {
        async fn host_authority_keys(&self) -> Result<Vec<String>, TunnelError> {
            Ok(self.0.clone())
        }
    }

    fn test_server(trusted: Vec<String>) -> Arc<TunnelServer> {
        let host_key =
            PrivateKey::from_openssh(&generate_keypair().unwrap().private_key).unwrap();
        TunnelServer::new(
            TunnelConfig {
                host_keys: vec![host_key],
                heartbeat_period: Duration::from_secs(5),
            },
            Arc::new(StaticProvider(trusted)),
        )
    }

    fn handler_for(server: Arc<TunnelServer>) -> ConnHandler {
        ConnHandler::new(
            server,
            "127.0.0.1:3024".parse().unwrap(),
            "127.0.0.1:50000".parse().unwrap(),
            CancellationToken::new(),
        )
    }

    fn minted_cert(ca: &moray_crypto::keys::EncodedKeyPair, principal: &str) -> Certificate {
        let subject = generate_keypair().unwrap();
        let line = generate_host_cert(
            &ca.private_key,
            &subject.public_key,
            &format!("{principal}_node"),
            &[principal.to_string()],
            "node",
            None,
        )
        .unwrap();
        Certificate::from_openssh(&line).unwrap()
    }

    #[tokio::test]
    async fn admitted_agent_gets_identity_extension() {
        let ca = generate_keypair().unwrap();
        let cert = minted_cert(&ca, "edge-a");
        let server = test_server(vec![ca.public_key.clone()]);
        let mut handler = handler_for(server);

        let auth = handler
            .auth_openssh_certificate("edge-a", &cert)
            .await
            .unwrap();
        assert!(matches!(auth, Auth::Accept));
        assert_eq!(
            handler.permissions().get(EXT_HOST).map(String::as_str),
            Some("edge-a")
        );
    }

    #[tokio::test]
    async fn wrong_principal_is_rejected() {
        let ca = generate_keypair().unwrap();
        let cert = minted_cert(&ca, "edge-a");
        let server = test_server(vec![ca.public_key.clone()]);
        let mut handler = handler_for(server);

        let auth = handler
            .auth_openssh_certificate("edge-b", &cert)
            .await
            .unwrap();
        assert!(matches!(auth, Auth::Reject { .. }));
        assert!(handler.permissions().is_empty());
    }

    #[tokio::test]
    async fn untrusted_authority_is_rejected() {
        let real_ca = generate_keypair().unwrap();
        let rogue_ca = generate_keypair().unwrap();
        let cert = minted_cert(&rogue_ca, "edge-a");
        let server = test_server(vec![real_ca.public_key.clone()]);
        let mut handler = handler_for(server);

        let auth = handler
            .auth_openssh_certificate("edge-a", &cert)
            .await
            .unwrap();
        assert!(matches!(auth, Auth::Reject { .. }));
    }

    #[tokio::test]
    async fn plain_public_key_is_rejected() {
        let ca = generate_keypair().unwrap();
        let server = test_server(vec![ca.public_key.clone()]);
        let mut handler = handler_for(server);

        let key = moray_crypto::certs::parse_authorized_key(
            &generate_keypair().unwrap().public_key,
        )
        .unwrap();
        let auth = handler.auth_publickey("edge-a", &key).await.unwrap();
        assert!(matches!(auth, Auth::Reject { .. }));
    }
}
