//! Per-site state for one connected edge cluster.
//!
//! A site owns the agent's SSH connection, tracks liveness from
//! heartbeats, and opens channels on demand for access-point RPC and
//! target dialing. Sites are accessed through the [`RemoteSite`]
//! capability set so a future local (tunnel-less) site can plug in.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use russh::client::AuthResult;
use russh::keys::{Certificate, PrivateKey, PrivateKeyWithHashAlg};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use moray_common::net::HostPort;

use crate::accesspoint::{AccessPointClient, ServerEntry};
use crate::error::TunnelError;
use crate::stream::TunnelStream;
use crate::TRANSPORT_DIAL_OK;

/// Liveness of a site as seen from the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiteStatus {
    Online,
    Offline,
}

impl std::fmt::Display for SiteStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SiteStatus::Online => f.write_str("online"),
            SiteStatus::Offline => f.write_str("offline"),
        }
    }
}

/// One live agent connection: the handle for opening channels, the
/// parent TCP addresses, and the token that tears the connection down.
#[derive(Clone)]
pub struct SiteConn {
    pub domain_name: String,
    pub handle: russh::server::Handle,
    pub local_addr: SocketAddr,
    pub peer_addr: SocketAddr,
    pub cancel: CancellationToken,
}

impl SiteConn {
    /// Schedule the connection's teardown. Synchronous by design: this
    /// runs under the registry write lock on supersede.
    pub(crate) fn close(&self) {
        self.cancel.cancel();
    }
}

/// Authentication methods for in-edge SSH servers.
#[derive(Clone)]
pub enum AuthMethod {
    Password(String),
    Key(Arc<PrivateKey>),
    Certificate {
        key: Arc<PrivateKey>,
        cert: Certificate,
    },
}

/// Client handler for SSH sessions layered over a transport channel.
/// The in-edge server's host key was already vouched for by the edge
/// agent accepting the dial; no second check here.
pub struct RemoteClientHandler;

impl russh::client::Handler for RemoteClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// Capability set exposed by a connected site.
#[async_trait]
pub trait RemoteSite: Send + Sync {
    /// The domain name the agent declared at connect time.
    fn name(&self) -> &str;

    /// Wall-clock time of the last received heartbeat.
    fn last_connected(&self) -> DateTime<Utc>;

    /// Online iff the last heartbeat is within twice the heartbeat period.
    fn status(&self) -> SiteStatus;

    /// Client for the edge's control API, speaking HTTP over
    /// access-point channels.
    fn access_point(&self) -> Result<AccessPointClient, TunnelError>;

    /// The edge's published server inventory.
    async fn servers(&self) -> Result<Vec<ServerEntry>, TunnelError>;

    /// Open a raw TCP stream to `host:port` inside the edge. The target
    /// must appear in the edge's server inventory.
    async fn dial(&self, target: &str) -> Result<TunnelStream, TunnelError>;

    /// Dial plus an SSH client handshake over the resulting stream.
    async fn connect_to_server(
        &self,
        target: &str,
        user: &str,
        auth: &[AuthMethod],
    ) -> Result<russh::client::Handle<RemoteClientHandler>, TunnelError>;
}

/// The tunnel-backed [`RemoteSite`] implementation.
pub struct TunnelSite {
    domain_name: String,
    heartbeat_period: Duration,
    /// Milliseconds since the epoch of the last heartbeat; 0 = never.
    last_active_ms: AtomicI64,
    conn: Mutex<Option<SiteConn>>,
    access_point: Mutex<Option<AccessPointClient>>,
}

impl TunnelSite {
    pub(crate) fn new(domain_name: String, heartbeat_period: Duration) -> Self {
        Self {
            domain_name,
            heartbeat_period,
            last_active_ms: AtomicI64::new(0),
            conn: Mutex::new(None),
            access_point: Mutex::new(None),
        }
    }

    /// (Re)initialize against a new agent connection: close the prior
    /// connection if one is held, swap in the new one, and rebuild the
    /// access-point client. Runs under the registry write lock; nothing
    /// here awaits.
    pub(crate) fn reinit(&self, conn: SiteConn) {
        let mut held = self.conn.lock().expect("site conn lock poisoned");
        if let Some(prev) = held.take() {
            info!(site = %self.domain_name, "found site, closing previous connection");
            prev.close();
        }
        *self
            .access_point
            .lock()
            .expect("site access point lock poisoned") = Some(AccessPointClient::new(conn.clone()));
        *held = Some(conn);
    }

    /// Record a heartbeat at the current wall-clock time.
    pub(crate) fn record_heartbeat(&self) {
        self.last_active_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    /// The live connection, or `ConnectionClosed` when the agent has
    /// never connected.
    fn conn(&self) -> Result<SiteConn, TunnelError> {
        self.conn
            .lock()
            .expect("site conn lock poisoned")
            .clone()
            .ok_or(TunnelError::ConnectionClosed)
    }

    /// Open a transport channel and consume the agent's dial reply.
    async fn open_transport(&self, target: &HostPort) -> Result<TunnelStream, TunnelError> {
        let conn = self.conn()?;
        let channel = conn
            .handle
            .channel_open_forwarded_tcpip(
                target.host.clone(),
                u32::from(target.port),
                conn.local_addr.ip().to_string(),
                u32::from(conn.local_addr.port()),
            )
            .await
            .map_err(|_| TunnelError::ConnectionClosed)?;

        let mut stream = TunnelStream::new(channel.into_stream(), conn.local_addr, conn.peer_addr);
        let mut reply = [0u8; 1];
        stream
            .read_exact(&mut reply)
            .await
            .map_err(|_| TunnelError::TargetUnavailable(target.to_string()))?;
        if reply[0] != TRANSPORT_DIAL_OK {
            return Err(TunnelError::TargetUnavailable(target.to_string()));
        }
        Ok(stream)
    }

    /// True iff `target` matches a `hostname:port` from the inventory.
    /// Malformed inventory entries are logged and skipped.
    fn target_is_known(target: &str, servers: &[ServerEntry]) -> bool {
        for server in servers {
            let port = match HostPort::parse(&server.addr) {
                Ok(hp) => hp.port,
                Err(e) => {
                    warn!(
                        server = %server.hostname,
                        addr = %server.addr,
                        error = %e,
                        "server has incorrect address format"
                    );
                    continue;
                }
            };
            if !server.hostname.is_empty() && target == format!("{}:{}", server.hostname, port) {
                return true;
            }
        }
        false
    }
}

#[async_trait]
impl RemoteSite for TunnelSite {
    fn name(&self) -> &str {
        &self.domain_name
    }

    fn last_connected(&self) -> DateTime<Utc> {
        let ms = self.last_active_ms.load(Ordering::Relaxed);
        Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
    }

    fn status(&self) -> SiteStatus {
        let ms = self.last_active_ms.load(Ordering::Relaxed);
        if ms == 0 {
            return SiteStatus::Offline;
        }
        let silence = Utc::now().timestamp_millis().saturating_sub(ms);
        if silence > 2 * self.heartbeat_period.as_millis() as i64 {
            SiteStatus::Offline
        } else {
            SiteStatus::Online
        }
    }

    fn access_point(&self) -> Result<AccessPointClient, TunnelError> {
        self.access_point
            .lock()
            .expect("site access point lock poisoned")
            .clone()
            .ok_or(TunnelError::ConnectionClosed)
    }

    async fn servers(&self) -> Result<Vec<ServerEntry>, TunnelError> {
        self.access_point()?.servers().await
    }

    async fn dial(&self, target: &str) -> Result<TunnelStream, TunnelError> {
        let servers = self.servers().await?;
        if !Self::target_is_known(target, &servers) {
            return Err(TunnelError::TargetUnknown(target.to_string()));
        }
        let hp = HostPort::parse(target)?;
        debug!(site = %self.domain_name, target = %target, "dialing through tunnel");
        self.open_transport(&hp).await
    }

    async fn connect_to_server(
        &self,
        target: &str,
        user: &str,
        auth: &[AuthMethod],
    ) -> Result<russh::client::Handle<RemoteClientHandler>, TunnelError> {
        let hp = HostPort::parse(target)?;
        let stream = self.open_transport(&hp).await?;

        let config = Arc::new(russh::client::Config::default());
        let mut session = russh::client::connect_stream(config, stream, RemoteClientHandler)
            .await
            .map_err(TunnelError::Ssh)?;

        for method in auth {
            let outcome = match method {
                AuthMethod::Password(password) => {
                    session.authenticate_password(user, password.clone()).await?
                }
                AuthMethod::Key(key) => {
                    session
                        .authenticate_publickey(user, PrivateKeyWithHashAlg::new(key.clone(), None))
                        .await?
                }
                AuthMethod::Certificate { key, cert } => {
                    session
                        .authenticate_openssh_cert(user, key.clone(), cert.clone())
                        .await?
                }
            };
            if matches!(outcome, AuthResult::Success) {
                return Ok(session);
            }
        }
        Err(TunnelError::AuthRejected(format!(
            "no authentication method accepted for {user}@{target}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site(period: Duration) -> TunnelSite {
        TunnelSite::new("edge-a".to_string(), period)
    }

    #[test]
    fn fresh_site_is_offline() {
        let s = site(Duration::from_secs(5));
        assert_eq!(s.status(), SiteStatus::Offline);
        assert!(s.conn().is_err());
        assert!(s.access_point().is_err());
    }

    #[test]
    fn heartbeat_marks_online() {
        let s = site(Duration::from_secs(5));
        s.record_heartbeat();
        assert_eq!(s.status(), SiteStatus::Online);
        assert!(s.last_connected() > Utc::now() - chrono::Duration::seconds(1));
    }

    #[test]
    fn silence_past_twice_the_period_is_offline() {
        let s = site(Duration::from_millis(10));
        // A heartbeat 21ms ago against a 10ms period: just past 2×.
        s.last_active_ms.store(
            Utc::now().timestamp_millis() - 21,
            Ordering::Relaxed,
        );
        assert_eq!(s.status(), SiteStatus::Offline);
    }

    #[test]
    fn silence_at_exactly_twice_the_period_is_online() {
        let s = site(Duration::from_secs(60));
        // Exactly 2× the period of silence keeps the site online.
        s.last_active_ms.store(
            Utc::now().timestamp_millis() - 2 * 60_000,
            Ordering::Relaxed,
        );
        assert_eq!(s.status(), SiteStatus::Online);
    }

    #[test]
    fn stale_site_flips_back_online_on_next_heartbeat() {
        let s = site(Duration::from_millis(10));
        s.last_active_ms.store(
            Utc::now().timestamp_millis() - 1000,
            Ordering::Relaxed,
        );
        assert_eq!(s.status(), SiteStatus::Offline);
        // The entry is reused as-is; a ping alone revives it.
        s.record_heartbeat();
        assert_eq!(s.status(), SiteStatus::Online);
    }

    #[test]
    fn known_target_matching() {
        let servers = vec![
            ServerEntry {
                hostname: "h1".to_string(),
                addr: "10.0.0.1:22".to_string(),
            },
            ServerEntry {
                hostname: String::new(),
                addr: "10.0.0.2:22".to_string(),
            },
            ServerEntry {
                hostname: "bad".to_string(),
                addr: "not-an-address".to_string(),
            },
        ];
        assert!(TunnelSite::target_is_known("h1:22", &servers));
        // Port comes from the inventory address, not the hostname.
        assert!(!TunnelSite::target_is_known("h1:23", &servers));
        // Nameless entries never match.
        assert!(!TunnelSite::target_is_known(":22", &servers));
        // Malformed entries are skipped, not fatal.
        assert!(!TunnelSite::target_is_known("bad:22", &servers));
    }

    #[test]
    fn status_display() {
        assert_eq!(SiteStatus::Online.to_string(), "online");
        assert_eq!(SiteStatus::Offline.to_string(), "offline");
    }
}
