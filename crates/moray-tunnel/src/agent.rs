//! Edge agent: the dialing end of the reverse tunnel.
//!
//! Connects out to the proxy with the host certificate minted at join
//! time, keeps the heartbeat channel warm, and answers server-opened
//! channels — dialing transport targets locally and bridging
//! access-point channels to the edge's control API.

use std::sync::Arc;
use std::time::Duration;

use russh::client::AuthResult;
use russh::keys::{Certificate, PrivateKey};
use russh::{Channel, ChannelMsg};
use tokio::io::{copy_bidirectional, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::TunnelError;
use crate::{
    ACCESS_POINT_ADDR, CHAN_HEARTBEAT, HEARTBEAT_PING, TRANSPORT_DIAL_FAILED, TRANSPORT_DIAL_OK,
};

/// Agent settings.
pub struct AgentConfig {
    /// Proxy tunnel endpoint, `host:port`.
    pub proxy_addr: String,
    /// Domain this edge declares; becomes the SSH user field.
    pub domain_name: String,
    /// Private key matching the certificate.
    pub private_key: Arc<PrivateKey>,
    /// Host certificate minted at join time.
    pub certificate: Certificate,
    /// Local address of the edge's control API, `host:port`. Access-point
    /// channels are bridged here; absent means they are refused.
    pub access_point_addr: Option<String>,
    /// Ping cadence on the heartbeat channel.
    pub heartbeat_period: Duration,
}

/// A running edge agent. Reconnecting after a dropped tunnel is the
/// caller's loop around [`Agent::run`].
pub struct Agent {
    config: AgentConfig,
    cancel: CancellationToken,
}

impl Agent {
    pub fn new(config: AgentConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that stops the agent when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Dial the proxy, authenticate, and serve until stopped or the
    /// connection dies.
    pub async fn run(&self) -> Result<(), TunnelError> {
        let handler = AgentHandler {
            access_point_addr: self.config.access_point_addr.clone(),
        };
        let ssh_config = Arc::new(russh::client::Config::default());
        let mut session =
            russh::client::connect(ssh_config, self.config.proxy_addr.as_str(), handler).await?;

        let outcome = session
            .authenticate_openssh_cert(
                self.config.domain_name.as_str(),
                self.config.private_key.clone(),
                self.config.certificate.clone(),
            )
            .await?;
        if !matches!(outcome, AuthResult::Success) {
            return Err(TunnelError::AuthRejected(format!(
                "proxy rejected certificate for {}",
                self.config.domain_name
            )));
        }
        info!(
            proxy = %self.config.proxy_addr,
            domain = %self.config.domain_name,
            "connected to proxy"
        );

        let mut channel = session.channel_open_session().await?;
        channel.request_subsystem(true, CHAN_HEARTBEAT).await?;
        match channel.wait().await {
            Some(ChannelMsg::Success) => {}
            other => {
                warn!(?other, "proxy refused heartbeat channel");
                return Err(TunnelError::ConnectionClosed);
            }
        }

        let mut ticker = tokio::time::interval(self.config.heartbeat_period);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("agent stopping");
                    let _ = session
                        .disconnect(russh::Disconnect::ByApplication, "shutting down", "")
                        .await;
                    return Ok(());
                }
                _ = ticker.tick() => {
                    if channel.data(HEARTBEAT_PING).await.is_err() {
                        warn!("heartbeat channel lost");
                        return Err(TunnelError::ConnectionClosed);
                    }
                }
            }
        }
    }
}

/// Client-side handler answering server-opened channels.
struct AgentHandler {
    access_point_addr: Option<String>,
}

impl russh::client::Handler for AgentHandler {
    type Error = russh::Error;

    // The tunnel carries no secrets of its own and the proxy was chosen
    // by the operator at join time; accept its host key.
    async fn check_server_key(
        &mut self,
        _server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }

    async fn server_channel_open_forwarded_tcpip(
        &mut self,
        channel: Channel<russh::client::Msg>,
        connected_address: &str,
        connected_port: u32,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut russh::client::Session,
    ) -> Result<(), Self::Error> {
        if connected_address == ACCESS_POINT_ADDR {
            let Some(addr) = self.access_point_addr.clone() else {
                debug!("access point channel refused: no control API configured");
                tokio::spawn(async move {
                    let _ = channel.eof().await;
                    let _ = channel.close().await;
                });
                return Ok(());
            };
            tokio::spawn(async move {
                match TcpStream::connect(&addr).await {
                    Ok(mut api) => {
                        let mut stream = channel.into_stream();
                        if let Err(e) = copy_bidirectional(&mut stream, &mut api).await {
                            debug!(error = %e, "access point bridge ended");
                        }
                    }
                    Err(e) => {
                        warn!(addr = %addr, error = %e, "control API unreachable");
                        let _ = channel.eof().await;
                        let _ = channel.close().await;
                    }
                }
            });
            return Ok(());
        }

        // Transport dial: connect the requested target locally and reply
        // with a status byte before the raw stream begins.
        let target = format!("{connected_address}:{connected_port}");
        tokio::spawn(async move {
            match TcpStream::connect(&target).await {
                Ok(mut tcp) => {
                    debug!(target = %target, "dialed transport target");
                    let mut stream = channel.into_stream();
                    if stream.write_all(&[TRANSPORT_DIAL_OK]).await.is_err() {
                        return;
                    }
                    if let Err(e) = copy_bidirectional(&mut stream, &mut tcp).await {
                        debug!(target = %target, error = %e, "transport bridge ended");
                    }
                }
                Err(e) => {
                    warn!(target = %target, error = %e, "transport dial failed");
                    let mut stream = channel.into_stream();
                    let _ = stream.write_all(&[TRANSPORT_DIAL_FAILED]).await;
                    let _ = stream.shutdown().await;
                }
            }
        });
        Ok(())
    }
}
