//! HTTP client speaking over access-point channels.
//!
//! Every request opens a fresh access-point channel on the site's
//! connection and runs one HTTP/1 exchange over it. Routing is implicit
//! in the channel — the Host header is a stub value the edge ignores.

use http::{header, Method, Request};
use http_body_util::{BodyExt, Empty};
use hyper::body::Bytes;
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::TunnelError;
use crate::site::SiteConn;
use crate::stream::TunnelStream;
use crate::ACCESS_POINT_ADDR;

/// Stub authority for requests whose routing is the channel itself.
const STUB_HOST: &str = "stub:0";

/// Path of the edge's server inventory.
const SERVERS_PATH: &str = "/v1/servers";

/// One entry of the edge's published server inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerEntry {
    pub hostname: String,
    /// Listen address inside the edge, `host:port`.
    pub addr: String,
}

/// Client for the edge's control API over one site connection.
///
/// Rebuilt whenever the site re-initializes against a new connection.
#[derive(Clone)]
pub struct AccessPointClient {
    conn: SiteConn,
}

impl AccessPointClient {
    pub(crate) fn new(conn: SiteConn) -> Self {
        Self { conn }
    }

    /// The edge's published server inventory.
    pub async fn servers(&self) -> Result<Vec<ServerEntry>, TunnelError> {
        self.get_json(SERVERS_PATH).await
    }

    /// GET `path` over a fresh access-point channel, decoding JSON.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, TunnelError> {
        let stream = self.open().await?;
        let io = TokioIo::new(stream);
        let (mut sender, connection) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| TunnelError::AccessPoint(format!("handshake: {e}")))?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!(error = %e, "access point connection ended");
            }
        });

        let request = Request::builder()
            .method(Method::GET)
            .uri(path)
            .header(header::HOST, STUB_HOST)
            .body(Empty::<Bytes>::new())
            .map_err(|e| TunnelError::AccessPoint(format!("request build: {e}")))?;

        let response = sender
            .send_request(request)
            .await
            .map_err(|e| TunnelError::AccessPoint(format!("request: {e}")))?;
        if !response.status().is_success() {
            return Err(TunnelError::AccessPoint(format!(
                "unexpected status {} for {path}",
                response.status()
            )));
        }

        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| TunnelError::AccessPoint(format!("body: {e}")))?
            .to_bytes();
        serde_json::from_slice(&body)
            .map_err(|e| TunnelError::AccessPoint(format!("decode {path}: {e}")))
    }

    /// Open a raw access-point channel on the underlying connection.
    pub async fn open(&self) -> Result<TunnelStream, TunnelError> {
        let channel = self
            .conn
            .handle
            .channel_open_forwarded_tcpip(
                ACCESS_POINT_ADDR,
                0,
                self.conn.local_addr.ip().to_string(),
                u32::from(self.conn.local_addr.port()),
            )
            .await
            .map_err(|_| TunnelError::ConnectionClosed)?;
        Ok(TunnelStream::new(
            channel.into_stream(),
            self.conn.local_addr,
            self.conn.peer_addr,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_entry_serde_roundtrip() {
        let entry = ServerEntry {
            hostname: "h1".to_string(),
            addr: "10.0.0.1:22".to_string(),
        };
        let json = serde_json::to_string(&entry).unwrap();
        let parsed: ServerEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, entry);
    }

    #[test]
    fn inventory_decodes_from_wire_shape() {
        let json = r#"[
            {"hostname": "h1", "addr": "10.0.0.1:22"},
            {"hostname": "h2", "addr": "10.0.0.2:3022"}
        ]"#;
        let entries: Vec<ServerEntry> = serde_json::from_str(json).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].hostname, "h2");
    }
}
