//! Channel-backed byte stream.
//!
//! Adapts one SSH channel into a duplex stream whose reported addresses
//! are those of the parent TCP connection. Closing or dropping the stream
//! closes only the channel; the parent connection keeps serving other
//! channels.

use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use russh::server::Msg;
use russh::ChannelStream;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// A logical channel presented as an ordinary network stream.
pub struct TunnelStream {
    inner: ChannelStream<Msg>,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
}

impl TunnelStream {
    pub(crate) fn new(
        inner: ChannelStream<Msg>,
        local_addr: SocketAddr,
        peer_addr: SocketAddr,
    ) -> Self {
        Self {
            inner,
            local_addr,
            peer_addr,
        }
    }

    /// Local address of the parent TCP connection.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Remote address of the parent TCP connection.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Accepted for interface parity; the transport has no per-channel
    /// deadlines. Callers needing a timeout close the stream from
    /// another task, which fails blocked reads and writes promptly.
    pub fn set_deadline(&self, _deadline: Instant) {}

    /// See [`TunnelStream::set_deadline`].
    pub fn set_read_deadline(&self, _deadline: Instant) {}

    /// See [`TunnelStream::set_deadline`].
    pub fn set_write_deadline(&self, _deadline: Instant) {}
}

impl AsyncRead for TunnelStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for TunnelStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
