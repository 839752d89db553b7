//! Reverse-tunnel server and per-site state.
//!
//! Edge clusters behind firewalls dial out to the proxy over SSH and keep
//! the connection open. The proxy runs these tunnels in reverse: to reach
//! a host inside an edge, it opens a new channel over the existing tunnel
//! and asks the remote agent to dial the target locally.
//!
//! Three logical channel kinds ride the tunnel. The SSH library exposes
//! fixed channel types rather than arbitrary type strings, so they map
//! onto standard primitives with the logical names kept as constants:
//! heartbeats ride a session channel opened with the [`CHAN_HEARTBEAT`]
//! subsystem; transport and access-point channels are server-opened
//! forwarded-tcpip channels, the latter addressed to the reserved
//! [`ACCESS_POINT_ADDR`].

pub mod accesspoint;
pub mod agent;
pub mod error;
pub mod registry;
pub mod server;
pub mod site;
pub mod stream;
pub mod trust;

use std::time::Duration;

pub use error::TunnelError;

/// Subsystem name for the agent's liveness channel.
pub const CHAN_HEARTBEAT: &str = "heartbeat";

/// Logical name for raw TCP tunnel channels (server-opened).
pub const CHAN_TRANSPORT: &str = "transport";

/// Reserved address for channels carrying HTTP to the edge's control API.
pub const ACCESS_POINT_ADDR: &str = "access-point";

/// Permissions extension recording the authenticated site identity.
pub const EXT_HOST: &str = "host@teleport";

/// Payload of one heartbeat ping.
pub const HEARTBEAT_PING: &[u8] = b"ping";

/// Transport dial reply: target connected, raw stream follows.
pub const TRANSPORT_DIAL_OK: u8 = 0x01;

/// Transport dial reply: target unreachable from the edge.
pub const TRANSPORT_DIAL_FAILED: u8 = 0x00;

/// Default agent ping cadence. A site is reported offline after
/// `2 ×` this period without a ping.
pub const DEFAULT_HEARTBEAT_PERIOD: Duration = Duration::from_secs(5);
