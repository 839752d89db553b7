//! Shared building blocks for the moray access plane.
//!
//! Kept deliberately small: wire error codes, `host:port` handling,
//! and hex encoding. Domain logic lives in the domain crates.

pub mod encoding;
pub mod error;
pub mod net;
