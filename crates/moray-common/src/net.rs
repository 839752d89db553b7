//! `host:port` handling for dial targets and server inventory addresses.
//!
//! Dial targets travel as a single `host:port` string; the port is
//! everything after the last colon so bracketed IPv6 literals survive.

use std::fmt;

/// A dial target split into host and port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPort {
    pub host: String,
    pub port: u16,
}

impl HostPort {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse `host:port`. The host part must be non-empty.
    pub fn parse(addr: &str) -> Result<Self, AddrParseError> {
        let (host, port_str) = addr
            .rsplit_once(':')
            .ok_or_else(|| AddrParseError(addr.to_string()))?;
        if host.is_empty() {
            return Err(AddrParseError(addr.to_string()));
        }
        let port = port_str
            .parse::<u16>()
            .map_err(|_| AddrParseError(addr.to_string()))?;
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for HostPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Malformed `host:port` string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddrParseError(pub String);

impl fmt::Display for AddrParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid host:port address: {}", self.0)
    }
}

impl std::error::Error for AddrParseError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple() {
        let hp = HostPort::parse("h1:22").unwrap();
        assert_eq!(hp.host, "h1");
        assert_eq!(hp.port, 22);
    }

    #[test]
    fn parse_ipv6_uses_last_colon() {
        let hp = HostPort::parse("[fd00::1]:2022").unwrap();
        assert_eq!(hp.host, "[fd00::1]");
        assert_eq!(hp.port, 2022);
    }

    #[test]
    fn parse_rejects_missing_port() {
        assert!(HostPort::parse("h1").is_err());
        assert!(HostPort::parse("h1:").is_err());
        assert!(HostPort::parse(":22").is_err());
        assert!(HostPort::parse("h1:notaport").is_err());
    }

    #[test]
    fn display_roundtrip() {
        let hp = HostPort::new("edge-a", 3022);
        assert_eq!(hp.to_string(), "edge-a:3022");
        assert_eq!(HostPort::parse(&hp.to_string()).unwrap(), hp);
    }
}
