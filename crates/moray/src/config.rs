//! Proxy configuration: TOML file with defaults for every field.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Authority hostname; joins mint principals under this name.
    #[serde(default = "default_hostname")]
    pub hostname: String,

    /// Reverse-tunnel SSH listen address.
    #[serde(default = "default_tunnel_addr")]
    pub tunnel_addr: String,

    /// Join API listen address.
    #[serde(default = "default_api_addr")]
    pub api_addr: String,

    /// Expected agent ping cadence in seconds.
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_period_secs: u64,

    /// Optional passphrase encrypting CA private keys at rest.
    #[serde(default)]
    pub ca_passphrase: Option<String>,
}

fn default_hostname() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "moray-proxy".to_string())
}

fn default_tunnel_addr() -> String {
    "0.0.0.0:3024".to_string()
}

fn default_api_addr() -> String {
    "127.0.0.1:3025".to_string()
}

fn default_heartbeat_secs() -> u64 {
    moray_tunnel::DEFAULT_HEARTBEAT_PERIOD.as_secs()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hostname: default_hostname(),
            tunnel_addr: default_tunnel_addr(),
            api_addr: default_api_addr(),
            heartbeat_period_secs: default_heartbeat_secs(),
            ca_passphrase: None,
        }
    }
}

impl Config {
    /// Load from `path`, or defaults when no file is given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                toml::from_str(&text)
                    .with_context(|| format!("parsing config {}", path.display()))
            }
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = Config::default();
        assert_eq!(config.tunnel_addr, "0.0.0.0:3024");
        assert_eq!(config.api_addr, "127.0.0.1:3025");
        assert_eq!(config.heartbeat_period_secs, 5);
        assert!(config.ca_passphrase.is_none());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: Config = toml::from_str(r#"tunnel_addr = "0.0.0.0:4024""#).unwrap();
        assert_eq!(config.tunnel_addr, "0.0.0.0:4024");
        assert_eq!(config.api_addr, "127.0.0.1:3025");
    }

    #[test]
    fn full_toml_parses() {
        let config: Config = toml::from_str(
            r#"
            hostname = "proxy.example.com"
            tunnel_addr = "0.0.0.0:3024"
            api_addr = "0.0.0.0:3025"
            heartbeat_period_secs = 10
            ca_passphrase = "swordfish"
            "#,
        )
        .unwrap();
        assert_eq!(config.hostname, "proxy.example.com");
        assert_eq!(config.heartbeat_period_secs, 10);
        assert_eq!(config.ca_passphrase.as_deref(), Some("swordfish"));
    }
}
