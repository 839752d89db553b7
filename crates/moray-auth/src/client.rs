//! Blocking HTTP client for the join surface.
//!
//! Uses `ureq` — joining happens before the agent's runtime is up, so the
//! client path carries no async dependency.

use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::protocol::{
    ErrorBody, GenerateTokenRequest, GenerateTokenResponse, HostCaKeysResponse, JoinRequest,
    PackedKeys, ValidateTokenRequest, ValidateTokenResponse,
};

/// TCP connection timeout for API requests.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Read timeout for API requests.
const READ_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("auth server not reachable: {0}")]
    Unreachable(String),

    #[error("{error}: {message}")]
    Api { error: String, message: String },

    #[error("request failed: {0}")]
    Transport(String),

    #[error("invalid response: {0}")]
    Decode(String),
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// Client for one auth server endpoint.
pub struct AuthClient {
    endpoint: String,
    agent: ureq::Agent,
}

impl AuthClient {
    pub fn new(endpoint: &str) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(CONNECT_TIMEOUT)
            .timeout_read(READ_TIMEOUT)
            .build();
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            agent,
        }
    }

    /// Mint a join token for `node_name`.
    pub fn generate_token(&self, node_name: &str, role: &str, ttl_secs: i64) -> Result<String> {
        let response: GenerateTokenResponse = self.post(
            "/v1/tokens",
            &GenerateTokenRequest {
                node_name: node_name.to_string(),
                role: role.to_string(),
                ttl_secs,
            },
        )?;
        Ok(response.token)
    }

    /// Check a token against a domain; returns the role it grants.
    pub fn validate_token(&self, token: &str, domain_name: &str) -> Result<String> {
        let response: ValidateTokenResponse = self.post(
            "/v1/tokens/validate",
            &ValidateTokenRequest {
                token: token.to_string(),
                domain_name: domain_name.to_string(),
            },
        )?;
        Ok(response.role)
    }

    /// Exchange a join token for key material.
    pub fn join(&self, token: &str, node_name: &str, role: &str) -> Result<PackedKeys> {
        self.post(
            "/v1/join",
            &JoinRequest {
                token: token.to_string(),
                node_name: node_name.to_string(),
                role: role.to_string(),
            },
        )
    }

    /// Trusted host authority keys.
    pub fn host_ca_keys(&self) -> Result<Vec<String>> {
        let url = format!("{}/v1/ca/host", self.endpoint);
        let resp = self.agent.get(&url).call().map_err(map_error)?;
        let body: HostCaKeysResponse = resp
            .into_json()
            .map_err(|e| ClientError::Decode(e.to_string()))?;
        Ok(body.keys)
    }

    fn post<T: DeserializeOwned>(&self, path: &str, body: &impl serde::Serialize) -> Result<T> {
        let url = format!("{}{}", self.endpoint, path);
        let json = serde_json::to_value(body).map_err(|e| ClientError::Decode(e.to_string()))?;
        let resp = self.agent.post(&url).send_json(json).map_err(map_error)?;
        resp.into_json()
            .map_err(|e| ClientError::Decode(e.to_string()))
    }
}

fn map_error(err: ureq::Error) -> ClientError {
    match err {
        ureq::Error::Status(_, resp) => match resp.into_json::<ErrorBody>() {
            Ok(body) => ClientError::Api {
                error: format!("{:?}", body.error),
                message: body.message,
            },
            Err(e) => ClientError::Decode(e.to_string()),
        },
        ureq::Error::Transport(t) => ClientError::Unreachable(t.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_is_normalized() {
        let client = AuthClient::new("http://127.0.0.1:3025/");
        assert_eq!(client.endpoint, "http://127.0.0.1:3025");
    }
}
