//! Join tokens.
//!
//! A token is 16 random bytes, hex-encoded, bound to the domain it was
//! minted for and the role it grants. The external form appends the role
//! (`<hex>.<role>`) so joining agents can present a single string. Tokens
//! are stored with a TTL and deleted on successful registration.

use std::sync::Arc;

use chrono::Duration;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use moray_common::encoding::hex_encode;

use crate::backend::Backend;
use crate::error::AuthError;

const BUCKET_TOKENS: &str = "tokens";

/// Random bytes per token.
pub const TOKEN_LEN_BYTES: usize = 16;

/// Separator between the hex id and the role in the external form.
const TOKEN_SEPARATOR: char = '.';

/// A provisioned join token record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionToken {
    pub token: String,
    pub domain_name: String,
    pub role: String,
}

/// Join the hex id and role into the external token form.
pub fn join_token_role(token: &str, role: &str) -> String {
    format!("{token}{TOKEN_SEPARATOR}{role}")
}

/// Split an external token back into `(hex_id, role)`.
pub fn split_token_role(outer: &str) -> Result<(String, String), AuthError> {
    let (token, role) = outer
        .split_once(TOKEN_SEPARATOR)
        .ok_or(AuthError::TokenInvalid)?;
    if token.is_empty() || role.is_empty() {
        return Err(AuthError::TokenInvalid);
    }
    Ok((token.to_string(), role.to_string()))
}

/// Draw a fresh hex token id.
pub fn random_token() -> String {
    let mut bytes = [0u8; TOKEN_LEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex_encode(&bytes)
}

/// Token storage over the backend.
#[derive(Clone)]
pub struct ProvisioningService {
    backend: Arc<dyn Backend>,
}

impl ProvisioningService {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    pub async fn upsert_token(
        &self,
        token: &str,
        domain_name: &str,
        role: &str,
        ttl: Duration,
    ) -> Result<(), AuthError> {
        let record = ProvisionToken {
            token: token.to_string(),
            domain_name: domain_name.to_string(),
            role: role.to_string(),
        };
        let value = serde_json::to_vec(&record)?;
        self.backend
            .upsert(BUCKET_TOKENS, token, value, Some(ttl))
            .await?;
        Ok(())
    }

    pub async fn get_token(&self, token: &str) -> Result<ProvisionToken, AuthError> {
        let value = self
            .backend
            .get(BUCKET_TOKENS, token)
            .await?
            .ok_or(AuthError::TokenInvalid)?;
        Ok(serde_json::from_slice(&value)?)
    }

    pub async fn delete_token(&self, token: &str) -> Result<(), AuthError> {
        self.backend.delete(BUCKET_TOKENS, token).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    #[test]
    fn token_role_split_roundtrip() {
        let outer = join_token_role("deadbeef", "node");
        assert_eq!(outer, "deadbeef.node");
        let (token, role) = split_token_role(&outer).unwrap();
        assert_eq!(token, "deadbeef");
        assert_eq!(role, "node");
    }

    #[test]
    fn split_rejects_malformed() {
        assert!(split_token_role("no-separator").is_err());
        assert!(split_token_role(".node").is_err());
        assert!(split_token_role("deadbeef.").is_err());
    }

    #[test]
    fn random_tokens_are_hex_and_unique() {
        let a = random_token();
        let b = random_token();
        assert_eq!(a.len(), TOKEN_LEN_BYTES * 2);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn store_fetch_delete() {
        let svc = ProvisioningService::new(Arc::new(MemoryBackend::new()));
        svc.upsert_token("abcd", "edge-a", "node", Duration::hours(1))
            .await
            .unwrap();

        let record = svc.get_token("abcd").await.unwrap();
        assert_eq!(record.domain_name, "edge-a");
        assert_eq!(record.role, "node");

        svc.delete_token("abcd").await.unwrap();
        assert!(matches!(
            svc.get_token("abcd").await,
            Err(AuthError::TokenInvalid)
        ));
    }

    #[tokio::test]
    async fn expired_token_is_invalid() {
        let svc = ProvisioningService::new(Arc::new(MemoryBackend::new()));
        svc.upsert_token("abcd", "edge-a", "node", Duration::seconds(-1))
            .await
            .unwrap();
        assert!(matches!(
            svc.get_token("abcd").await,
            Err(AuthError::TokenInvalid)
        ));
    }
}
