//! Backend seal keyring for auth-server federation.
//!
//! When a peer auth server joins, its public seal key is added here and
//! the local sign key's public half is returned, letting each side verify
//! replicated backend writes from the other.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use moray_crypto::keys::{self, EncodedKeyPair};

use crate::backend::Backend;
use crate::error::AuthError;

const BUCKET_SEAL: &str = "seal-keys";
const LOCAL_SIGN_KEY: &str = "local-sign";

/// A peer's public seal key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealKey {
    pub domain_name: String,
    pub public_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredSignKey {
    private_key: String,
    public_key: String,
}

/// Seal keyring over the backend.
#[derive(Clone)]
pub struct SealKeyService {
    backend: Arc<dyn Backend>,
}

impl SealKeyService {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// The local sign key, generated on first use.
    pub async fn sign_key(&self) -> Result<EncodedKeyPair, AuthError> {
        if let Some(value) = self.backend.get(BUCKET_SEAL, LOCAL_SIGN_KEY).await? {
            let stored: StoredSignKey = serde_json::from_slice(&value)?;
            return Ok(EncodedKeyPair {
                private_key: stored.private_key,
                public_key: stored.public_key,
            });
        }
        let pair = keys::generate_keypair()?;
        let stored = StoredSignKey {
            private_key: pair.private_key.clone(),
            public_key: pair.public_key.clone(),
        };
        self.backend
            .upsert(BUCKET_SEAL, LOCAL_SIGN_KEY, serde_json::to_vec(&stored)?, None)
            .await?;
        Ok(pair)
    }

    /// Add a peer's public seal key to the keyring.
    pub async fn add_seal_key(&self, domain_name: &str, public_key: &str) -> Result<(), AuthError> {
        let key = SealKey {
            domain_name: domain_name.to_string(),
            public_key: public_key.to_string(),
        };
        self.backend
            .upsert(
                BUCKET_SEAL,
                &format!("peer-{domain_name}"),
                serde_json::to_vec(&key)?,
                None,
            )
            .await?;
        Ok(())
    }

    /// All peer seal keys.
    pub async fn seal_keys(&self) -> Result<Vec<SealKey>, AuthError> {
        let mut out = Vec::new();
        for value in self.backend.list(BUCKET_SEAL).await? {
            if let Ok(key) = serde_json::from_slice::<SealKey>(&value) {
                out.push(key);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    #[tokio::test]
    async fn sign_key_is_stable_across_calls() {
        let svc = SealKeyService::new(Arc::new(MemoryBackend::new()));
        let first = svc.sign_key().await.unwrap();
        let second = svc.sign_key().await.unwrap();
        assert_eq!(first.public_key, second.public_key);
    }

    #[tokio::test]
    async fn peer_keys_accumulate() {
        let svc = SealKeyService::new(Arc::new(MemoryBackend::new()));
        svc.add_seal_key("peer-a", "pk-a").await.unwrap();
        svc.add_seal_key("peer-b", "pk-b").await.unwrap();
        let keys = svc.seal_keys().await.unwrap();
        let domains: Vec<&str> = keys.iter().map(|k| k.domain_name.as_str()).collect();
        assert!(domains.contains(&"peer-a"));
        assert!(domains.contains(&"peer-b"));
    }
}
