//! Trust oracle for agent-presented certificates.
//!
//! The oracle answers one question: does an offered signing key belong to
//! a trusted authority? The authority set (local host CA plus federated
//! host CAs) is fetched through [`AuthorityProvider`] on every check so a
//! rotated CA takes effect on the next authentication. Never cache it here.

use std::sync::Arc;

use async_trait::async_trait;
use ssh_key::public::KeyData;
use ssh_key::{Fingerprint, HashAlg, PublicKey};
use tracing::warn;

use moray_crypto::certs;

use crate::error::TunnelError;

/// Source of the trusted host-authority key set.
#[async_trait]
pub trait AuthorityProvider: Send + Sync {
    /// Authorized-key lines for the local host CA and every federated
    /// host CA, read fresh from the store.
    async fn host_authority_keys(&self) -> Result<Vec<String>, TunnelError>;
}

/// Decides whether an offered public key is a trusted authority.
#[derive(Clone)]
pub struct TrustOracle {
    provider: Arc<dyn AuthorityProvider>,
}

impl TrustOracle {
    pub fn new(provider: Arc<dyn AuthorityProvider>) -> Self {
        Self { provider }
    }

    /// True iff `offered` is byte-equal (SSH wire form) to one of the
    /// trusted authority keys. Any provider or parse failure fails
    /// closed.
    pub async fn is_trusted(&self, offered: &KeyData) -> bool {
        let trusted = match self.trusted_keys().await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "failed to retrieve trusted authority keys");
                return false;
            }
        };
        trusted
            .iter()
            .any(|key| certs::keys_equal(key.key_data(), offered))
    }

    /// The trusted authority keys, parsed. Errors on the first
    /// unparseable blob so a corrupt store cannot silently shrink the
    /// comparison set.
    pub async fn trusted_keys(&self) -> Result<Vec<PublicKey>, TunnelError> {
        let lines = self.provider.host_authority_keys().await?;
        let mut keys = Vec::with_capacity(lines.len());
        for line in &lines {
            let key = certs::parse_authorized_key(line)
                .map_err(|e| TunnelError::AuthRejected(format!("bad authority key: {e}")))?;
            keys.push(key);
        }
        Ok(keys)
    }

    /// SHA-256 fingerprints of the trusted authorities, for certificate
    /// validation.
    pub async fn trusted_fingerprints(&self) -> Result<Vec<Fingerprint>, TunnelError> {
        Ok(self
            .trusted_keys()
            .await?
            .iter()
            .map(|k| k.fingerprint(HashAlg::Sha256))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use moray_crypto::keys::generate_keypair;

    struct StaticProvider(Vec<String>);

    #[async_trait]
    impl AuthorityProvider for StaticProvider {
        async fn host_authority_keys(&self) -> Result<Vec<String>, TunnelError> {
            Ok(self.0.clone())
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl AuthorityProvider for FailingProvider {
        async fn host_authority_keys(&self) -> Result<Vec<String>, TunnelError> {
            Err(TunnelError::ConnectionClosed)
        }
    }

    #[tokio::test]
    async fn trusted_key_is_recognized() {
        let ca = generate_keypair().unwrap();
        let other = generate_keypair().unwrap();
        let oracle = TrustOracle::new(Arc::new(StaticProvider(vec![ca.public_key.clone()])));

        let ca_pub = certs::parse_authorized_key(&ca.public_key).unwrap();
        let other_pub = certs::parse_authorized_key(&other.public_key).unwrap();
        assert!(oracle.is_trusted(ca_pub.key_data()).await);
        assert!(!oracle.is_trusted(other_pub.key_data()).await);
    }

    #[tokio::test]
    async fn provider_failure_fails_closed() {
        let ca = generate_keypair().unwrap();
        let oracle = TrustOracle::new(Arc::new(FailingProvider));
        let ca_pub = certs::parse_authorized_key(&ca.public_key).unwrap();
        assert!(!oracle.is_trusted(ca_pub.key_data()).await);
    }

    #[tokio::test]
    async fn unparseable_blob_fails_closed() {
        let ca = generate_keypair().unwrap();
        let oracle = TrustOracle::new(Arc::new(StaticProvider(vec![
            ca.public_key.clone(),
            "not an authorized key".to_string(),
        ])));
        let ca_pub = certs::parse_authorized_key(&ca.public_key).unwrap();
        // The set contains the key, but a corrupt entry aborts the check.
        assert!(!oracle.is_trusted(ca_pub.key_data()).await);
        assert!(oracle.trusted_keys().await.is_err());
    }

    #[tokio::test]
    async fn rotation_is_visible_immediately() {
        use std::sync::Mutex;

        struct RotatingProvider(Mutex<Vec<String>>);

        #[async_trait]
        impl AuthorityProvider for RotatingProvider {
            async fn host_authority_keys(&self) -> Result<Vec<String>, TunnelError> {
                Ok(self.0.lock().unwrap().clone())
            }
        }

        let old_ca = generate_keypair().unwrap();
        let new_ca = generate_keypair().unwrap();
        let provider = Arc::new(RotatingProvider(Mutex::new(vec![old_ca.public_key.clone()])));
        let oracle = TrustOracle::new(provider.clone());

        let old_pub = certs::parse_authorized_key(&old_ca.public_key).unwrap();
        let new_pub = certs::parse_authorized_key(&new_ca.public_key).unwrap();
        assert!(oracle.is_trusted(old_pub.key_data()).await);
        assert!(!oracle.is_trusted(new_pub.key_data()).await);

        *provider.0.lock().unwrap() = vec![new_ca.public_key.clone()];
        assert!(!oracle.is_trusted(old_pub.key_data()).await);
        assert!(oracle.is_trusted(new_pub.key_data()).await);
    }
}
