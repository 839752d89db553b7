//! Certificate authority records over the backend.
//!
//! Two local authorities (host and user) plus any number of federated
//! host authorities learned from peer auth servers. The trusted host set
//! is read fresh from the backend on every call — rotation takes effect
//! on the next authentication, never from a cache.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::backend::Backend;
use crate::error::AuthError;

const BUCKET_LOCAL: &str = "authorities";
const BUCKET_REMOTE: &str = "remote-authorities";

/// Which signing duty an authority serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaType {
    Host,
    User,
}

impl CaType {
    fn local_key(self) -> &'static str {
        match self {
            CaType::Host => "local-host",
            CaType::User => "local-user",
        }
    }
}

/// Public half of a certificate authority.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertAuthority {
    pub ca_type: CaType,
    pub domain_name: String,
    /// Authorized-key line for the authority's signing key.
    pub public_key: String,
    pub id: String,
}

/// A local authority additionally holds its private signing key
/// (OpenSSH PEM, possibly passphrase-encrypted at rest).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalCertAuthority {
    #[serde(flatten)]
    pub authority: CertAuthority,
    pub private_key: String,
}

/// CA record access over the backend.
#[derive(Clone)]
pub struct CaService {
    backend: Arc<dyn Backend>,
}

impl CaService {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    pub async fn upsert_local_ca(&self, ca: &LocalCertAuthority) -> Result<(), AuthError> {
        let value = serde_json::to_vec(ca)?;
        self.backend
            .upsert(BUCKET_LOCAL, ca.authority.ca_type.local_key(), value, None)
            .await?;
        Ok(())
    }

    pub async fn local_ca(&self, ca_type: CaType) -> Result<LocalCertAuthority, AuthError> {
        let value = self
            .backend
            .get(BUCKET_LOCAL, ca_type.local_key())
            .await?
            .ok_or_else(|| AuthError::NotFound(format!("local {ca_type:?} CA")))?;
        Ok(serde_json::from_slice(&value)?)
    }

    /// Record a federated authority learned from a peer.
    pub async fn upsert_remote_ca(&self, ca: &CertAuthority) -> Result<(), AuthError> {
        let key = format!(
            "{}-{}",
            match ca.ca_type {
                CaType::Host => "host",
                CaType::User => "user",
            },
            ca.domain_name
        );
        let value = serde_json::to_vec(ca)?;
        self.backend.upsert(BUCKET_REMOTE, &key, value, None).await?;
        Ok(())
    }

    /// All federated authorities of one type.
    pub async fn remote_cas(&self, ca_type: CaType) -> Result<Vec<CertAuthority>, AuthError> {
        let mut out = Vec::new();
        for value in self.backend.list(BUCKET_REMOTE).await? {
            let ca: CertAuthority = serde_json::from_slice(&value)?;
            if ca.ca_type == ca_type {
                out.push(ca);
            }
        }
        Ok(out)
    }

    /// Authorized-key lines for every authority trusted to sign host
    /// certificates: the local host CA plus all federated host CAs.
    /// Read from the backend on every call.
    pub async fn host_authority_keys(&self) -> Result<Vec<String>, AuthError> {
        let mut keys = vec![self.local_ca(CaType::Host).await?.authority.public_key];
        for remote in self.remote_cas(CaType::Host).await? {
            keys.push(remote.public_key);
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    fn local(ca_type: CaType, domain: &str, public: &str) -> LocalCertAuthority {
        LocalCertAuthority {
            authority: CertAuthority {
                ca_type,
                domain_name: domain.to_string(),
                public_key: public.to_string(),
                id: "local".to_string(),
            },
            private_key: "PRIVATE".to_string(),
        }
    }

    #[tokio::test]
    async fn local_ca_roundtrip_and_replacement() {
        let svc = CaService::new(Arc::new(MemoryBackend::new()));
        svc.upsert_local_ca(&local(CaType::Host, "proxy", "pk-one"))
            .await
            .unwrap();
        assert_eq!(
            svc.local_ca(CaType::Host).await.unwrap().authority.public_key,
            "pk-one"
        );

        svc.upsert_local_ca(&local(CaType::Host, "proxy", "pk-two"))
            .await
            .unwrap();
        assert_eq!(
            svc.local_ca(CaType::Host).await.unwrap().authority.public_key,
            "pk-two"
        );
    }

    #[tokio::test]
    async fn missing_local_ca_is_not_found() {
        let svc = CaService::new(Arc::new(MemoryBackend::new()));
        assert!(matches!(
            svc.local_ca(CaType::User).await,
            Err(AuthError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn host_authority_keys_include_federated() {
        let svc = CaService::new(Arc::new(MemoryBackend::new()));
        svc.upsert_local_ca(&local(CaType::Host, "proxy", "local-pk"))
            .await
            .unwrap();
        svc.upsert_remote_ca(&CertAuthority {
            ca_type: CaType::Host,
            domain_name: "peer.example.com".to_string(),
            public_key: "peer-pk".to_string(),
            id: "peer".to_string(),
        })
        .await
        .unwrap();
        // User-type remote must not leak into the host set.
        svc.upsert_remote_ca(&CertAuthority {
            ca_type: CaType::User,
            domain_name: "peer.example.com".to_string(),
            public_key: "peer-user-pk".to_string(),
            id: "peer".to_string(),
        })
        .await
        .unwrap();

        let keys = svc.host_authority_keys().await.unwrap();
        assert_eq!(keys, vec!["local-pk".to_string(), "peer-pk".to_string()]);
    }
}
