//! Certificate authority and token-join service.
//!
//! The authority mints the OpenSSH host certificates that edge agents
//! present when dialing the reverse-tunnel proxy, gated by one-shot join
//! tokens. It also rotates CA key material, federates with peer auth
//! servers, and backs web sign-in sessions.

pub mod backend;
pub mod ca;
pub mod client;
pub mod error;
pub mod http;
pub mod protocol;
pub mod provisioning;
pub mod seal;
pub mod web;

use std::sync::Arc;

use chrono::Duration;
use ssh_key::{LineEnding, PrivateKey};
use tracing::{info, warn};

use moray_crypto::certs;
use moray_crypto::keys::{self, KeyPool};
use moray_crypto::secrets::SecretService;

use crate::backend::Backend;
use crate::ca::{CaService, CaType, CertAuthority, LocalCertAuthority};
pub use crate::error::AuthError;
use crate::protocol::PackedKeys;
use crate::provisioning::{join_token_role, random_token, split_token_role, ProvisioningService};
use crate::seal::SealKeyService;
use crate::web::{Session, WebService, WebSession};

/// Role granted to joining edge agents.
pub const ROLE_NODE: &str = "node";

/// Role granted to federating peer auth servers.
pub const ROLE_AUTH: &str = "auth";

/// Web session (and session user certificate) lifetime.
pub const WEB_SESSION_TTL_HOURS: i64 = 10;

/// Key signing, token provisioning, and session facility for one proxy.
pub struct AuthServer {
    hostname: String,
    ca_passphrase: Option<String>,
    ca: CaService,
    provisioning: ProvisioningService,
    web: WebService,
    seal: SealKeyService,
    secrets: SecretService,
    key_pool: KeyPool,
}

impl AuthServer {
    pub fn new(
        backend: Arc<dyn Backend>,
        hostname: impl Into<String>,
        secrets: SecretService,
        ca_passphrase: Option<String>,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            ca_passphrase,
            ca: CaService::new(backend.clone()),
            provisioning: ProvisioningService::new(backend.clone()),
            web: WebService::new(backend.clone()),
            seal: SealKeyService::new(backend),
            secrets,
            key_pool: KeyPool::new(),
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn ca_service(&self) -> &CaService {
        &self.ca
    }

    pub fn web_service(&self) -> &WebService {
        &self.web
    }

    // ── CA rotation ─────────────────────────────────────────────────

    /// Generate a fresh host CA keypair and upsert the local record.
    /// Previously issued certificates stay valid until their TTL.
    pub async fn reset_host_ca(&self) -> Result<(), AuthError> {
        self.reset_ca(CaType::Host).await
    }

    /// Generate a fresh user CA keypair and upsert the local record.
    pub async fn reset_user_ca(&self) -> Result<(), AuthError> {
        self.reset_ca(CaType::User).await
    }

    async fn reset_ca(&self, ca_type: CaType) -> Result<(), AuthError> {
        let pair = keys::generate_keypair()?;
        let private_key = match self.ca_passphrase.as_deref() {
            Some(pass) if !pass.is_empty() => encrypt_private_key(&pair.private_key, pass)?,
            _ => pair.private_key,
        };
        let record = LocalCertAuthority {
            authority: CertAuthority {
                ca_type,
                domain_name: self.hostname.clone(),
                public_key: pair.public_key,
                id: "local".to_string(),
            },
            private_key,
        };
        self.ca.upsert_local_ca(&record).await?;
        info!(ca_type = ?ca_type, domain = %self.hostname, "certificate authority rotated");
        Ok(())
    }

    /// Decrypted signing key of a local CA record.
    fn signing_key(&self, record: &LocalCertAuthority) -> Result<String, AuthError> {
        decrypt_private_key(&record.private_key, self.ca_passphrase.as_deref())
    }

    // ── Certificate generation ──────────────────────────────────────

    /// Mint a host certificate signed by the local host CA.
    pub async fn generate_host_cert(
        &self,
        subject_public: &str,
        id: &str,
        principals: &[String],
        role: &str,
        ttl: Option<Duration>,
    ) -> Result<String, AuthError> {
        let host_ca = self.ca.local_ca(CaType::Host).await?;
        let signing = self.signing_key(&host_ca)?;
        Ok(certs::generate_host_cert(
            &signing,
            subject_public,
            id,
            principals,
            role,
            ttl,
        )?)
    }

    /// Mint a user certificate signed by the local user CA.
    pub async fn generate_user_cert(
        &self,
        subject_public: &str,
        id: &str,
        username: &str,
        ttl: Option<Duration>,
    ) -> Result<String, AuthError> {
        let user_ca = self.ca.local_ca(CaType::User).await?;
        let signing = self.signing_key(&user_ca)?;
        Ok(certs::generate_user_cert(
            &signing,
            subject_public,
            id,
            username,
            ttl,
        )?)
    }

    // ── Join tokens ─────────────────────────────────────────────────

    /// Mint a single-use join token for `node_name` with `role`.
    /// Returns the external form `<hex>.<role>`.
    pub async fn generate_token(
        &self,
        node_name: &str,
        role: &str,
        ttl: Duration,
    ) -> Result<String, AuthError> {
        let token = random_token();
        let outer = join_token_role(&token, role);
        self.provisioning
            .upsert_token(&token, node_name, role, ttl)
            .await?;
        Ok(outer)
    }

    /// Mint a sealed join token for a peer auth server.
    pub async fn generate_sealed_token(
        &self,
        domain_name: &str,
        ttl: Duration,
    ) -> Result<String, AuthError> {
        let token = random_token();
        self.provisioning
            .upsert_token(&token, domain_name, ROLE_AUTH, ttl)
            .await?;
        self.secrets
            .seal(token.as_bytes())
            .map_err(AuthError::Crypto)
    }

    /// Check a token against the supplied domain; returns the role it
    /// grants. The token is not consumed.
    pub async fn validate_token(&self, outer: &str, domain_name: &str) -> Result<String, AuthError> {
        let (token, _) = split_token_role(outer)?;
        let record = self.provisioning.get_token(&token).await?;
        if record.domain_name != domain_name {
            return Err(AuthError::DomainMismatch);
        }
        Ok(record.role)
    }

    /// Exchange a join token for a host certificate.
    ///
    /// The token is deleted only after the certificate is generated; any
    /// failure leaves it consumable for a retry.
    pub async fn register_using_token(
        &self,
        outer: &str,
        node_name: &str,
        role: &str,
    ) -> Result<PackedKeys, AuthError> {
        info!(node = %node_name, "node is trying to join");
        let (token, _) = split_token_role(outer)?;
        let record = match self.provisioning.get_token(&token).await {
            Ok(record) => record,
            Err(e) => {
                warn!(node = %node_name, error = %e, "node cannot join: token error");
                return Err(e);
            }
        };
        if record.domain_name != node_name {
            return Err(AuthError::DomainMismatch);
        }
        if record.role != role {
            return Err(AuthError::RoleMismatch);
        }

        let pair = keys::generate_keypair()?;
        let host_id = format!("{node_name}_{role}");
        let full_host_name = format!("{}.{}", node_name, self.hostname);
        let certificate = self
            .generate_host_cert(
                &pair.public_key,
                &host_id,
                &[node_name.to_string(), full_host_name],
                role,
                None,
            )
            .await
            .map_err(|e| {
                warn!(node = %node_name, error = %e, "node cannot join: cert generation error");
                e
            })?;

        self.provisioning.delete_token(&token).await?;
        info!(node = %node_name, "node joined the cluster");

        Ok(PackedKeys {
            private_key: pair.private_key,
            certificate,
        })
    }

    /// Register a federating peer auth server.
    ///
    /// The token arrives sealed by the secret service and must grant the
    /// auth role. On success the peer's seal key joins the keyring and the
    /// local sign key's public half is returned.
    pub async fn register_new_auth_server(
        &self,
        domain_name: &str,
        sealed_token: &str,
        peer_seal_key: &str,
    ) -> Result<String, AuthError> {
        let opened = self
            .secrets
            .open(sealed_token)
            .map_err(|_| AuthError::TokenInvalid)?;
        let token = String::from_utf8(opened).map_err(|_| AuthError::TokenInvalid)?;

        let record = self.provisioning.get_token(&token).await?;
        if record.domain_name != domain_name {
            return Err(AuthError::DomainMismatch);
        }
        if record.role != ROLE_AUTH {
            return Err(AuthError::RoleMismatch);
        }

        self.provisioning.delete_token(&token).await?;
        self.seal.add_seal_key(domain_name, peer_seal_key).await?;
        info!(domain = %domain_name, "peer auth server joined");

        let local = self.seal.sign_key().await?;
        Ok(local.public_key)
    }

    // ── Web sessions ────────────────────────────────────────────────

    /// Store a sign-in credential for `user`.
    pub async fn upsert_password(&self, user: &str, password: &str) -> Result<(), AuthError> {
        self.web.upsert_password(user, password).await
    }

    /// Verify credentials, mint a new web session, persist and return it.
    pub async fn sign_in(&self, user: &str, password: &str) -> Result<Session, AuthError> {
        self.web.check_password(user, password).await?;
        let session = self.new_web_session(user).await?;
        self.web
            .upsert_web_session(
                user,
                &session.pid,
                &session.ws,
                Duration::hours(WEB_SESSION_TTL_HOURS),
            )
            .await?;
        Ok(session)
    }

    /// Mint session key material: fresh keypair from the pool plus a user
    /// certificate whose TTL mirrors the session's.
    pub async fn new_web_session(&self, user: &str) -> Result<Session, AuthError> {
        let pid = random_token();
        let sid = self
            .secrets
            .seal(pid.as_bytes())
            .map_err(AuthError::Crypto)?;
        let pair = self.key_pool.take()?;
        let certificate = self
            .generate_user_cert(
                &pair.public_key,
                user,
                user,
                Some(Duration::hours(WEB_SESSION_TTL_HOURS)),
            )
            .await?;
        Ok(Session {
            sid,
            pid,
            ws: WebSession {
                private_key: pair.private_key,
                certificate,
            },
        })
    }

    /// Look up a session by its sealed external handle.
    pub async fn get_web_session(&self, user: &str, sid: &str) -> Result<Session, AuthError> {
        let pid = self.open_sid(sid)?;
        let ws = self.web.get_web_session(user, &pid).await?;
        Ok(Session {
            sid: sid.to_string(),
            pid,
            ws,
        })
    }

    pub async fn delete_web_session(&self, user: &str, sid: &str) -> Result<(), AuthError> {
        let pid = self.open_sid(sid)?;
        self.web.delete_web_session(user, &pid).await
    }

    fn open_sid(&self, sid: &str) -> Result<String, AuthError> {
        let opened = self
            .secrets
            .open(sid)
            .map_err(|_| AuthError::NotFound("web session".to_string()))?;
        String::from_utf8(opened).map_err(|_| AuthError::NotFound("web session".to_string()))
    }

    // ── Trust set ───────────────────────────────────────────────────

    /// Authorized-key lines of every trusted host authority, read fresh
    /// from the backend.
    pub async fn host_authority_keys(&self) -> Result<Vec<String>, AuthError> {
        self.ca.host_authority_keys().await
    }
}

fn encrypt_private_key(pem: &str, passphrase: &str) -> Result<String, AuthError> {
    let key = PrivateKey::from_openssh(pem)
        .map_err(|e| AuthError::Serialization(format!("CA private key: {e}")))?;
    let encrypted = key
        .encrypt(&mut rand::rngs::OsRng, passphrase)
        .map_err(|e| AuthError::Serialization(format!("CA key encryption: {e}")))?;
    Ok(encrypted
        .to_openssh(LineEnding::LF)
        .map_err(|e| AuthError::Serialization(format!("CA key encoding: {e}")))?
        .to_string())
}

fn decrypt_private_key(pem: &str, passphrase: Option<&str>) -> Result<String, AuthError> {
    let key = PrivateKey::from_openssh(pem)
        .map_err(|e| AuthError::Serialization(format!("CA private key: {e}")))?;
    if !key.is_encrypted() {
        return Ok(pem.to_string());
    }
    let Some(pass) = passphrase else {
        return Err(AuthError::Serialization(
            "CA private key is encrypted but no passphrase is configured".to_string(),
        ));
    };
    let decrypted = key
        .decrypt(pass)
        .map_err(|e| AuthError::Serialization(format!("CA key decryption: {e}")))?;
    Ok(decrypted
        .to_openssh(LineEnding::LF)
        .map_err(|e| AuthError::Serialization(format!("CA key encoding: {e}")))?
        .to_string())
}
