//! OpenSSH certificate minting and checking.
//!
//! Host certificates are what edge agents present when dialing the proxy;
//! user certificates back web sessions. Both are signed by the matching
//! certificate authority keypair and carry the holder's role as a
//! certificate extension.

use chrono::{Duration, Utc};
use rand::rngs::OsRng;
use ssh_key::certificate::{Builder, CertType, Certificate};
use ssh_key::public::KeyData;
use ssh_key::{Fingerprint, HashAlg, PrivateKey, PublicKey};

use crate::CryptoError;

/// Certificate extension carrying the holder's role.
pub const ROLE_EXTENSION: &str = "role@moray";

/// Backdate certificates slightly to tolerate clock skew between
/// the authority and the agents checking them.
const VALIDITY_SKEW_SECS: i64 = 60;

/// Mint a host certificate for `subject_public` signed by `ca_private`.
///
/// `ttl = None` produces a never-expiring certificate (the agent join
/// path — agents are re-keyed by re-joining, not by expiry).
pub fn generate_host_cert(
    ca_private: &str,
    subject_public: &str,
    id: &str,
    principals: &[String],
    role: &str,
    ttl: Option<Duration>,
) -> Result<String, CryptoError> {
    generate_cert(
        ca_private,
        subject_public,
        id,
        principals,
        role,
        ttl,
        CertType::Host,
    )
}

/// Mint a user certificate; the principal is the username.
pub fn generate_user_cert(
    ca_private: &str,
    subject_public: &str,
    id: &str,
    username: &str,
    ttl: Option<Duration>,
) -> Result<String, CryptoError> {
    generate_cert(
        ca_private,
        subject_public,
        id,
        &[username.to_string()],
        "user",
        ttl,
        CertType::User,
    )
}

#[allow(clippy::too_many_arguments)]
fn generate_cert(
    ca_private: &str,
    subject_public: &str,
    id: &str,
    principals: &[String],
    role: &str,
    ttl: Option<Duration>,
    cert_type: CertType,
) -> Result<String, CryptoError> {
    let ca_key = PrivateKey::from_openssh(ca_private)
        .map_err(|e| CryptoError::KeyEncoding(format!("CA private key: {e}")))?;
    let subject = parse_authorized_key(subject_public)?;

    let now = Utc::now();
    let valid_after = (now - Duration::seconds(VALIDITY_SKEW_SECS)).timestamp() as u64;
    let valid_before = match ttl {
        Some(ttl) => (now + ttl).timestamp() as u64,
        None => u64::MAX,
    };

    let mut builder = Builder::new_with_random_nonce(
        &mut OsRng,
        subject.key_data().clone(),
        valid_after,
        valid_before,
    )
    .map_err(|e| CryptoError::Certificate(e.to_string()))?;

    builder
        .cert_type(cert_type)
        .map_err(|e| CryptoError::Certificate(e.to_string()))?;
    builder
        .key_id(id)
        .map_err(|e| CryptoError::Certificate(e.to_string()))?;
    for principal in principals {
        builder
            .valid_principal(principal.clone())
            .map_err(|e| CryptoError::Certificate(e.to_string()))?;
    }
    builder
        .extension(ROLE_EXTENSION, role)
        .map_err(|e| CryptoError::Certificate(e.to_string()))?;

    let cert = builder
        .sign(&ca_key)
        .map_err(|e| CryptoError::Certificate(e.to_string()))?;
    cert.to_openssh()
        .map_err(|e| CryptoError::Certificate(e.to_string()))
}

/// Check a host certificate against a set of trusted authority keys:
/// signature chains to one of them, the validity window covers now,
/// and the declared principal is listed.
pub fn check_host_cert(
    cert: &Certificate,
    principal: &str,
    trusted: &[PublicKey],
) -> Result<(), CryptoError> {
    if cert.cert_type() != CertType::Host {
        return Err(CryptoError::Certificate(format!(
            "expected a host certificate, got {:?}",
            cert.cert_type()
        )));
    }
    if !cert.valid_principals().iter().any(|p| p == principal) {
        return Err(CryptoError::Certificate(format!(
            "certificate principals {:?} do not include {principal}",
            cert.valid_principals()
        )));
    }
    let fingerprints: Vec<Fingerprint> = trusted
        .iter()
        .map(|k| k.fingerprint(HashAlg::Sha256))
        .collect();
    let now = Utc::now().timestamp() as u64;
    cert.validate_at(now, fingerprints.iter())
        .map_err(|e| CryptoError::Certificate(e.to_string()))?;
    Ok(())
}

/// Parse a single authorized-key line into a public key.
pub fn parse_authorized_key(line: &str) -> Result<PublicKey, CryptoError> {
    PublicKey::from_openssh(line.trim())
        .map_err(|e| CryptoError::KeyEncoding(format!("authorized key: {e}")))
}

/// SSH wire-form encoding of a public key.
pub fn wire_bytes(key_data: &KeyData) -> Result<Vec<u8>, CryptoError> {
    PublicKey::from(key_data.clone())
        .to_bytes()
        .map_err(|e| CryptoError::KeyEncoding(e.to_string()))
}

/// Byte equality of two public keys in SSH wire form.
pub fn keys_equal(a: &KeyData, b: &KeyData) -> bool {
    match (wire_bytes(a), wire_bytes(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::generate_keypair;

    fn ca_and_subject() -> (crate::keys::EncodedKeyPair, crate::keys::EncodedKeyPair) {
        (generate_keypair().unwrap(), generate_keypair().unwrap())
    }

    #[test]
    fn host_cert_mints_and_checks() {
        let (ca, subject) = ca_and_subject();
        let cert_line = generate_host_cert(
            &ca.private_key,
            &subject.public_key,
            "edge-a_node",
            &["edge-a".to_string(), "edge-a.proxy".to_string()],
            "node",
            None,
        )
        .unwrap();

        let cert = Certificate::from_openssh(&cert_line).unwrap();
        let ca_pub = parse_authorized_key(&ca.public_key).unwrap();
        check_host_cert(&cert, "edge-a", &[ca_pub.clone()]).unwrap();
        check_host_cert(&cert, "edge-a.proxy", &[ca_pub]).unwrap();
    }

    #[test]
    fn host_cert_rejects_wrong_principal() {
        let (ca, subject) = ca_and_subject();
        let cert_line = generate_host_cert(
            &ca.private_key,
            &subject.public_key,
            "edge-a_node",
            &["edge-a".to_string()],
            "node",
            None,
        )
        .unwrap();
        let cert = Certificate::from_openssh(&cert_line).unwrap();
        let ca_pub = parse_authorized_key(&ca.public_key).unwrap();
        assert!(check_host_cert(&cert, "edge-b", &[ca_pub]).is_err());
    }

    #[test]
    fn host_cert_rejects_untrusted_authority() {
        let (ca, subject) = ca_and_subject();
        let other_ca = generate_keypair().unwrap();
        let cert_line = generate_host_cert(
            &ca.private_key,
            &subject.public_key,
            "edge-a_node",
            &["edge-a".to_string()],
            "node",
            None,
        )
        .unwrap();
        let cert = Certificate::from_openssh(&cert_line).unwrap();
        let other_pub = parse_authorized_key(&other_ca.public_key).unwrap();
        assert!(check_host_cert(&cert, "edge-a", &[other_pub]).is_err());
    }

    #[test]
    fn user_cert_is_user_type_and_rejected_as_host() {
        let (ca, subject) = ca_and_subject();
        let cert_line = generate_user_cert(
            &ca.private_key,
            &subject.public_key,
            "alice",
            "alice",
            Some(Duration::hours(10)),
        )
        .unwrap();
        let cert = Certificate::from_openssh(&cert_line).unwrap();
        assert_eq!(cert.cert_type(), CertType::User);
        let ca_pub = parse_authorized_key(&ca.public_key).unwrap();
        assert!(check_host_cert(&cert, "alice", &[ca_pub]).is_err());
    }

    #[test]
    fn expired_cert_fails_validation() {
        let (ca, subject) = ca_and_subject();
        let cert_line = generate_host_cert(
            &ca.private_key,
            &subject.public_key,
            "edge-a_node",
            &["edge-a".to_string()],
            "node",
            // Already expired: skew backdates 60s, ttl is negative.
            Some(Duration::seconds(-120)),
        )
        .unwrap();
        let cert = Certificate::from_openssh(&cert_line).unwrap();
        let ca_pub = parse_authorized_key(&ca.public_key).unwrap();
        assert!(check_host_cert(&cert, "edge-a", &[ca_pub]).is_err());
    }

    #[test]
    fn wire_equality_distinguishes_keys() {
        let a = parse_authorized_key(&generate_keypair().unwrap().public_key).unwrap();
        let b = parse_authorized_key(&generate_keypair().unwrap().public_key).unwrap();
        assert!(keys_equal(a.key_data(), a.key_data()));
        assert!(!keys_equal(a.key_data(), b.key_data()));
    }

    #[test]
    fn role_extension_is_present() {
        let (ca, subject) = ca_and_subject();
        let cert_line = generate_host_cert(
            &ca.private_key,
            &subject.public_key,
            "edge-a_node",
            &["edge-a".to_string()],
            "node",
            None,
        )
        .unwrap();
        let cert = Certificate::from_openssh(&cert_line).unwrap();
        let role = cert
            .extensions()
            .iter()
            .find(|(name, _)| name.as_str() == ROLE_EXTENSION)
            .map(|(_, value)| value.as_str());
        assert_eq!(role, Some("node"));
    }
}
