//! Sealing of opaque identifiers with AES-256-GCM.
//!
//! External handles (web session SIDs, peer auth-server join tokens) are
//! the sealed form of an internal id: only a holder of the service key can
//! produce or open them. The nonce is prepended to the ciphertext and the
//! whole blob travels hex-encoded.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;

use moray_common::encoding::{hex_decode, hex_encode};

use crate::CryptoError;

/// Nonce length for AES-256-GCM.
const NONCE_LEN: usize = 12;

/// Seals and opens opaque ids with a process-local service key.
pub struct SecretService {
    cipher: Aes256Gcm,
}

impl SecretService {
    /// Build from a 32-byte service key.
    pub fn new(key: &[u8; 32]) -> Self {
        let key = Key::<Aes256Gcm>::from_slice(key);
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }

    /// Build with a freshly drawn random key. Handles sealed by this
    /// instance cannot be opened after restart.
    pub fn ephemeral() -> Self {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        Self::new(&key)
    }

    /// Seal `plain` into a hex-encoded opaque handle.
    pub fn seal(&self, plain: &[u8]) -> Result<String, CryptoError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plain)
            .map_err(|_| CryptoError::Decryption)?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        Ok(hex_encode(&blob))
    }

    /// Open a sealed handle back into the original bytes.
    pub fn open(&self, sealed: &str) -> Result<Vec<u8>, CryptoError> {
        let blob = hex_decode(sealed).map_err(|_| CryptoError::Decryption)?;
        if blob.len() <= NONCE_LEN {
            return Err(CryptoError::Decryption);
        }
        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| CryptoError::Decryption)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_roundtrip() {
        let svc = SecretService::ephemeral();
        let sealed = svc.seal(b"pid-1234").unwrap();
        assert_eq!(svc.open(&sealed).unwrap(), b"pid-1234");
    }

    #[test]
    fn sealed_values_differ_per_call() {
        let svc = SecretService::ephemeral();
        let a = svc.seal(b"same").unwrap();
        let b = svc.seal(b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn open_rejects_wrong_service() {
        let a = SecretService::ephemeral();
        let b = SecretService::ephemeral();
        let sealed = a.seal(b"secret").unwrap();
        assert!(matches!(b.open(&sealed), Err(CryptoError::Decryption)));
    }

    #[test]
    fn open_rejects_garbage() {
        let svc = SecretService::ephemeral();
        assert!(svc.open("not-hex").is_err());
        assert!(svc.open("00ff").is_err());
    }
}
