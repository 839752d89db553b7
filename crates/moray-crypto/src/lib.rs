//! OpenSSH key management for the moray access plane.
//!
//! Generates ed25519 keypairs, mints and checks the OpenSSH host/user
//! certificates that agents present when dialing in, seals opaque ids
//! for external handles, and hashes sign-in passwords.

pub mod certs;
pub mod keys;
pub mod passwords;
pub mod secrets;

/// Errors from key generation, certificate handling, and sealing.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    #[error("key encoding failed: {0}")]
    KeyEncoding(String),

    #[error("certificate error: {0}")]
    Certificate(String),

    #[error("decryption failed (wrong key or corrupted data)")]
    Decryption,

    #[error("password hash error: {0}")]
    PasswordHash(String),
}

impl From<ssh_key::Error> for CryptoError {
    fn from(e: ssh_key::Error) -> Self {
        Self::KeyEncoding(e.to_string())
    }
}
