//! Ed25519 OpenSSH keypair generation and the pre-generated key pool.
//!
//! Keypairs travel as OpenSSH-encoded strings: the private half in OpenSSH
//! PEM (zeroized on drop via `ssh-key`), the public half as a single
//! authorized-key line.

use std::collections::VecDeque;
use std::sync::Mutex;

use rand::rngs::OsRng;
use ssh_key::{Algorithm, LineEnding, PrivateKey};

use crate::CryptoError;

/// How many keypairs the pool keeps warm.
const POOL_SIZE: usize = 10;

/// A freshly generated OpenSSH keypair in encoded form.
#[derive(Debug, Clone)]
pub struct EncodedKeyPair {
    /// OpenSSH PEM private key.
    pub private_key: String,
    /// Single authorized-key line (`ssh-ed25519 AAAA... comment`).
    pub public_key: String,
}

/// Generate an ed25519 keypair and return it in OpenSSH encoding.
pub fn generate_keypair() -> Result<EncodedKeyPair, CryptoError> {
    let key = PrivateKey::random(&mut OsRng, Algorithm::Ed25519)
        .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
    encode_keypair(&key)
}

fn encode_keypair(key: &PrivateKey) -> Result<EncodedKeyPair, CryptoError> {
    let private_key = key
        .to_openssh(LineEnding::LF)
        .map_err(|e| CryptoError::KeyEncoding(e.to_string()))?
        .to_string();
    let public_key = key
        .public_key()
        .to_openssh()
        .map_err(|e| CryptoError::KeyEncoding(e.to_string()))?;
    Ok(EncodedKeyPair {
        private_key,
        public_key,
    })
}

/// Pool of pre-generated keypairs for latency-sensitive paths
/// (web sign-in mints a keypair per session).
///
/// Draining past the pool depth falls back to on-demand generation.
pub struct KeyPool {
    pool: Mutex<VecDeque<EncodedKeyPair>>,
}

impl KeyPool {
    /// Create an empty pool; it fills on first use.
    pub fn new() -> Self {
        Self {
            pool: Mutex::new(VecDeque::new()),
        }
    }

    /// Take a keypair from the pool, generating replacements as needed.
    pub fn take(&self) -> Result<EncodedKeyPair, CryptoError> {
        let mut pool = self.pool.lock().expect("key pool lock poisoned");
        if let Some(pair) = pool.pop_front() {
            return Ok(pair);
        }
        drop(pool);

        let pair = generate_keypair()?;
        self.refill()?;
        Ok(pair)
    }

    /// Top the pool back up to its configured depth.
    pub fn refill(&self) -> Result<(), CryptoError> {
        let mut fresh = Vec::new();
        {
            let pool = self.pool.lock().expect("key pool lock poisoned");
            let missing = POOL_SIZE.saturating_sub(pool.len());
            for _ in 0..missing {
                fresh.push(generate_keypair()?);
            }
        }
        let mut pool = self.pool.lock().expect("key pool lock poisoned");
        pool.extend(fresh);
        Ok(())
    }
}

impl Default for KeyPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keypair_is_openssh_encoded() {
        let pair = generate_keypair().unwrap();
        assert!(pair.private_key.contains("BEGIN OPENSSH PRIVATE KEY"));
        assert!(pair.public_key.starts_with("ssh-ed25519 "));
    }

    #[test]
    fn generated_keys_are_distinct() {
        let a = generate_keypair().unwrap();
        let b = generate_keypair().unwrap();
        assert_ne!(a.public_key, b.public_key);
    }

    #[test]
    fn private_key_parses_back() {
        let pair = generate_keypair().unwrap();
        let parsed = PrivateKey::from_openssh(&pair.private_key).unwrap();
        assert_eq!(parsed.public_key().to_openssh().unwrap(), pair.public_key);
    }

    #[test]
    fn pool_take_and_refill() {
        let pool = KeyPool::new();
        let first = pool.take().unwrap();
        assert!(first.public_key.starts_with("ssh-ed25519 "));

        // After the first take the pool was refilled; subsequent takes
        // drain it without regenerating.
        let second = pool.take().unwrap();
        assert_ne!(first.public_key, second.public_key);
    }
}
