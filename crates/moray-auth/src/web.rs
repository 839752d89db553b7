//! Web credentials and sessions.
//!
//! A session pairs an external sealed handle (SID) with the internal key
//! (PID) and carries a short-lived user certificate. Sessions and password
//! records live in the backend; passwords are stored as argon2 hashes.

use std::sync::Arc;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use moray_crypto::passwords;

use crate::backend::Backend;
use crate::error::AuthError;

const BUCKET_PASSWORDS: &str = "web-passwords";
const BUCKET_SESSIONS: &str = "web-sessions";

/// Key material minted for one web session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSession {
    /// OpenSSH PEM private key.
    pub private_key: String,
    /// OpenSSH user certificate for the session's user.
    pub certificate: String,
}

/// A signed-in session: external handle, internal key, key material.
#[derive(Debug, Clone)]
pub struct Session {
    pub sid: String,
    pub pid: String,
    pub ws: WebSession,
}

/// Password and session storage over the backend.
#[derive(Clone)]
pub struct WebService {
    backend: Arc<dyn Backend>,
}

impl WebService {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    pub async fn upsert_password(&self, user: &str, password: &str) -> Result<(), AuthError> {
        let hash = passwords::hash_password(password)?;
        self.backend
            .upsert(BUCKET_PASSWORDS, user, hash.into_bytes(), None)
            .await?;
        Ok(())
    }

    pub async fn check_password(&self, user: &str, password: &str) -> Result<(), AuthError> {
        let stored = self
            .backend
            .get(BUCKET_PASSWORDS, user)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;
        let stored = String::from_utf8(stored)
            .map_err(|e| AuthError::Serialization(e.to_string()))?;
        if passwords::verify_password(password, &stored)? {
            Ok(())
        } else {
            Err(AuthError::InvalidCredentials)
        }
    }

    pub async fn upsert_web_session(
        &self,
        user: &str,
        pid: &str,
        ws: &WebSession,
        ttl: Duration,
    ) -> Result<(), AuthError> {
        let key = session_key(user, pid);
        let value = serde_json::to_vec(ws)?;
        self.backend
            .upsert(BUCKET_SESSIONS, &key, value, Some(ttl))
            .await?;
        Ok(())
    }

    pub async fn get_web_session(&self, user: &str, pid: &str) -> Result<WebSession, AuthError> {
        let key = session_key(user, pid);
        let value = self
            .backend
            .get(BUCKET_SESSIONS, &key)
            .await?
            .ok_or_else(|| AuthError::NotFound(format!("web session for {user}")))?;
        Ok(serde_json::from_slice(&value)?)
    }

    pub async fn delete_web_session(&self, user: &str, pid: &str) -> Result<(), AuthError> {
        let key = session_key(user, pid);
        self.backend.delete(BUCKET_SESSIONS, &key).await?;
        Ok(())
    }
}

fn session_key(user: &str, pid: &str) -> String {
    format!("{user}/{pid}")
}
