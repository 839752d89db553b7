//! Auth domain error types.

use moray_common::error::ErrorCode;

use crate::backend::BackendError;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("token not found or malformed")]
    TokenInvalid,

    #[error("token domain does not match")]
    DomainMismatch,

    #[error("token role does not match")]
    RoleMismatch,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("crypto error: {0}")]
    Crypto(#[from] moray_crypto::CryptoError),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for AuthError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<&AuthError> for ErrorCode {
    fn from(e: &AuthError) -> Self {
        match e {
            AuthError::TokenInvalid => ErrorCode::TokenInvalid,
            AuthError::DomainMismatch => ErrorCode::DomainMismatch,
            AuthError::RoleMismatch => ErrorCode::RoleMismatch,
            AuthError::NotFound(_) => ErrorCode::NotFound,
            AuthError::InvalidCredentials => ErrorCode::AuthRejected,
            AuthError::Backend(_) => ErrorCode::BackendError,
            AuthError::Crypto(_) | AuthError::Serialization(_) => ErrorCode::Internal,
        }
    }
}
