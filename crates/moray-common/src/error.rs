use serde::{Deserialize, Serialize};

/// Machine-readable error codes for the wire protocol.
/// Shared by all transports and domains.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    AuthRejected,
    UnknownChannelType,
    SiteNotFound,
    TargetUnavailable,
    TargetUnknown,
    TokenInvalid,
    DomainMismatch,
    RoleMismatch,
    BackendError,
    ConnectionClosed,
    InvalidPayload,
    NotFound,
    Internal,
}

impl ErrorCode {
    /// Suggested HTTP status code for this error.
    /// Transport-agnostic (returns u16, not an axum type).
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidPayload => 400,
            Self::AuthRejected => 401,
            Self::DomainMismatch | Self::RoleMismatch => 403,
            Self::SiteNotFound | Self::TargetUnknown | Self::TokenInvalid | Self::NotFound => 404,
            Self::UnknownChannelType => 422,
            Self::TargetUnavailable | Self::ConnectionClosed => 502,
            Self::BackendError | Self::Internal => 500,
        }
    }
}
