//! Tunnel domain error types.

use moray_common::error::ErrorCode;
use moray_common::net::AddrParseError;

#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    #[error("authentication rejected: {0}")]
    AuthRejected(String),

    #[error("unknown channel type: {0}")]
    UnknownChannelType(String),

    #[error("site not found: {0}")]
    SiteNotFound(String),

    #[error("remote target {0} is not available")]
    TargetUnavailable(String),

    #[error("cannot dial {0}: target is not in the site's server inventory")]
    TargetUnknown(String),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("authority provider error: {0}")]
    Provider(String),

    #[error("access point error: {0}")]
    AccessPoint(String),

    #[error("ssh error: {0}")]
    Ssh(#[from] russh::Error),

    #[error(transparent)]
    Addr(#[from] AddrParseError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<&TunnelError> for ErrorCode {
    fn from(e: &TunnelError) -> Self {
        match e {
            TunnelError::AuthRejected(_) => ErrorCode::AuthRejected,
            TunnelError::UnknownChannelType(_) => ErrorCode::UnknownChannelType,
            TunnelError::SiteNotFound(_) => ErrorCode::SiteNotFound,
            TunnelError::TargetUnavailable(_) => ErrorCode::TargetUnavailable,
            TunnelError::TargetUnknown(_) => ErrorCode::TargetUnknown,
            TunnelError::ConnectionClosed => ErrorCode::ConnectionClosed,
            TunnelError::Provider(_) => ErrorCode::BackendError,
            TunnelError::Addr(_) => ErrorCode::InvalidPayload,
            TunnelError::AccessPoint(_) | TunnelError::Ssh(_) | TunnelError::Io(_) => {
                ErrorCode::Internal
            }
        }
    }
}
