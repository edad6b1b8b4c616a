//! Crate-level error type

use crate::config::ConfigError;
use crate::net::TransportError;
use crate::session::SessionError;
use crate::wire::WireError;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("session token missing or unknown")]
    Unauthorized,

    #[error("an upstream server is already connected")]
    UpstreamConnected,

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type RelayResult<T> = Result<T, RelayError>;
