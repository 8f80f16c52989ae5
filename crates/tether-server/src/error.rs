use std::net::SocketAddr;
use std::path::PathBuf;
use tether_core::E_INTERNAL_SERVER_ERROR;

/// Failure reported by a handler.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// Shown to the caller as is.
    #[error("{0}")]
    Domain(String),
    /// Logged on the server; the caller only sees a generic message.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl HandlerError {
    pub fn domain(message: impl Into<String>) -> Self {
        Self::Domain(message.into())
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(e: serde_json::Error) -> Self {
        Self::Internal(e.into())
    }
}

/// Why a request produced a failure response.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Method '{0}' was not found.")]
    MethodNotFound(String),
    #[error(transparent)]
    Handler(#[from] HandlerError),
}

impl DispatchError {
    /// Message sent to the caller. Internal details never leave the server.
    pub fn to_wire(&self) -> String {
        match self {
            Self::Handler(HandlerError::Internal(_)) => E_INTERNAL_SERVER_ERROR.to_string(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("failed to read {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
