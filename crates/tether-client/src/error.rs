use std::time::Duration;
use tether_core::{CodecError, RequestId};

/// Why a call, or the transport carrying it, failed.
///
/// The dispatcher never retries; every error reaches the caller.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    #[error("connection to {url} was not established within {timeout:?}")]
    ConnectTimeout { url: String, timeout: Duration },

    #[error("failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    /// The connection ended while the call was pending, or before it was made.
    #[error("transport closed")]
    TransportClosed,

    /// Failure reported by the server, passed through verbatim.
    #[error("{0}")]
    Remote(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("request resulted in response status {0}, which is not 200")]
    Status(u16),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("could not decode reply: {0}")]
    Decode(String),

    #[error("expected a {expected} reply")]
    UnexpectedReply { expected: &'static str },

    #[error("request id {0} is already pending")]
    DuplicateRequest(RequestId),
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.to_string())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}
