//! Client errors

use sockrpc_protocol::{ErrorCode, ProtocolError};
use sockrpc_transport::ChannelError;

/// Result type for client calls
pub type ClientResult<T> = Result<T, ClientError>;

/// Ways a call can fail
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// The channel could not deliver the request or get a reply
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Envelope or method name errors
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The server answered with an error code
    #[error("Remote error {code}: {message}")]
    Remote {
        /// Code reported by the server
        code: ErrorCode,
        /// Message reported by the server
        message: String,
    },

    /// The reply answers a different request
    #[error("Response id {actual} does not match request id {expected}")]
    ResponseMismatch {
        /// Id that was sent
        expected: u64,
        /// Id that came back
        actual: u64,
    },
}

impl ClientError {
    /// Code reported by the server, if the server answered with one
    #[must_use]
    pub const fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Remote { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Whether the call timed out waiting for a reply
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Channel(e) if e.is_timeout())
    }
}
