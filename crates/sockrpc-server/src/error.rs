//! Server error types

use sockrpc_protocol::{ErrorCode, ProtocolError};
use sockrpc_transport::TransportError;

/// Result type for server operations
pub type ServerResult<T> = Result<T, ServerError>;

/// Server error types
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Transport layer errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Envelope or method name errors
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        /// Error message
        message: String,
    },

    /// Registry errors
    #[error("Registry error: {0}")]
    Registry(String),

    /// Server lifecycle errors
    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// Create a new configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}

/// Failure returned by a method handler, sent back to the caller
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct HandlerError {
    /// Code reported to the caller
    pub code: ErrorCode,
    /// Message reported to the caller
    pub message: String,
}

impl HandlerError {
    /// Handler error with an explicit code
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Handler could not use the request data
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequestData, message)
    }

    /// Handler ran but reported the call as failed
    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::RpcFailed, message)
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self::new(ErrorCode::RpcError, message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(ErrorCode::RpcError, message)
    }
}
