//! Protocol errors and remote error codes.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for protocol operations
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while encoding, decoding or naming RPCs
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Envelope could not be serialized
    #[error("Encode error: {0}")]
    Encode(String),

    /// Bytes are not a valid envelope
    #[error("Decode error: {0}")]
    Decode(String),

    /// Method name is not `[.]package.Service.Method`
    #[error("Invalid method name: {0}")]
    InvalidMethodName(String),
}

/// Reason a remote call failed, carried in [`RpcResponse`](crate::RpcResponse)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Request bytes were rejected by the handler
    BadRequestData,
    /// Inner request message could not be parsed
    BadRequestProto,
    /// No service registered under the requested name
    ServiceNotFound,
    /// Service has no such method
    MethodNotFound,
    /// Handler failed
    RpcError,
    /// Handler reported the call as failed
    RpcFailed,
    /// Envelope could not be parsed
    InvalidRequestProto,
    /// Response could not be parsed by the caller
    BadResponseProto,
    /// Remote host could not be resolved
    UnknownHost,
    /// I/O failure on the remote side
    IoError,
}

impl ErrorCode {
    /// Wire name of the code
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BadRequestData => "BAD_REQUEST_DATA",
            Self::BadRequestProto => "BAD_REQUEST_PROTO",
            Self::ServiceNotFound => "SERVICE_NOT_FOUND",
            Self::MethodNotFound => "METHOD_NOT_FOUND",
            Self::RpcError => "RPC_ERROR",
            Self::RpcFailed => "RPC_FAILED",
            Self::InvalidRequestProto => "INVALID_REQUEST_PROTO",
            Self::BadResponseProto => "BAD_RESPONSE_PROTO",
            Self::UnknownHost => "UNKNOWN_HOST",
            Self::IoError => "IO_ERROR",
        }
    }

    /// Whether the caller sent something the server could not use
    #[must_use]
    pub const fn is_client_error(self) -> bool {
        matches!(
            self,
            Self::BadRequestData
                | Self::BadRequestProto
                | Self::ServiceNotFound
                | Self::MethodNotFound
                | Self::InvalidRequestProto
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_wire_names() {
        let json = serde_json::to_string(&ErrorCode::MethodNotFound).unwrap();
        assert_eq!(json, "\"METHOD_NOT_FOUND\"");
        assert_eq!(ErrorCode::MethodNotFound.to_string(), "METHOD_NOT_FOUND");

        let code: ErrorCode = serde_json::from_str("\"RPC_FAILED\"").unwrap();
        assert_eq!(code, ErrorCode::RpcFailed);
    }

    #[test]
    fn test_client_errors() {
        assert!(ErrorCode::ServiceNotFound.is_client_error());
        assert!(!ErrorCode::RpcError.is_client_error());
        assert!(!ErrorCode::IoError.is_client_error());
    }
}
