//! Channel and pool errors.

use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;

use crate::core::TransportError;

/// Result type for channel operations
pub type ChannelResult<T> = std::result::Result<T, ChannelError>;

/// Result type for pool operations
pub type PoolResult<T> = std::result::Result<T, PoolError>;

/// Errors that can occur while acquiring a connection from the pool
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// Invalid pool bounds
    #[error("Invalid pool configuration: {0}")]
    Configuration(String),

    /// Opening a new connection failed
    #[error("Failed to create connection: {0}")]
    Create(#[source] TransportError),

    /// The pool is shutting down
    #[error("Pool is draining")]
    Draining,
}

/// Errors delivered to callers of [`Channel::send`](crate::Channel::send)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// Invalid channel configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// No connection could be obtained for the request
    #[error("Acquisition failed: {0}")]
    Acquisition(#[from] PoolError),

    /// The connection failed after the request was sent
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// No reply arrived within the request timeout
    #[error("Request timed out after {}ms ({} byte payload)", .elapsed.as_millis(), .payload.len())]
    Timeout {
        /// The request that went unanswered
        payload: Bytes,
        /// Time between registration and expiry
        elapsed: Duration,
    },

    /// The channel was closed
    #[error("Channel closed")]
    Closed,

    /// Internal invariant violated
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ChannelError {
    /// Whether the request timed out
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Payload of a timed out request
    #[must_use]
    pub const fn timed_out_payload(&self) -> Option<&Bytes> {
        match self {
            Self::Timeout { payload, .. } => Some(payload),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_display() {
        let err = ChannelError::Timeout {
            payload: Bytes::from_static(b"abcd"),
            elapsed: Duration::from_millis(250),
        };
        assert_eq!(err.to_string(), "Request timed out after 250ms (4 byte payload)");
        assert!(err.is_timeout());
        assert_eq!(err.timed_out_payload(), Some(&Bytes::from_static(b"abcd")));
    }

    #[test]
    fn test_layer_conversions() {
        let err: ChannelError = PoolError::Draining.into();
        assert_eq!(err, ChannelError::Acquisition(PoolError::Draining));
        assert!(err.timed_out_payload().is_none());

        let err: ChannelError = TransportError::Timeout.into();
        assert!(matches!(err, ChannelError::Transport(TransportError::Timeout)));
        assert_eq!(err.to_string(), "Transport error: Operation timed out");
    }

    #[test]
    fn test_create_error_display() {
        let err = PoolError::Create(TransportError::ConnectionFailed("refused".to_string()));
        assert_eq!(
            err.to_string(),
            "Failed to create connection: Connection failed: refused"
        );
    }
}
