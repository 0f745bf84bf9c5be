//! Core transport traits and types.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for transport operations
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Errors that can occur in transport operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection lost
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Send operation failed
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Receive operation failed
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Protocol error
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// Timeout error
    #[error("Operation timed out")]
    Timeout,

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(String),
}

/// Transport state information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportState {
    /// Transport is disconnected
    Disconnected,
    /// Transport is connected and ready
    Connected,
    /// Transport has failed
    Failed {
        /// Failure reason description
        reason: String,
    },
}

/// A remote `host:port` pair.
///
/// Parsing accepts an optional `tcp://` scheme prefix so addresses copied from
/// socket URLs work unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Create an endpoint from its parts
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Host name or IP literal
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// TCP port
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }
}

impl FromStr for Endpoint {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let address = trimmed.strip_prefix("tcp://").unwrap_or(trimmed);

        let (host, port) = address.rsplit_once(':').ok_or_else(|| {
            TransportError::ConfigurationError(format!("address '{s}' is not host:port"))
        })?;

        // Bracketed IPv6 literals keep their brackets out of the host
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);

        if host.is_empty() {
            return Err(TransportError::ConfigurationError(format!(
                "address '{s}' has an empty host"
            )));
        }

        let port = port.parse::<u16>().map_err(|e| {
            TransportError::ConfigurationError(format!("address '{s}' has an invalid port: {e}"))
        })?;

        Ok(Self::new(host, port))
    }
}

impl TryFrom<String> for Endpoint {
    type Error = TransportError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Endpoint> for String {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.to_string()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// One live request-reply link to a remote peer.
///
/// A transport carries exactly one outstanding request at a time: `send` one
/// buffer, then `receive` the matching reply.
#[async_trait]
pub trait Transport: Send + fmt::Debug {
    /// Get current state
    fn state(&self) -> TransportState;

    /// Send a single buffer
    async fn send(&mut self, payload: Bytes) -> TransportResult<()>;

    /// Receive the next buffer
    async fn receive(&mut self) -> TransportResult<Bytes>;

    /// Disconnect from the peer
    async fn disconnect(&mut self) -> TransportResult<()>;

    /// Send a request and wait for its reply
    async fn request(&mut self, payload: Bytes) -> TransportResult<Bytes> {
        self.send(payload).await?;
        self.receive().await
    }

    /// Get endpoint information
    fn endpoint(&self) -> Option<String> {
        None
    }
}

/// Transport factory for creating transport instances
#[async_trait]
pub trait TransportFactory: Send + Sync + fmt::Debug + 'static {
    /// Open a transport to one of `addresses`
    async fn create(&self, addresses: &[Endpoint]) -> TransportResult<Box<dyn Transport>>;
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connected => write!(f, "connected"),
            Self::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
