//! TCP request-reply transport
//!
//! Every message is a single buffer framed by a 4-byte big-endian length
//! prefix. The same codec is used by the reply side in `sockrpc-server`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, trace, warn};

use crate::core::{
    Endpoint, Transport, TransportError, TransportFactory, TransportResult, TransportState,
};

/// Default upper bound on a single frame (64MB)
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 64 * 1024 * 1024;

/// Build the length-prefixed codec shared by both ends of the wire
#[must_use]
pub fn frame_codec(max_frame_length: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .big_endian()
        .max_frame_length(max_frame_length)
        .new_codec()
}

/// TCP transport implementation
#[derive(Debug)]
pub struct TcpTransport {
    /// Peer this transport is connected to
    peer: Endpoint,
    /// Framed stream
    framed: Option<Framed<TcpStream, LengthDelimitedCodec>>,
    /// Current state
    state: TransportState,
}

impl TcpTransport {
    /// Connect to `peer` using `config`
    pub async fn connect(peer: &Endpoint, config: &TcpConfig) -> TransportResult<Self> {
        trace!("Connecting to TCP peer {}", peer);

        let connect = TcpStream::connect((peer.host(), peer.port()));
        let stream = tokio::time::timeout(config.connect_timeout(), connect)
            .await
            .map_err(|_| {
                TransportError::ConnectionFailed(format!(
                    "connect to {peer} timed out after {}ms",
                    config.connect_timeout_ms
                ))
            })?
            .map_err(|e| TransportError::ConnectionFailed(format!("connect to {peer}: {e}")))?;

        if config.nodelay
            && let Err(e) = stream.set_nodelay(true)
        {
            warn!("Failed to set TCP_NODELAY on {}: {}", peer, e);
        }

        Ok(Self::from_stream(peer.clone(), stream, config.max_frame_length))
    }

    /// Wrap an already connected stream
    #[must_use]
    pub fn from_stream(peer: Endpoint, stream: TcpStream, max_frame_length: usize) -> Self {
        Self {
            peer,
            framed: Some(Framed::new(stream, frame_codec(max_frame_length))),
            state: TransportState::Connected,
        }
    }

    /// Peer this transport talks to
    #[must_use]
    pub const fn peer(&self) -> &Endpoint {
        &self.peer
    }

    fn fail(&mut self, reason: String) {
        self.framed = None;
        self.state = TransportState::Failed { reason };
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn state(&self) -> TransportState {
        self.state.clone()
    }

    async fn send(&mut self, payload: Bytes) -> TransportResult<()> {
        let framed = self
            .framed
            .as_mut()
            .ok_or_else(|| TransportError::ConnectionLost(format!("{} not connected", self.peer)))?;

        let size = payload.len();
        if let Err(e) = framed.send(payload).await {
            let reason = format!("write to {}: {e}", self.peer);
            self.fail(reason.clone());
            return Err(TransportError::SendFailed(reason));
        }

        trace!("Sent {} bytes to {}", size, self.peer);
        Ok(())
    }

    async fn receive(&mut self) -> TransportResult<Bytes> {
        let framed = self
            .framed
            .as_mut()
            .ok_or_else(|| TransportError::ConnectionLost(format!("{} not connected", self.peer)))?;

        match framed.next().await {
            Some(Ok(frame)) => {
                trace!("Received {} bytes from {}", frame.len(), self.peer);
                Ok(frame.freeze())
            }
            Some(Err(e)) => {
                let reason = format!("read from {}: {e}", self.peer);
                self.fail(reason.clone());
                if e.kind() == std::io::ErrorKind::InvalidData {
                    Err(TransportError::ProtocolError(reason))
                } else {
                    Err(TransportError::ReceiveFailed(reason))
                }
            }
            None => {
                let reason = format!("{} closed the connection", self.peer);
                self.fail(reason.clone());
                Err(TransportError::ConnectionLost(reason))
            }
        }
    }

    async fn disconnect(&mut self) -> TransportResult<()> {
        if let Some(mut framed) = self.framed.take() {
            debug!("Closing TCP connection to {}", self.peer);
            // Closing flushes and shuts down the write half
            SinkExt::<Bytes>::close(&mut framed)
                .await
                .map_err(|e| TransportError::Io(format!("close {}: {e}", self.peer)))?;
        }
        self.state = TransportState::Disconnected;
        Ok(())
    }

    fn endpoint(&self) -> Option<String> {
        Some(format!("tcp://{}", self.peer))
    }
}

/// TCP transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpConfig {
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Disable Nagle's algorithm
    pub nodelay: bool,
    /// Largest accepted frame
    pub max_frame_length: usize,
}

impl TcpConfig {
    /// Connection timeout as a [`Duration`]
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5000,
            nodelay: true,
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
        }
    }
}

/// Opens [`TcpTransport`]s for the pool.
///
/// Successive connections start at successive addresses, so a pool bound to
/// several peers spreads its connections across them. When the starting
/// address refuses, the remaining ones are tried in order.
#[derive(Debug, Default)]
pub struct TcpTransportFactory {
    config: TcpConfig,
    cursor: AtomicUsize,
}

impl TcpTransportFactory {
    /// Create a factory
    #[must_use]
    pub fn new(config: TcpConfig) -> Self {
        Self {
            config,
            // Random start so that several processes do not all hit the first peer
            cursor: AtomicUsize::new(fastrand::usize(..1024)),
        }
    }

    /// Factory configuration
    #[must_use]
    pub const fn config(&self) -> &TcpConfig {
        &self.config
    }
}

#[async_trait]
impl TransportFactory for TcpTransportFactory {
    async fn create(&self, addresses: &[Endpoint]) -> TransportResult<Box<dyn Transport>> {
        if addresses.is_empty() {
            return Err(TransportError::ConfigurationError(
                "no addresses to connect to".to_string(),
            ));
        }

        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % addresses.len();
        let mut last_error = None;

        for offset in 0..addresses.len() {
            let peer = &addresses[(start + offset) % addresses.len()];
            match TcpTransport::connect(peer, &self.config).await {
                Ok(transport) => {
                    debug!("Opened TCP connection to {}", peer);
                    return Ok(Box::new(transport));
                }
                Err(e) => {
                    debug!("Could not connect to {}: {}", peer, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            TransportError::ConnectionFailed("no address accepted the connection".to_string())
        }))
    }
}
