//! Pooled connections and their identities.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{trace, warn};

use crate::core::{Endpoint, Transport, TransportResult};

/// Identity of a connection, unique within its channel.
///
/// Displayed as `<process id>-<sequence>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Sequence number within the owning channel
    #[must_use]
    pub const fn sequence(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", std::process::id(), self.0)
    }
}

/// Monotonic source of [`ConnectionId`]s, one per channel
#[derive(Debug, Default)]
pub struct IdGenerator {
    next: AtomicU64,
}

impl IdGenerator {
    /// Create a generator starting at zero
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(0),
        }
    }

    /// Next identity
    pub fn next_id(&self) -> ConnectionId {
        ConnectionId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// Lifecycle state of a [`Connection`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Parked in the pool, no request outstanding
    Idle,
    /// Held by exactly one dispatcher with one request outstanding
    InFlight,
    /// Closed, never reused
    Destroyed,
}

/// One request-reply transport bound to a fixed set of addresses
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    addresses: Arc<[Endpoint]>,
    state: ConnectionState,
    transport: Box<dyn Transport>,
    created_at: Instant,
    last_used: Instant,
    requests_served: u64,
}

impl Connection {
    pub(crate) fn new(
        id: ConnectionId,
        addresses: Arc<[Endpoint]>,
        transport: Box<dyn Transport>,
    ) -> Self {
        let now = Instant::now();
        Self {
            id,
            addresses,
            state: ConnectionState::Idle,
            transport,
            created_at: now,
            last_used: now,
            requests_served: 0,
        }
    }

    /// Identity used as the correlation key
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Addresses this connection was created for
    #[must_use]
    pub fn addresses(&self) -> &[Endpoint] {
        &self.addresses
    }

    /// Current lifecycle state
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Peer description reported by the transport
    #[must_use]
    pub fn endpoint(&self) -> Option<String> {
        self.transport.endpoint()
    }

    /// When the connection was opened
    #[must_use]
    pub const fn created_at(&self) -> Instant {
        self.created_at
    }

    /// When the connection last finished a request (or was opened)
    #[must_use]
    pub const fn last_used(&self) -> Instant {
        self.last_used
    }

    /// Number of requests that completed on this connection
    #[must_use]
    pub const fn requests_served(&self) -> u64 {
        self.requests_served
    }

    pub(crate) fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
    }

    /// Send `payload` and wait for the reply.
    ///
    /// Not cancel safe: a dropped exchange leaves the transport in an unknown
    /// state, so the caller must destroy the connection afterwards.
    pub(crate) async fn exchange(&mut self, payload: Bytes) -> TransportResult<Bytes> {
        trace!(connection = %self.id, bytes = payload.len(), "exchange");
        let result = self.transport.request(payload).await;
        self.last_used = Instant::now();
        if result.is_ok() {
            self.requests_served += 1;
        }
        result
    }

    /// Close the underlying transport. Errors are logged, the connection is
    /// destroyed regardless.
    pub(crate) async fn close(mut self) {
        self.state = ConnectionState::Destroyed;
        if let Err(e) = self.transport.disconnect().await {
            warn!(connection = %self.id, "Error closing connection: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TransportFactory;
    use crate::memory::MemoryTransportFactory;

    #[test]
    fn test_ids_are_monotonic() {
        let ids = IdGenerator::new();
        let a = ids.next_id();
        let b = ids.next_id();
        assert!(a < b);
        assert_eq!(b.sequence(), 1);
        assert_eq!(a.to_string(), format!("{}-0", std::process::id()));
    }

    #[tokio::test]
    async fn test_exchange_counts_served_requests() {
        let factory = MemoryTransportFactory::echo();
        let addresses: Arc<[Endpoint]> = Arc::from(vec![Endpoint::new("peer", 9)]);
        let transport = factory.create(&addresses).await.unwrap();
        let mut connection = Connection::new(IdGenerator::new().next_id(), addresses, transport);

        assert_eq!(connection.state(), ConnectionState::Idle);
        assert_eq!(connection.addresses(), &[Endpoint::new("peer", 9)]);

        let reply = connection.exchange(Bytes::from_static(b"hi")).await.unwrap();
        assert_eq!(reply, Bytes::from_static(b"hi"));
        assert_eq!(connection.requests_served(), 1);
        assert!(connection.last_used() >= connection.created_at());

        connection.close().await;
        assert_eq!(factory.disconnected(), 1);
    }
}
