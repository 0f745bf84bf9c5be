//! In-process transport.
//!
//! Requests never leave the process: each one is handed to an async handler
//! whose return value becomes the reply. Handy for loopback wiring and for
//! driving the pool deterministically in tests (handlers can sleep, fail, or
//! never answer).

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::trace;

use crate::core::{
    Endpoint, Transport, TransportError, TransportFactory, TransportResult, TransportState,
};

/// Boxed reply future returned by a [`MemoryHandler`]
pub type ReplyFuture = Pin<Box<dyn Future<Output = TransportResult<Bytes>> + Send>>;

/// Handler invoked for every request sent over a memory transport
pub type MemoryHandler = Arc<dyn Fn(Bytes) -> ReplyFuture + Send + Sync>;

/// Factory of in-process transports sharing one handler
#[derive(Clone)]
pub struct MemoryTransportFactory {
    handler: MemoryHandler,
    state: Arc<FactoryState>,
}

#[derive(Debug, Default)]
struct FactoryState {
    created: AtomicU64,
    disconnected: AtomicU64,
    refuse: AtomicBool,
}

impl fmt::Debug for MemoryTransportFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryTransportFactory")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl MemoryTransportFactory {
    /// Create a factory from an async handler
    pub fn new<F, Fut>(handler: F) -> Self
    where
        F: Fn(Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TransportResult<Bytes>> + Send + 'static,
    {
        Self {
            handler: Arc::new(move |payload| Box::pin(handler(payload)) as ReplyFuture),
            state: Arc::new(FactoryState::default()),
        }
    }

    /// Factory whose peer echoes every request
    #[must_use]
    pub fn echo() -> Self {
        Self::new(|payload| async move { Ok::<_, TransportError>(payload) })
    }

    /// Make subsequent `create` calls fail (or succeed again)
    pub fn refuse_connections(&self, refuse: bool) {
        self.state.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Number of transports created so far
    #[must_use]
    pub fn created(&self) -> u64 {
        self.state.created.load(Ordering::SeqCst)
    }

    /// Number of transports explicitly disconnected so far
    #[must_use]
    pub fn disconnected(&self) -> u64 {
        self.state.disconnected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransportFactory for MemoryTransportFactory {
    async fn create(&self, addresses: &[Endpoint]) -> TransportResult<Box<dyn Transport>> {
        if self.state.refuse.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionFailed(
                "memory peer refused the connection".to_string(),
            ));
        }

        let serial = self.state.created.fetch_add(1, Ordering::SeqCst);
        let peer = addresses
            .first()
            .map_or_else(|| format!("memory://{serial}"), |a| format!("memory://{a}"));

        Ok(Box::new(MemoryTransport {
            peer,
            handler: Arc::clone(&self.handler),
            factory: Arc::clone(&self.state),
            outstanding: None,
            state: TransportState::Connected,
        }))
    }
}

/// One in-process link created by [`MemoryTransportFactory`]
pub struct MemoryTransport {
    peer: String,
    handler: MemoryHandler,
    factory: Arc<FactoryState>,
    outstanding: Option<ReplyFuture>,
    state: TransportState,
}

impl fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("peer", &self.peer)
            .field("outstanding", &self.outstanding.is_some())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn state(&self) -> TransportState {
        self.state.clone()
    }

    async fn send(&mut self, payload: Bytes) -> TransportResult<()> {
        if self.state != TransportState::Connected {
            return Err(TransportError::ConnectionLost(format!(
                "{} not connected",
                self.peer
            )));
        }
        if self.outstanding.is_some() {
            return Err(TransportError::ProtocolError(
                "request already outstanding".to_string(),
            ));
        }

        trace!("Memory transport {} sending {} bytes", self.peer, payload.len());
        self.outstanding = Some((self.handler)(payload));
        Ok(())
    }

    async fn receive(&mut self) -> TransportResult<Bytes> {
        let reply = self.outstanding.take().ok_or_else(|| {
            TransportError::ProtocolError("receive without an outstanding request".to_string())
        })?;

        let result = reply.await;
        if let Err(e) = &result {
            self.state = TransportState::Failed {
                reason: e.to_string(),
            };
        }
        result
    }

    async fn disconnect(&mut self) -> TransportResult<()> {
        if self.state != TransportState::Disconnected {
            self.outstanding = None;
            self.state = TransportState::Disconnected;
            self.factory.disconnected.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn endpoint(&self) -> Option<String> {
        Some(self.peer.clone())
    }
}
