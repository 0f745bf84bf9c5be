//! The public request-reply channel.
//!
//! A [`Channel`] owns a [`Pool`] and a [`CorrelationTable`]. Every
//! [`send`](Channel::send) runs as one spawned dispatch task:
//!
//! 1. acquire a connection (possibly waiting for one),
//! 2. register the request under the connection's identity and arm its
//!    timeout,
//! 3. run the exchange, racing it against cancellation,
//! 4. resolve the request, then release the connection if it is healthy or
//!    destroy it otherwise.
//!
//! Whichever of reply, transport error or timeout comes first removes the
//! table entry and answers the caller; the others find nothing to answer.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::config::ChannelConfig;
use crate::connection::ConnectionId;
use crate::core::TransportFactory;
use crate::correlation::{CorrelationTable, Registration, Responder};
use crate::error::{ChannelError, ChannelResult};
use crate::metrics::{ChannelMetrics, ChannelStats, Outcome};
use crate::pool::Pool;
use crate::tcp::TcpTransportFactory;

/// Pooled request-reply channel.
///
/// Cloning is cheap and every clone drives the same pool. The channel closes
/// when [`close`](Self::close) is called or when the last clone and the last
/// in-flight request are gone.
#[derive(Debug, Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

#[derive(Debug)]
struct ChannelInner {
    config: ChannelConfig,
    pool: Pool,
    table: CorrelationTable,
    closed: AtomicBool,
    shutdown: CancellationToken,
    metrics: ChannelMetrics,
}

/// Reply to one [`Channel::send`].
///
/// Dropping it does not cancel the request; the connection is still used
/// until the reply, an error or the timeout.
#[derive(Debug)]
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct ResponseFuture {
    rx: oneshot::Receiver<ChannelResult<Bytes>>,
}

impl Future for ResponseFuture {
    type Output = ChannelResult<Bytes>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            // Responder dropped unanswered: the channel was closed
            .map(|received| received.unwrap_or(Err(ChannelError::Closed)))
    }
}

impl Channel {
    /// Create a channel over TCP.
    ///
    /// Must be called from within a Tokio runtime; the pool starts opening
    /// `min` connections right away.
    pub fn new(config: ChannelConfig) -> ChannelResult<Self> {
        let factory = Arc::new(TcpTransportFactory::new(config.tcp_config()));
        Self::with_factory(config, factory)
    }

    /// Create a channel whose connections come from `factory`
    pub fn with_factory(
        config: ChannelConfig,
        factory: Arc<dyn TransportFactory>,
    ) -> ChannelResult<Self> {
        config.validate()?;

        let pool = Pool::new(config.pool_config(), config.addresses.clone(), factory)
            .map_err(|e| ChannelError::Configuration(e.to_string()))?;

        info!(
            addresses = ?config.addresses,
            min = config.min,
            max = config.max,
            request_timeout_ms = config.request_timeout_ms,
            "Channel opened"
        );

        Ok(Self {
            inner: Arc::new(ChannelInner {
                config,
                pool,
                table: CorrelationTable::new(),
                closed: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
                metrics: ChannelMetrics::default(),
            }),
        })
    }

    /// Send `payload` and get a future of its reply.
    ///
    /// Resolves exactly once with the reply, a transport error, a timeout or
    /// an acquisition error. After [`close`](Self::close) it resolves with
    /// [`ChannelError::Closed`].
    pub fn send(&self, payload: impl Into<Bytes>) -> ResponseFuture {
        let (tx, rx) = oneshot::channel();
        self.dispatch(payload.into(), tx);
        ResponseFuture { rx }
    }

    /// Send `payload` and call `callback` with its outcome.
    ///
    /// The callback runs exactly once on a runtime task, unless the channel
    /// is closed while the request is outstanding, in which case it never
    /// runs.
    pub fn send_with<F>(&self, payload: impl Into<Bytes>, callback: F)
    where
        F: FnOnce(ChannelResult<Bytes>) + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.dispatch(payload.into(), tx);
        tokio::spawn(async move {
            if let Ok(result) = rx.await {
                callback(result);
            }
        });
    }

    fn dispatch(&self, payload: Bytes, responder: Responder) {
        if self.is_closed() {
            let _ = responder.send(Err(ChannelError::Closed));
            return;
        }

        self.inner.metrics.record_sent();
        tokio::spawn(run_request(Arc::clone(&self.inner), payload, responder));
    }

    /// Drop every outstanding request without answering it and close all
    /// connections. Idempotent.
    pub fn close(&self) {
        self.inner.close();
    }

    /// Whether the channel has been closed
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Channel configuration
    #[must_use]
    pub fn config(&self) -> &ChannelConfig {
        &self.inner.config
    }

    /// Number of requests awaiting a reply
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.table.len()
    }

    /// Snapshot of request and pool statistics
    #[must_use]
    pub fn stats(&self) -> ChannelStats {
        self.inner
            .metrics
            .snapshot(self.inner.table.len(), self.inner.pool.stats())
    }
}

impl ChannelInner {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let dropped = self.table.clear();
        self.shutdown.cancel();
        self.pool.drain_all();
        info!(dropped, "Channel closed");
    }
}

impl Drop for ChannelInner {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run_request(inner: Arc<ChannelInner>, payload: Bytes, responder: Responder) {
    let mut connection = match inner.pool.acquire().await {
        Ok(connection) => connection,
        Err(e) => {
            // A closed channel leaves its callers unanswered
            if !inner.is_closed() {
                debug!("Could not acquire a connection: {}", e);
                inner.metrics.record(Outcome::AcquisitionFailure);
                let _ = responder.send(Err(ChannelError::Acquisition(e)));
            }
            return;
        }
    };

    let id = connection.id();
    let cancel = inner.shutdown.child_token();
    let timeout = inner.config.request_timeout();
    let registration = inner.table.register(
        id,
        responder,
        payload.clone(),
        cancel.clone(),
        || Some(arm_timeout(Arc::downgrade(&inner), id, timeout)),
    );

    match registration {
        Registration::Registered => {}
        Registration::Duplicate => {
            inner.pool.destroy(connection);
            return;
        }
        Registration::Closed => {
            inner.pool.release(connection);
            return;
        }
    }

    let outcome = tokio::select! {
        biased;
        () = cancel.cancelled() => None,
        result = connection.exchange(payload) => Some(result),
    };

    match outcome {
        // Timed out or closed; the exchange was abandoned mid-flight
        None => {
            trace!(connection = %id, "Exchange cancelled");
            inner.pool.destroy(connection);
        }
        Some(Ok(reply)) => {
            if inner.table.resolve(id, Ok(reply)) {
                inner.metrics.record(Outcome::Response);
                inner.pool.release(connection);
            } else {
                trace!(connection = %id, "Late reply dropped");
                inner.pool.destroy(connection);
            }
        }
        Some(Err(e)) => {
            debug!(connection = %id, "Transport error: {}", e);
            if inner.table.resolve(id, Err(ChannelError::Transport(e))) {
                inner.metrics.record(Outcome::TransportError);
            }
            inner.pool.destroy(connection);
        }
    }
}

/// Spawn the timeout of the request pending on connection `id`
fn arm_timeout(channel: Weak<ChannelInner>, id: ConnectionId, timeout: Duration) -> AbortHandle {
    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        if let Some(inner) = channel.upgrade()
            && inner.table.expire(id)
        {
            debug!(connection = %id, "Request timed out");
            inner.metrics.record(Outcome::Timeout);
        }
    })
    .abort_handle()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Endpoint;
    use crate::memory::MemoryTransportFactory;

    fn config(min: usize, max: usize) -> ChannelConfig {
        ChannelConfig {
            addresses: vec![Endpoint::new("memory", 1)],
            min,
            max,
            request_timeout_ms: 100,
            ..ChannelConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_echo() {
        let factory = MemoryTransportFactory::echo();
        let channel = Channel::with_factory(config(1, 2), Arc::new(factory)).unwrap();

        let reply = channel.send(Bytes::from_static(b"ping")).await.unwrap();
        assert_eq!(reply, Bytes::from_static(b"ping"));

        let stats = channel.stats();
        assert_eq!(stats.requests_sent, 1);
        assert_eq!(stats.responses, 1);
        assert_eq!(stats.pending, 0);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let factory: Arc<dyn TransportFactory> = Arc::new(MemoryTransportFactory::echo());
        let err = Channel::with_factory(config(3, 2), Arc::clone(&factory)).unwrap_err();
        assert!(matches!(err, ChannelError::Configuration(_)));

        let no_addresses = ChannelConfig {
            addresses: vec![],
            ..config(1, 1)
        };
        let err = Channel::with_factory(no_addresses, factory).unwrap_err();
        assert!(matches!(err, ChannelError::Configuration(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_returns_payload() {
        let factory = MemoryTransportFactory::new(|_| std::future::pending());
        let channel = Channel::with_factory(config(0, 1), Arc::new(factory.clone())).unwrap();

        let err = channel.send(Bytes::from_static(b"slow")).await.unwrap_err();
        assert_eq!(err.timed_out_payload(), Some(&Bytes::from_static(b"slow")));

        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert_eq!(channel.stats().timeouts, 1);
        assert_eq!(factory.disconnected(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_resolves_outstanding_future() {
        let factory = MemoryTransportFactory::new(|_| std::future::pending());
        let channel = Channel::with_factory(config(1, 1), Arc::new(factory)).unwrap();

        let mut reply = tokio_test::task::spawn(channel.send(Bytes::from_static(b"stuck")));
        tokio_test::assert_pending!(reply.poll());
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert_eq!(channel.pending(), 1);

        channel.close();
        assert!(reply.is_woken());
        tokio_test::assert_ready_eq!(reply.poll(), Err(ChannelError::Closed));
        assert_eq!(channel.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_after_close_fails_fast() {
        let channel =
            Channel::with_factory(config(1, 1), Arc::new(MemoryTransportFactory::echo())).unwrap();
        channel.close();
        channel.close();

        assert!(channel.is_closed());
        assert_eq!(
            channel.send(Bytes::from_static(b"late")).await,
            Err(ChannelError::Closed)
        );
        assert_eq!(channel.stats().requests_sent, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_on_last_drop() {
        let factory = MemoryTransportFactory::echo();
        let channel = Channel::with_factory(config(2, 2), Arc::new(factory.clone())).unwrap();
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert_eq!(factory.created(), 2);

        drop(channel);
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert_eq!(factory.disconnected(), 2);
    }
}
