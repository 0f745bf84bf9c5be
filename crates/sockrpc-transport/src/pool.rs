//! Bounded connection pool.
//!
//! The pool keeps between `min` and `max` connections to a fixed address set.
//! Its size counts idle connections, connections held by a caller, and
//! connections still being opened, and never exceeds `max`. Callers that find
//! the pool exhausted queue up and are served in arrival order, either by a
//! released connection or by a replacement for a destroyed one.
//!
//! Every idle connection has its own eviction timer. A connection idle for
//! longer than `idle_timeout` is closed unless that would take the pool below
//! `min`, in which case the timer simply re-arms.
//!
//! All bookkeeping lives behind one `parking_lot` mutex which is never held
//! across an `.await`; connection I/O always happens outside of it.

use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::config::PoolConfig;
use crate::connection::{Connection, ConnectionId, ConnectionState, IdGenerator};
use crate::core::{Endpoint, TransportFactory, TransportResult};
use crate::error::{PoolError, PoolResult};

type Waiter = oneshot::Sender<PoolResult<Connection>>;

/// Connection pool shared by every dispatch of a channel
#[derive(Debug, Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

#[derive(Debug)]
struct PoolInner {
    config: PoolConfig,
    addresses: Arc<[Endpoint]>,
    factory: Arc<dyn TransportFactory>,
    ids: IdGenerator,
    state: parking_lot::Mutex<PoolState>,
}

#[derive(Debug, Default)]
struct PoolState {
    idle: VecDeque<IdleConnection>,
    active: HashSet<ConnectionId>,
    creating: usize,
    // Part of `creating` opened by callers for themselves
    inline_creating: usize,
    waiters: VecDeque<Waiter>,
    draining: bool,
    stats: PoolStats,
}

#[derive(Debug)]
struct IdleConnection {
    connection: Connection,
    since: Instant,
    reaper: Option<AbortHandle>,
}

/// Pool statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Connections opened
    pub created: u64,
    /// Connections closed for any reason
    pub destroyed: u64,
    /// Connections closed by the idle timer
    pub evicted: u64,
    /// Failed attempts to open a connection
    pub creation_failures: u64,
    /// Connections handed to callers
    pub acquires: u64,
    /// Connections returned by callers
    pub releases: u64,
    /// Connections currently idle
    pub idle: usize,
    /// Connections currently held by callers
    pub active: usize,
    /// Connections currently being opened
    pub creating: usize,
    /// Callers currently queued
    pub waiting: usize,
    /// Largest pool size observed
    pub peak_size: usize,
}

impl PoolState {
    fn size(&self) -> usize {
        self.idle.len() + self.active.len() + self.creating
    }

    fn reserve(&mut self) {
        self.creating += 1;
        self.stats.peak_size = self.stats.peak_size.max(self.size());
    }

    fn check_out(&mut self, mut connection: Connection) -> Connection {
        connection.set_state(ConnectionState::InFlight);
        self.active.insert(connection.id());
        self.stats.acquires += 1;
        connection
    }

    fn take_idle(&mut self) -> Option<Connection> {
        let idle = self.idle.pop_front()?;
        if let Some(reaper) = idle.reaper {
            reaper.abort();
        }
        Some(idle.connection)
    }

    fn forget_closed_waiters(&mut self) {
        self.waiters.retain(|waiter| !waiter.is_closed());
    }
}

impl Pool {
    /// Create a pool and start opening `min` connections in the background.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        config: PoolConfig,
        addresses: Vec<Endpoint>,
        factory: Arc<dyn TransportFactory>,
    ) -> PoolResult<Self> {
        config.validate()?;

        let inner = Arc::new(PoolInner {
            config,
            addresses: Arc::from(addresses),
            factory,
            ids: IdGenerator::new(),
            state: parking_lot::Mutex::new(PoolState::default()),
        });

        {
            let mut state = inner.state.lock();
            inner.replenish(&mut state);
        }

        debug!(
            min = inner.config.min,
            max = inner.config.max,
            "Connection pool created"
        );
        Ok(Self { inner })
    }

    /// Pool configuration
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Addresses every connection is bound to
    #[must_use]
    pub fn addresses(&self) -> &[Endpoint] {
        &self.inner.addresses
    }

    /// Get a connection, waiting for one if the pool is exhausted.
    ///
    /// Dropping the returned future before it completes gives back anything
    /// it was granted.
    pub async fn acquire(&self) -> PoolResult<Connection> {
        enum Next {
            Ready(Connection),
            Create,
            Wait(oneshot::Receiver<PoolResult<Connection>>),
        }

        let next = {
            let mut state = self.inner.state.lock();
            if state.draining {
                return Err(PoolError::Draining);
            }

            state.forget_closed_waiters();
            if state.waiters.is_empty()
                && let Some(connection) = state.take_idle()
            {
                Next::Ready(state.check_out(connection))
            } else if state.waiters.is_empty() && state.size() < self.inner.config.max {
                state.reserve();
                state.inline_creating += 1;
                Next::Create
            } else {
                let (tx, rx) = oneshot::channel();
                state.waiters.push_back(tx);
                self.inner.replenish(&mut state);
                trace!(waiting = state.waiters.len(), "Pool exhausted, queued");
                Next::Wait(rx)
            }
        };

        match next {
            Next::Ready(connection) => {
                trace!(connection = %connection.id(), "Reusing idle connection");
                Ok(connection)
            }
            Next::Create => self.inner.create_for_caller().await,
            Next::Wait(rx) => {
                let mut ticket = WaitTicket {
                    inner: &self.inner,
                    rx,
                };
                match (&mut ticket.rx).await {
                    Ok(result) => result,
                    // Sender dropped: queue flushed by drain
                    Err(_) => Err(PoolError::Draining),
                }
            }
        }
    }

    /// Return a healthy connection for reuse.
    ///
    /// The oldest queued caller gets it directly. A connection past its
    /// maximum lifetime is destroyed instead.
    pub fn release(&self, connection: Connection) {
        self.inner.release(connection);
    }

    /// Close a connection that must not be reused and start replacements
    pub fn destroy(&self, connection: Connection) {
        self.inner.destroy(connection);
    }

    /// Fail queued callers and close every connection, now or on return.
    /// Idempotent.
    pub fn drain_all(&self) {
        let (idle, waiters) = {
            let mut state = self.inner.state.lock();
            if state.draining {
                return;
            }
            state.draining = true;
            let idle: Vec<_> = state.idle.drain(..).collect();
            state.stats.destroyed += idle.len() as u64;
            (idle, std::mem::take(&mut state.waiters))
        };

        debug!(
            idle = idle.len(),
            waiting = waiters.len(),
            "Draining connection pool"
        );

        // Dropped senders wake their callers with `Draining`
        drop(waiters);
        for entry in idle {
            if let Some(reaper) = entry.reaper {
                reaper.abort();
            }
            self.inner.close_later(entry.connection);
        }
    }

    /// Whether [`drain_all`](Self::drain_all) has been called
    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.inner.state.lock().draining
    }

    /// Current size: idle, in flight, and being opened
    #[must_use]
    pub fn size(&self) -> usize {
        self.inner.state.lock().size()
    }

    /// Number of idle connections
    #[must_use]
    pub fn idle_count(&self) -> usize {
        self.inner.state.lock().idle.len()
    }

    /// Snapshot of the pool statistics
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock();
        PoolStats {
            idle: state.idle.len(),
            active: state.active.len(),
            creating: state.creating,
            waiting: state.waiters.iter().filter(|w| !w.is_closed()).count(),
            ..state.stats.clone()
        }
    }
}

impl PoolInner {
    async fn open(&self) -> TransportResult<Connection> {
        let transport = self.factory.create(&self.addresses).await?;
        let connection =
            Connection::new(self.ids.next_id(), Arc::clone(&self.addresses), transport);
        debug!(
            connection = %connection.id(),
            endpoint = ?connection.endpoint(),
            "Opened connection"
        );
        Ok(connection)
    }

    /// Open a connection for the caller that reserved the slot
    async fn create_for_caller(self: &Arc<Self>) -> PoolResult<Connection> {
        let mut reservation = Reservation {
            inner: self,
            armed: true,
        };
        let result = self.open().await;
        reservation.armed = false;

        let mut state = self.state.lock();
        state.creating -= 1;
        state.inline_creating -= 1;
        match result {
            Ok(connection) => {
                state.stats.created += 1;
                if state.draining {
                    state.stats.destroyed += 1;
                    drop(state);
                    self.close_later(connection);
                    return Err(PoolError::Draining);
                }
                Ok(state.check_out(connection))
            }
            Err(e) => {
                state.stats.creation_failures += 1;
                self.replenish(&mut state);
                drop(state);
                warn!("Failed to open connection: {}", e);
                Err(PoolError::Create(e))
            }
        }
    }

    /// Start background creations until the pool can serve every holder,
    /// every caller opening its own connection, every queued caller and `min`
    fn replenish(self: &Arc<Self>, state: &mut PoolState) {
        if state.draining {
            return;
        }
        state.forget_closed_waiters();

        let target = (state.active.len() + state.inline_creating + state.waiters.len())
            .max(self.config.min)
            .min(self.config.max);
        if state.size() >= target {
            return;
        }

        let Ok(runtime) = Handle::try_current() else {
            warn!("No runtime available, pool cannot open connections");
            return;
        };
        while state.size() < target {
            state.reserve();
            let inner = Arc::clone(self);
            runtime.spawn(async move { inner.create_in_background().await });
        }
    }

    async fn create_in_background(self: Arc<Self>) {
        let result = self.open().await;

        let mut state = self.state.lock();
        state.creating -= 1;
        match result {
            Ok(connection) => {
                state.stats.created += 1;
                if let Some(rejected) = self.offer(&mut state, connection) {
                    state.stats.destroyed += 1;
                    drop(state);
                    self.close_later(rejected);
                }
            }
            Err(e) => {
                state.stats.creation_failures += 1;
                state.forget_closed_waiters();
                let waiter = state.waiters.pop_front();
                drop(state);

                warn!("Background connection creation failed: {}", e);
                if let Some(waiter) = waiter {
                    let _ = waiter.send(Err(PoolError::Create(e)));
                }
            }
        }
    }

    /// Hand a free connection to the oldest live waiter, or park it idle.
    /// Returns the connection when the pool is draining.
    fn offer(
        self: &Arc<Self>,
        state: &mut PoolState,
        connection: Connection,
    ) -> Option<Connection> {
        if state.draining {
            return Some(connection);
        }

        let mut connection = connection;
        while let Some(waiter) = state.waiters.pop_front() {
            if waiter.is_closed() {
                continue;
            }
            let id = connection.id();
            match waiter.send(Ok(state.check_out(connection))) {
                Ok(()) => {
                    trace!(connection = %id, "Handed connection to queued caller");
                    return None;
                }
                Err(returned) => {
                    state.active.remove(&id);
                    state.stats.acquires -= 1;
                    match returned {
                        Ok(back) => connection = back,
                        Err(_) => return None,
                    }
                }
            }
        }

        self.park(state, connection);
        None
    }

    fn park(self: &Arc<Self>, state: &mut PoolState, mut connection: Connection) {
        connection.set_state(ConnectionState::Idle);
        let since = Instant::now();
        let reaper = Handle::try_current().ok().map(|runtime| {
            runtime
                .spawn(reap(
                    Arc::downgrade(self),
                    connection.id(),
                    since,
                    self.config.idle_timeout(),
                ))
                .abort_handle()
        });

        state.idle.push_back(IdleConnection {
            connection,
            since,
            reaper,
        });
    }

    fn release(self: &Arc<Self>, connection: Connection) {
        if let Some(lifetime) = self.config.max_lifetime()
            && connection.created_at().elapsed() >= lifetime
        {
            debug!(connection = %connection.id(), "Connection reached its maximum lifetime");
            self.destroy(connection);
            return;
        }

        let mut state = self.state.lock();
        state.active.remove(&connection.id());
        state.stats.releases += 1;
        if let Some(rejected) = self.offer(&mut state, connection) {
            state.stats.destroyed += 1;
            drop(state);
            self.close_later(rejected);
        }
    }

    fn destroy(self: &Arc<Self>, connection: Connection) {
        {
            let mut state = self.state.lock();
            state.active.remove(&connection.id());
            state.stats.destroyed += 1;
            self.replenish(&mut state);
        }

        debug!(connection = %connection.id(), "Destroying connection");
        self.close_later(connection);
    }

    /// Close a connection off the caller's task
    fn close_later(&self, connection: Connection) {
        // Without a runtime, dropping the transport closes it
        spawn_detached(connection.close());
    }
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        for entry in &state.idle {
            if let Some(reaper) = &entry.reaper {
                reaper.abort();
            }
        }
    }
}

fn spawn_detached<F>(future: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(runtime) = Handle::try_current() {
        runtime.spawn(future);
    }
}

/// Idle timer of one parked connection
async fn reap(pool: Weak<PoolInner>, id: ConnectionId, since: Instant, idle_timeout: Duration) {
    loop {
        tokio::time::sleep(idle_timeout).await;

        let Some(inner) = pool.upgrade() else {
            return;
        };

        let evicted = {
            let mut state = inner.state.lock();
            let Some(position) = state
                .idle
                .iter()
                .position(|entry| entry.connection.id() == id && entry.since == since)
            else {
                return;
            };
            if state.size() <= inner.config.min {
                continue;
            }
            state.stats.evicted += 1;
            state.stats.destroyed += 1;
            state.idle.remove(position).map(|entry| entry.connection)
        };

        if let Some(connection) = evicted {
            debug!(connection = %connection.id(), "Evicting idle connection");
            connection.close().await;
        }
        return;
    }
}

/// Slot reserved by a caller that is opening its own connection
struct Reservation<'a> {
    inner: &'a Arc<PoolInner>,
    armed: bool,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.inner.state.lock();
            state.creating -= 1;
            state.inline_creating -= 1;
            self.inner.replenish(&mut state);
        }
    }
}

/// Place of a caller in the acquire queue
struct WaitTicket<'a> {
    inner: &'a Arc<PoolInner>,
    rx: oneshot::Receiver<PoolResult<Connection>>,
}

impl Drop for WaitTicket<'_> {
    fn drop(&mut self) {
        self.rx.close();
        // A connection may have been granted after the caller gave up
        if let Ok(Ok(connection)) = self.rx.try_recv() {
            self.inner.release(connection);
        }
    }
}
