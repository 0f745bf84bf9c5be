//! Correlation of in-flight requests with their callers.
//!
//! Each in-flight connection has at most one pending request, so the
//! connection identity is the correlation key. An entry is removed by
//! whichever of response, transport error, timeout or close gets to it
//! first; the loser finds nothing and does nothing. That single removal is
//! what makes every caller hear back at most once.

use std::collections::HashMap;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use crate::connection::ConnectionId;
use crate::error::{ChannelError, ChannelResult};

/// Completion handle of one request
pub type Responder = oneshot::Sender<ChannelResult<Bytes>>;

/// Outcome of [`CorrelationTable::register`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// The request is pending
    Registered,
    /// The connection already had a pending request; the new caller got an
    /// internal error
    Duplicate,
    /// The table was cleared; the caller was dropped without an answer
    Closed,
}

#[derive(Debug)]
struct PendingRequest {
    payload: Bytes,
    responder: Responder,
    timer: Option<AbortHandle>,
    cancel: CancellationToken,
    registered_at: Instant,
}

#[derive(Debug, Default)]
struct TableState {
    pending: HashMap<ConnectionId, PendingRequest>,
    closed: bool,
}

/// Pending requests keyed by connection identity
#[derive(Debug, Default)]
pub struct CorrelationTable {
    state: Mutex<TableState>,
}

impl CorrelationTable {
    /// Create an empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a pending request for connection `id`.
    ///
    /// `arm` schedules the timeout and is called with the table locked, so
    /// the timer can never run before the entry exists. It is not called
    /// unless the request is actually registered.
    pub fn register<F>(
        &self,
        id: ConnectionId,
        responder: Responder,
        payload: Bytes,
        cancel: CancellationToken,
        arm: F,
    ) -> Registration
    where
        F: FnOnce() -> Option<AbortHandle>,
    {
        let mut state = self.state.lock();
        if state.closed {
            return Registration::Closed;
        }
        if state.pending.contains_key(&id) {
            drop(state);
            warn!(connection = %id, "Connection already has a pending request");
            let _ = responder.send(Err(ChannelError::Internal(format!(
                "connection {id} already has a pending request"
            ))));
            return Registration::Duplicate;
        }

        let timer = arm();
        state.pending.insert(
            id,
            PendingRequest {
                payload,
                responder,
                timer,
                cancel,
                registered_at: Instant::now(),
            },
        );
        trace!(connection = %id, pending = state.pending.len(), "Registered request");
        Registration::Registered
    }

    /// Complete the pending request of `id` with `result`.
    ///
    /// Returns `false` when there is nothing to complete, for instance
    /// because the request already timed out.
    pub fn resolve(&self, id: ConnectionId, result: ChannelResult<Bytes>) -> bool {
        let Some(entry) = self.state.lock().pending.remove(&id) else {
            trace!(connection = %id, "No pending request, dropping result");
            return false;
        };

        if let Some(timer) = entry.timer {
            timer.abort();
        }
        // The caller may have stopped listening; that is not an error here
        let _ = entry.responder.send(result);
        true
    }

    /// Time out the pending request of `id`: cancel its exchange and hand the
    /// caller its original payload back.
    pub fn expire(&self, id: ConnectionId) -> bool {
        let Some(entry) = self.state.lock().pending.remove(&id) else {
            return false;
        };

        let elapsed = entry.registered_at.elapsed();
        entry.cancel.cancel();
        trace!(connection = %id, elapsed_ms = elapsed.as_millis() as u64, "Request timed out");
        let _ = entry.responder.send(Err(ChannelError::Timeout {
            payload: entry.payload,
            elapsed,
        }));
        true
    }

    /// Drop every pending request without answering it and refuse new ones.
    /// Returns the number of requests dropped.
    pub fn clear(&self) -> usize {
        let drained: Vec<PendingRequest> = {
            let mut state = self.state.lock();
            state.closed = true;
            state.pending.drain().map(|(_, entry)| entry).collect()
        };

        let count = drained.len();
        for entry in drained {
            if let Some(timer) = entry.timer {
                timer.abort();
            }
            entry.cancel.cancel();
        }
        count
    }

    /// Number of pending requests
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Whether no request is pending
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().pending.is_empty()
    }

    /// Whether connection `id` has a pending request
    #[must_use]
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.state.lock().pending.contains_key(&id)
    }

    /// Whether [`clear`](Self::clear) has been called
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}
