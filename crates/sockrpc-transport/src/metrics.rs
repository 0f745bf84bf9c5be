//! Channel counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::pool::PoolStats;

/// Request counters of one channel
#[derive(Debug, Default)]
pub(crate) struct ChannelMetrics {
    requests_sent: AtomicU64,
    responses: AtomicU64,
    transport_errors: AtomicU64,
    timeouts: AtomicU64,
    acquisition_failures: AtomicU64,
}

/// Outcome of one request, as counted by [`ChannelMetrics`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Response,
    TransportError,
    Timeout,
    AcquisitionFailure,
}

impl ChannelMetrics {
    pub(crate) fn record_sent(&self) {
        self.requests_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record(&self, outcome: Outcome) {
        let counter = match outcome {
            Outcome::Response => &self.responses,
            Outcome::TransportError => &self.transport_errors,
            Outcome::Timeout => &self.timeouts,
            Outcome::AcquisitionFailure => &self.acquisition_failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, pending: usize, pool: PoolStats) -> ChannelStats {
        ChannelStats {
            requests_sent: self.requests_sent.load(Ordering::Relaxed),
            responses: self.responses.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            acquisition_failures: self.acquisition_failures.load(Ordering::Relaxed),
            pending,
            pool,
        }
    }
}

/// Snapshot of a channel's statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStats {
    /// Requests accepted by `send`
    pub requests_sent: u64,
    /// Requests answered by the peer
    pub responses: u64,
    /// Requests failed by the connection
    pub transport_errors: u64,
    /// Requests that ran out of time
    pub timeouts: u64,
    /// Requests that never got a connection
    pub acquisition_failures: u64,
    /// Requests currently awaiting a reply
    pub pending: usize,
    /// Pool statistics
    pub pool: PoolStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot() {
        let metrics = ChannelMetrics::default();
        metrics.record_sent();
        metrics.record_sent();
        metrics.record(Outcome::Response);
        metrics.record(Outcome::Timeout);

        let stats = metrics.snapshot(0, PoolStats::default());
        assert_eq!(stats.requests_sent, 2);
        assert_eq!(stats.responses, 1);
        assert_eq!(stats.timeouts, 1);
        assert_eq!(stats.transport_errors, 0);

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["pool"]["peak_size"], 0);
    }
}
