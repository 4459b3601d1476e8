//! Connection diagnostics counters.
//!
//! These counters are for observability only; no control decision reads them.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// A serializable snapshot of [`ConnectionStats`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionStatsSnapshot {
    /// Connect attempts, initial and reconnect
    pub attempts: u64,
    /// Successful connects
    pub successes: u64,
    /// Failed connects and lost connections
    pub failures: u64,
    /// Reconnect attempts started by the reconnector
    pub reconnects: u64,
    /// Calls submitted
    pub requests: u64,
    /// Calls that resolved with an error
    pub failed_requests: u64,
    /// Number of latency samples recorded
    pub latency_samples: u64,
    /// Exponential moving average of call latency, in milliseconds
    pub average_latency_ms: f64,
}

/// Lock-free, monotonically increasing connection counters.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    attempts: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    reconnects: AtomicU64,
    requests: AtomicU64,
    failed_requests: AtomicU64,
    latency_samples: AtomicU64,
    /// Stored as an exponential moving average in microseconds.
    avg_latency_us: AtomicU64,
}

impl ConnectionStats {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a connect attempt.
    pub fn record_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a successful connect.
    pub fn record_success(&self) {
        self.successes.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a failed connect or a lost connection.
    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a reconnect attempt.
    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a submitted call.
    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a call that resolved with an error.
    pub fn record_failed_request(&self) {
        self.failed_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Folds a latency sample into the moving average (alpha = 0.1).
    pub fn record_latency_us(&self, latency_us: u64) {
        self.latency_samples.fetch_add(1, Ordering::Relaxed);
        let current = self.avg_latency_us.load(Ordering::Relaxed);
        let new_avg = if current == 0 {
            latency_us
        } else {
            current.saturating_mul(9).saturating_add(latency_us) / 10
        };
        self.avg_latency_us.store(new_avg, Ordering::Relaxed);
    }

    /// Takes a snapshot of all counters.
    pub fn snapshot(&self) -> ConnectionStatsSnapshot {
        ConnectionStatsSnapshot {
            attempts: self.attempts.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            requests: self.requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            latency_samples: self.latency_samples.load(Ordering::Relaxed),
            average_latency_ms: self.avg_latency_us.load(Ordering::Relaxed) as f64 / 1000.0,
        }
    }
}
