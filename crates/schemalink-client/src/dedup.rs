//! In-flight call deduplication.
//!
//! The first caller for a fingerprint becomes the leader and performs the
//! network call; identical callers arriving while it is in flight wait for
//! the leader's outcome instead of issuing their own.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use schemalink_transport_traits::TransportResult;

use crate::fingerprint::Fingerprint;

type SharedOutcome = TransportResult<Value>;

#[derive(Debug)]
struct InFlight {
    token: u64,
    tx: broadcast::Sender<SharedOutcome>,
}

enum Role<'a> {
    Leader(LeaderGuard<'a>),
    Follower(broadcast::Receiver<SharedOutcome>),
}

/// Deduplication statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeduplicationStats {
    /// Calls that went to the network
    pub leaders: u64,
    /// Calls served by another caller's round trip
    pub deduplicated: u64,
    /// Fingerprints currently in flight
    pub in_flight: usize,
}

/// Registry of in-flight calls keyed by fingerprint.
#[derive(Debug, Default)]
pub struct DeduplicationRegistry {
    in_flight: Mutex<HashMap<Fingerprint, InFlight>>,
    next_token: AtomicU64,
    leaders: AtomicU64,
    deduplicated: AtomicU64,
}

impl DeduplicationRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `call` unless an identical call is already in flight, in which
    /// case the in-flight call's outcome is returned.
    ///
    /// If the leader is cancelled before finishing, its waiters retry and
    /// one of them becomes the new leader.
    pub async fn run<F, Fut>(&self, key: Fingerprint, call: F) -> SharedOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = SharedOutcome>,
    {
        let guard = loop {
            match self.join(&key) {
                Role::Leader(guard) => break guard,
                Role::Follower(mut rx) => match rx.recv().await {
                    Ok(outcome) => {
                        self.deduplicated.fetch_add(1, Ordering::Relaxed);
                        trace!(fingerprint = %key, "Served by in-flight call");
                        return outcome;
                    }
                    Err(_) => {
                        debug!(fingerprint = %key, "In-flight leader went away; retrying");
                    }
                },
            }
        };

        let outcome = call().await;
        guard.complete(outcome.clone());
        outcome
    }

    fn join(&self, key: &Fingerprint) -> Role<'_> {
        let mut in_flight = self.in_flight.lock();
        if let Some(existing) = in_flight.get(key) {
            return Role::Follower(existing.tx.subscribe());
        }

        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (tx, _) = broadcast::channel(1);
        in_flight.insert(key.clone(), InFlight { token, tx });
        self.leaders.fetch_add(1, Ordering::Relaxed);

        Role::Leader(LeaderGuard {
            registry: self,
            key: key.clone(),
            token,
        })
    }

    /// Removes the entry registered under `token` and returns its sender.
    fn release(&self, key: &Fingerprint, token: u64) -> Option<broadcast::Sender<SharedOutcome>> {
        let mut in_flight = self.in_flight.lock();
        if in_flight.get(key).is_some_and(|entry| entry.token == token) {
            in_flight.remove(key).map(|entry| entry.tx)
        } else {
            None
        }
    }

    /// Calls currently in flight
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Get deduplication statistics.
    pub fn stats(&self) -> DeduplicationStats {
        DeduplicationStats {
            leaders: self.leaders.load(Ordering::Relaxed),
            deduplicated: self.deduplicated.load(Ordering::Relaxed),
            in_flight: self.in_flight(),
        }
    }
}

/// Leadership of one in-flight fingerprint. Dropping it without completing
/// wakes the waiters so they can retry.
struct LeaderGuard<'a> {
    registry: &'a DeduplicationRegistry,
    key: Fingerprint,
    token: u64,
}

impl LeaderGuard<'_> {
    fn complete(self, outcome: SharedOutcome) {
        if let Some(tx) = self.registry.release(&self.key, self.token) {
            // No waiters is fine
            let _ = tx.send(outcome);
        }
    }
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        // No-op after complete(); otherwise closing the channel wakes waiters
        self.registry.release(&self.key, self.token);
    }
}
