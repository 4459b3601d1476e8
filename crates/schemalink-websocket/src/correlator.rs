//! Request/response correlation with per-call timeouts
//!
//! Every outbound call owns a one-shot result slot registered under a
//! process-unique id. The read loop resolves slots by id; a slot that times
//! out is removed, so a reply arriving later is unmatched and dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use schemalink_transport_traits::{TransportError, TransportResult, batch_item_result};

/// Receiving half of a result slot.
pub type ResultReceiver = oneshot::Receiver<TransportResult<Value>>;

/// A call waiting for its reply.
#[derive(Debug)]
struct PendingRequest {
    method: String,
    submitted_at: Instant,
    slot: oneshot::Sender<TransportResult<Value>>,
}

/// Maps outbound request ids to pending result slots.
#[derive(Debug)]
pub struct RequestCorrelator {
    agent_id: String,
    counter: AtomicU64,
    pending: DashMap<String, PendingRequest>,
    /// Batch id -> item ids, in submission order
    batches: DashMap<String, Vec<String>>,
}

impl RequestCorrelator {
    /// Create a correlator issuing ids prefixed with `agent_id`
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            counter: AtomicU64::new(0),
            pending: DashMap::new(),
            batches: DashMap::new(),
        }
    }

    /// Allocates the next request id: `<agent_id>-<n>`.
    pub fn next_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}-{}", self.agent_id, n)
    }

    /// Registers a result slot for a new call and returns its id.
    pub fn register(&self, method: &str) -> (String, ResultReceiver) {
        let id = self.next_id();
        let (slot, rx) = oneshot::channel();
        self.pending.insert(
            id.clone(),
            PendingRequest {
                method: method.to_string(),
                submitted_at: Instant::now(),
                slot,
            },
        );
        (id, rx)
    }

    /// Groups already-registered item ids under a fresh batch id.
    pub fn register_batch(&self, item_ids: Vec<String>) -> String {
        let batch_id = self.next_id();
        self.batches.insert(batch_id.clone(), item_ids);
        batch_id
    }

    /// Resolves one slot. Returns `false` if no call is waiting on `id`.
    pub fn resolve(&self, id: &str, result: TransportResult<Value>) -> bool {
        match self.pending.remove(id) {
            Some((_, pending)) => {
                trace!(
                    request_id = %id,
                    method = %pending.method,
                    elapsed = ?pending.submitted_at.elapsed(),
                    "Resolved pending request"
                );
                // The caller may have given up already
                let _ = pending.slot.send(result);
                true
            }
            None => {
                debug!(request_id = %id, "Dropping reply for unknown or expired request");
                false
            }
        }
    }

    /// Resolves every item of a batch from its ordered `results`.
    ///
    /// Items without a matching result element fail with a protocol error.
    pub fn resolve_batch(&self, batch_id: &str, results: Vec<Value>) -> bool {
        let Some((_, item_ids)) = self.batches.remove(batch_id) else {
            debug!(request_id = %batch_id, "Dropping reply for unknown or expired batch");
            return false;
        };

        let returned = results.len();
        let mut results = results.into_iter();
        for item_id in &item_ids {
            let outcome = match results.next() {
                Some(value) => batch_item_result(value),
                None => Err(TransportError::Protocol(format!(
                    "batch {batch_id} returned {returned} results for {} items",
                    item_ids.len()
                ))),
            };
            self.resolve(item_id, outcome);
        }
        true
    }

    /// Fails the call or batch named by `id`.
    ///
    /// A batch id fails every contained item.
    pub fn fail(&self, id: &str, error: TransportError) -> bool {
        if let Some((_, item_ids)) = self.batches.remove(id) {
            for item_id in item_ids {
                self.resolve(&item_id, Err(error.clone()));
            }
            return true;
        }
        self.resolve(id, Err(error))
    }

    /// Waits for the slot of `id`, bounded by `timeout`.
    ///
    /// On expiry the pending entry is removed and the caller receives
    /// [`TransportError::Timeout`].
    pub async fn wait(
        &self,
        id: &str,
        rx: ResultReceiver,
        method: &str,
        timeout: Duration,
    ) -> TransportResult<Value> {
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TransportError::ConnectionClosed(
                "result slot dropped".to_string(),
            )),
            Err(_) => {
                self.forget(id);
                debug!(request_id = %id, method = %method, ?timeout, "Request timed out");
                Err(TransportError::timeout(method, timeout))
            }
        }
    }

    /// Removes a pending entry without resolving it.
    pub fn forget(&self, id: &str) {
        self.pending.remove(id);
        if !self.batches.is_empty() {
            self.batches
                .retain(|_, items| items.iter().any(|item| self.pending.contains_key(item)));
        }
    }

    /// Resolves every pending slot with `error` and drops all batches.
    pub fn fail_all(&self, error: &TransportError) -> usize {
        self.batches.clear();
        let ids: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        let mut failed = 0;
        for id in ids {
            if let Some((_, pending)) = self.pending.remove(&id) {
                let _ = pending.slot.send(Err(error.clone()));
                failed += 1;
            }
        }
        failed
    }

    /// Number of calls waiting for a reply
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Whether `id` is still waiting
    pub fn is_pending(&self, id: &str) -> bool {
        self.pending.contains_key(id)
    }
}

/// Removes a pending entry when the waiting caller goes away.
///
/// Held from registration until the call resolves; a caller dropped in
/// between (outer timeout, `select!`, aborted task) leaves no entry behind.
#[derive(Debug)]
pub struct PendingGuard<'a> {
    correlator: &'a RequestCorrelator,
    id: &'a str,
    armed: bool,
}

impl<'a> PendingGuard<'a> {
    /// Guard the pending entry `id`
    pub fn new(correlator: &'a RequestCorrelator, id: &'a str) -> Self {
        Self {
            correlator,
            id,
            armed: true,
        }
    }

    /// The call resolved; nothing to clean up
    pub fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            trace!(request_id = %self.id, "Caller dropped; forgetting pending request");
            self.correlator.forget(self.id);
        }
    }
}
