//! Tool calls over the persistent connection and the `ToolTransport`
//! implementation.

use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, trace};

use schemalink_transport_traits::{
    BatchItem, ConnectionState, Frame, ToolCall, ToolTransport, TransportError, TransportFuture,
    TransportResult, TransportType, now_timestamp,
};

use crate::batching::{BatchEntry, PushOutcome};
use crate::correlator::PendingGuard;
use crate::health::HealthStatus;
use crate::types::ConnectionManager;

impl ConnectionManager {
    /// Issues a tool call and waits for its result.
    ///
    /// Fails fast while the circuit is open or the connection is not
    /// `Connected`. The call's own timeout (or the configured default)
    /// bounds the whole call, including any wait for a request permit.
    /// This layer performs no retries.
    pub async fn call(&self, call: ToolCall) -> TransportResult<Value> {
        let ToolCall {
            method,
            params,
            options,
        } = call;
        let timeout = options.timeout.unwrap_or(self.inner.config.request_timeout);
        let deadline = Instant::now() + timeout;

        self.check_breaker()?;
        let state = self.state();
        if !state.is_connected() {
            return Err(TransportError::NotConnected(format!("connection is {state}")));
        }

        self.inner.stats.record_request();
        let started = Instant::now();

        let permit = tokio::time::timeout_at(
            deadline,
            self.inner.request_permits.clone().acquire_owned(),
        )
        .await;
        let result = match permit {
            Err(_) => Err(TransportError::timeout(method.as_str(), timeout)),
            Ok(Err(_)) => Err(TransportError::Internal(
                "request semaphore closed".to_string(),
            )),
            Ok(Ok(_permit)) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                let outcome = if options.batchable && self.inner.batcher.is_enabled() {
                    self.call_batched(&method, params, remaining).await
                } else {
                    self.call_single(&method, params, remaining).await
                };
                // Report the caller's timeout, not what was left of it
                outcome.map_err(|e| match e {
                    TransportError::Timeout { .. } => TransportError::timeout(method.as_str(), timeout),
                    other => other,
                })
            }
        };

        self.inner
            .stats
            .record_latency_us(started.elapsed().as_micros() as u64);
        if result.is_err() {
            self.inner.stats.record_failed_request();
        }
        result
    }

    async fn call_single(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> TransportResult<Value> {
        let correlator = &self.inner.correlator;
        let (id, rx) = correlator.register(method);
        let guard = PendingGuard::new(correlator, &id);

        let frame = Frame::request(id.clone(), method, params);
        self.send_frame(&frame).await?;
        trace!(request_id = %id, method = %method, "Request sent");

        let result = correlator.wait(&id, rx, method, timeout).await;
        guard.disarm();
        result
    }

    async fn call_batched(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> TransportResult<Value> {
        let correlator = &self.inner.correlator;
        let (id, rx) = correlator.register(method);
        let guard = PendingGuard::new(correlator, &id);

        let entry = BatchEntry {
            id: id.clone(),
            method: method.to_string(),
            params,
            timestamp: now_timestamp(),
        };
        match self.inner.batcher.push(entry) {
            PushOutcome::Flush(items) => self.flush_batch(items).await,
            PushOutcome::ScheduleFlush { generation, delay } => {
                self.schedule_batch_flush(generation, delay);
            }
            PushOutcome::Queued => {}
        }

        let result = correlator.wait(&id, rx, method, timeout).await;
        guard.disarm();
        result
    }

    /// Sends a closed window. A single item goes out as a plain request.
    ///
    /// A send failure fails every contained item.
    pub(crate) async fn flush_batch(&self, mut items: Vec<BatchEntry>) {
        let correlator = &self.inner.correlator;

        // Callers that already timed out have nothing to wait for
        items.retain(|item| correlator.is_pending(&item.id));

        match items.len() {
            0 => {}
            1 => {
                let Some(item) = items.pop() else { return };
                let frame = Frame::Request {
                    request_id: item.id.clone(),
                    method: item.method,
                    params: item.params,
                    timestamp: item.timestamp,
                };
                if let Err(e) = self.send_frame(&frame).await {
                    correlator.fail(&item.id, e);
                }
            }
            count => {
                let ids = items.iter().map(|item| item.id.clone()).collect();
                let batch_id = correlator.register_batch(ids);
                let frame = Frame::BatchRequest {
                    request_id: batch_id.clone(),
                    requests: items
                        .into_iter()
                        .map(|item| BatchItem {
                            method: item.method,
                            params: item.params,
                            timestamp: item.timestamp,
                        })
                        .collect(),
                };

                debug!(request_id = %batch_id, items = count, "Sending batch");
                if let Err(e) = self.send_frame(&frame).await {
                    correlator.fail(&batch_id, e);
                }
            }
        }
    }

    /// Flushes window `generation` after `delay` unless it was flushed
    /// already.
    fn schedule_batch_flush(&self, generation: u64, delay: Duration) {
        let manager = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(items) = manager.inner.batcher.take_expired(generation) {
                trace!(items = items.len(), "Batch window expired");
                manager.flush_batch(items).await;
            }
        });
    }
}

impl ToolTransport for ConnectionManager {
    fn transport_type(&self) -> TransportType {
        TransportType::WebSocket
    }

    fn state(&self) -> ConnectionState {
        ConnectionManager::state(self)
    }

    fn call(&self, call: ToolCall) -> TransportFuture<'_, TransportResult<Value>> {
        Box::pin(ConnectionManager::call(self, call))
    }

    fn connect(&self) -> TransportFuture<'_, TransportResult<()>> {
        Box::pin(ConnectionManager::connect(self))
    }

    fn disconnect(&self) -> TransportFuture<'_, TransportResult<()>> {
        Box::pin(ConnectionManager::disconnect(self))
    }

    fn health_check(&self) -> TransportFuture<'_, bool> {
        Box::pin(async move {
            self.is_connected() && self.health_info().status != HealthStatus::Stale
        })
    }

    fn is_exhausted(&self) -> bool {
        ConnectionManager::is_exhausted(self)
    }

    fn endpoint(&self) -> Option<String> {
        Some(self.inner.config.url.clone())
    }
}
