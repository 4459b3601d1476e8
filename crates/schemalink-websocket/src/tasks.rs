//! Background task management for the persistent connection
//!
//! Each live connection runs a read loop, a heartbeat and a health monitor,
//! all stopped through the session's shutdown channel. The reconnector is a
//! short-lived task that outlives individual connections and stops on the
//! manager-wide shutdown signal sent by `disconnect()`.

use std::sync::atomic::Ordering;
use std::time::Instant;

use futures::StreamExt as _;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, trace, warn};

use schemalink_transport_traits::{
    ConnectionEvent, ConnectionState, EventKind, Frame, ServerEvent, TransportError,
    TransportFuture, TransportResult,
};

use crate::health::{HealthStatus, probe_passed};
use crate::reconnect::Backoff;
use crate::types::{ConnectionManager, WsReader};

impl ConnectionManager {
    /// Starts the read loop, heartbeat and health monitor of connection
    /// `generation`.
    pub(crate) fn start_session_tasks(
        &self,
        generation: u64,
        shutdown_tx: &broadcast::Sender<()>,
        reader: WsReader,
    ) -> Vec<JoinHandle<()>> {
        let mut handles = vec![self.spawn_read_loop(generation, shutdown_tx.subscribe(), reader)];

        if self.inner.config.heartbeat.enabled {
            handles.push(self.spawn_heartbeat_task(generation, shutdown_tx.subscribe()));
        }
        if self.inner.config.health.enabled {
            handles.push(self.spawn_health_monitor(generation, shutdown_tx.subscribe()));
        }

        debug!(
            generation,
            tasks = handles.len(),
            "Started background tasks for connection"
        );
        handles
    }

    /// Spawn the read loop, the single consumer of the socket's read half
    ///
    /// Routes replies to their result slots, answers pings, and publishes
    /// server events. An unexpected close enters the connection-lost path.
    fn spawn_read_loop(
        &self,
        generation: u64,
        mut shutdown_rx: broadcast::Receiver<()>,
        mut reader: WsReader,
    ) -> JoinHandle<()> {
        let manager = self.clone();

        tokio::spawn(async move {
            debug!(generation, "Read loop started");

            let reason = loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!(generation, "Read loop received shutdown signal");
                        return;
                    }

                    message = reader.next() => {
                        match message {
                            Some(Ok(Message::Text(text))) => {
                                manager.touch_inbound();
                                manager.handle_text(text.as_str()).await;
                            }
                            Some(Ok(Message::Binary(data))) => {
                                manager.touch_inbound();
                                warn!(generation, len = data.len(), "Ignoring binary frame");
                            }
                            Some(Ok(Message::Ping(data))) => {
                                manager.touch_inbound();
                                manager.send_control(Message::Pong(data)).await;
                            }
                            Some(Ok(Message::Pong(_))) => {
                                manager.touch_inbound();
                            }
                            Some(Ok(Message::Close(frame))) => {
                                break match frame {
                                    Some(frame) => format!(
                                        "closed by server ({}): {}",
                                        u16::from(frame.code),
                                        frame.reason.as_str()
                                    ),
                                    None => "closed by server".to_string(),
                                };
                            }
                            Some(Ok(Message::Frame(_))) => {}
                            Some(Err(e)) => break format!("read error: {e}"),
                            None => break "stream ended".to_string(),
                        }
                    }
                }
            };

            manager.handle_connection_lost(generation, &reason).await;
            debug!(generation, "Read loop terminated");
        })
    }

    /// Handles one inbound text message.
    ///
    /// Malformed frames are logged and skipped; the read loop continues.
    pub(crate) async fn handle_text(&self, text: &str) {
        if text.len() > self.inner.config.max_message_size {
            warn!(
                size = text.len(),
                max = self.inner.config.max_message_size,
                "Dropping oversized frame"
            );
            return;
        }

        let frame = match Frame::decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Skipping inbound frame: {}", e);
                return;
            }
        };
        trace!(frame_type = frame.frame_type(), "Inbound frame");

        match frame {
            Frame::Response {
                request_id,
                payload,
            } => {
                self.inner.correlator.resolve(&request_id, Ok(payload));
            }
            Frame::BatchResponse {
                request_id,
                results,
            } => {
                self.inner.correlator.resolve_batch(&request_id, results);
            }
            Frame::Error {
                request_id: Some(request_id),
                error,
                error_type,
            } => {
                self.inner
                    .correlator
                    .fail(&request_id, TransportError::remote(error, error_type));
            }
            Frame::Error {
                request_id: None,
                error,
                error_type,
            } => {
                warn!(error_type = %error_type, "Server reported error: {}", error);
            }
            Frame::Event {
                event_name,
                payload,
            } => self.dispatch_event(&event_name, payload),
            Frame::Ping { .. } => {
                let pong = Frame::pong(&self.inner.identity.agent_id);
                if let Err(e) = self.send_frame(&pong).await {
                    debug!("Failed to answer ping: {}", e);
                }
            }
            Frame::Pong { .. } => {}
            Frame::Request { request_id, .. } | Frame::BatchRequest { request_id, .. } => {
                warn!(request_id = %request_id, "Ignoring request frame sent by server");
            }
        }
    }

    /// Publishes a recognized server event. Unknown names are logged, never
    /// matched.
    fn dispatch_event(&self, event_name: &str, payload: serde_json::Value) {
        match EventKind::from_name(event_name) {
            Some(kind) => {
                trace!(event = %kind, "Server event");
                // No subscribers is fine
                let _ = self.inner.server_events.send(ServerEvent::new(kind, payload));
            }
            None => {
                warn!(event_name = %event_name, "Unrecognized server event");
            }
        }
    }

    /// Spawn heartbeat task sending periodic JSON pings
    ///
    /// If no frame at all arrives within the pong timeout after a ping, the
    /// connection is treated as lost.
    fn spawn_heartbeat_task(
        &self,
        generation: u64,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let manager = self.clone();
        let config = self.inner.config.heartbeat.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(
                tokio::time::Instant::now() + config.interval,
                config.interval,
            );

            debug!(generation, interval = ?config.interval, "Heartbeat task started");

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!(generation, "Heartbeat task received shutdown signal");
                        break;
                    }

                    _ = ticker.tick() => {
                        if !manager.is_connected() || manager.generation() != generation {
                            continue;
                        }

                        let sent_at = Instant::now();
                        let ping = Frame::ping(&manager.inner.identity.agent_id);
                        if let Err(e) = manager.send_frame(&ping).await {
                            warn!(generation, "Heartbeat ping failed: {}", e);
                            continue;
                        }
                        trace!(generation, "Heartbeat ping sent");

                        tokio::select! {
                            _ = shutdown_rx.recv() => break,
                            () = tokio::time::sleep(config.pong_timeout) => {}
                        }

                        if !manager.inbound_since(sent_at) {
                            warn!(
                                generation,
                                pong_timeout = ?config.pong_timeout,
                                "No pong after heartbeat ping"
                            );
                            manager
                                .handle_connection_lost(generation, "heartbeat pong timeout")
                                .await;
                            break;
                        }
                    }
                }
            }

            debug!(generation, "Heartbeat task terminated");
        })
    }

    /// Spawn the coarse health monitor
    ///
    /// Runs less often than the heartbeat and tolerates busy periods: with
    /// requests in flight a silent probe still passes. Only
    /// `failure_threshold` consecutive failures declare the connection stale.
    fn spawn_health_monitor(
        &self,
        generation: u64,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let manager = self.clone();
        let config = self.inner.config.health.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(
                tokio::time::Instant::now() + config.interval,
                config.interval,
            );

            debug!(generation, interval = ?config.interval, "Health monitor started");

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!(generation, "Health monitor received shutdown signal");
                        break;
                    }

                    _ = ticker.tick() => {
                        if !manager.is_connected() || manager.generation() != generation {
                            continue;
                        }

                        let probe_at = Instant::now();
                        let probe = Frame::ping(&manager.inner.identity.agent_id);
                        if let Err(e) = manager.send_frame(&probe).await {
                            debug!(generation, "Health probe send failed: {}", e);
                        }

                        tokio::select! {
                            _ = shutdown_rx.recv() => break,
                            () = tokio::time::sleep(config.probe_timeout) => {}
                        }

                        let passed = probe_passed(
                            manager.inbound_since(probe_at),
                            manager.pending_requests(),
                        );
                        let status = manager.inner.health.lock().record(passed);

                        match status {
                            HealthStatus::Healthy | HealthStatus::Unknown => {
                                trace!(generation, "Health check passed");
                            }
                            HealthStatus::Degraded => {
                                warn!(generation, "Health check failed; re-evaluating next cycle");
                            }
                            HealthStatus::Stale => {
                                warn!(
                                    generation,
                                    failure_threshold = config.failure_threshold,
                                    "Connection declared stale"
                                );
                                manager
                                    .handle_connection_lost(generation, "health check failed")
                                    .await;
                                break;
                            }
                        }
                    }
                }
            }

            debug!(generation, "Health monitor terminated");
        })
    }

    /// Schedules the reconnector unless reconnection is disabled or a
    /// reconnect loop is already running.
    pub(crate) fn schedule_reconnect(&self) {
        if !self.inner.config.reconnect.enabled
            || !self.inner.reconnect_allowed.load(Ordering::SeqCst)
        {
            debug!("Reconnection disabled; not scheduling");
            return;
        }
        if self
            .inner
            .reconnecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Reconnect loop already running");
            return;
        }

        self.set_state(ConnectionState::Reconnecting);
        self.spawn_reconnection_task();
    }

    /// Spawn the exponential-backoff reconnect loop
    ///
    /// Each attempt re-enters the full connect path, circuit breaker gate
    /// included. The backoff sleep is interruptible by shutdown.
    fn spawn_reconnection_task(&self) {
        let manager = self.clone();
        let mut shutdown_rx = self.inner.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut backoff = Backoff::new(manager.inner.config.reconnect.clone());

            debug!(
                max_attempts = ?manager.inner.config.reconnect.max_attempts,
                initial_delay = ?manager.inner.config.reconnect.initial_delay,
                "Reconnection task started"
            );

            loop {
                if !manager.inner.reconnect_allowed.load(Ordering::SeqCst) {
                    info!("Reconnection disabled by disconnect; stopping");
                    break;
                }

                let Some((attempt, delay)) = backoff.next_attempt() else {
                    let attempts = backoff.attempts();
                    error!(attempts, url = %manager.inner.config.url, "Reconnection exhausted");
                    manager.inner.exhausted.store(true, Ordering::SeqCst);
                    manager.set_state(ConnectionState::Failed);
                    manager
                        .inner
                        .events
                        .emit(ConnectionEvent::ReconnectExhausted { attempts });
                    break;
                };

                manager.set_state(ConnectionState::Reconnecting);
                manager
                    .inner
                    .events
                    .emit(ConnectionEvent::Reconnecting { attempt, delay });
                info!(attempt, delay = ?delay, "Reconnecting");

                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Reconnection task received shutdown during backoff delay");
                        break;
                    }
                    () = tokio::time::sleep(delay) => {}
                }

                manager.inner.stats.record_reconnect();
                match manager.attempt_reconnect().await {
                    Ok(()) => {
                        info!(attempt, "Reconnected");
                        backoff.reset();

                        // A loss reported while this loop still held the
                        // flag was dropped; pick it up here.
                        manager.inner.reconnecting.store(false, Ordering::SeqCst);
                        if manager.is_connected()
                            || manager
                                .inner
                                .reconnecting
                                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                                .is_err()
                        {
                            return;
                        }
                    }
                    Err(TransportError::CircuitOpen { retry_after }) => {
                        debug!(attempt, retry_after = ?retry_after, "Circuit open; backing off");
                    }
                    Err(e) => {
                        warn!(attempt, "Reconnect attempt failed: {}", e);
                    }
                }
            }

            manager.inner.reconnecting.store(false, Ordering::SeqCst);
            debug!("Reconnection task terminated");
        });
    }

    /// One reconnect attempt, boxed so the reconnector and the connect path
    /// do not form a recursive future type.
    fn attempt_reconnect(&self) -> TransportFuture<'static, TransportResult<()>> {
        let manager = self.clone();
        Box::pin(async move { manager.connect_internal(true).await })
    }
}
