//! Connection management and lifecycle
//!
//! This module owns the connection state machine: connecting, tearing down,
//! and reacting to lost connections.

use std::sync::atomic::Ordering;
use std::time::Instant;

use futures::{SinkExt as _, StreamExt as _};
use tokio::sync::broadcast;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use schemalink_transport_traits::{
    ConnectionEvent, ConnectionState, Frame, TransportError, TransportResult, TransportType,
};

use crate::types::{ConnectionManager, Session, WsStream};

/// Name of the identification event sent after every connect
pub const IDENTIFY_EVENT: &str = "agent_identify";

impl ConnectionManager {
    /// Opens the connection.
    ///
    /// A no-op when already connected. Fails immediately with
    /// [`TransportError::CircuitOpen`] while the circuit breaker is open.
    /// A caller-initiated connect re-enables automatic reconnection.
    pub async fn connect(&self) -> TransportResult<()> {
        self.inner
            .reconnect_allowed
            .store(self.inner.config.reconnect.enabled, Ordering::SeqCst);
        self.inner.exhausted.store(false, Ordering::SeqCst);
        self.connect_internal(false).await
    }

    /// Shared connect path for callers and the reconnector.
    pub(crate) async fn connect_internal(&self, from_reconnector: bool) -> TransportResult<()> {
        if self.is_connected() {
            return Ok(());
        }
        self.check_breaker()?;

        let _guard = self.inner.connect_lock.lock().await;

        // Another caller may have connected while we waited for the lock
        if self.is_connected() {
            return Ok(());
        }
        if from_reconnector && !self.inner.reconnect_allowed.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected(
                "reconnection disabled by disconnect".to_string(),
            ));
        }

        self.set_state(ConnectionState::Connecting);
        self.inner.stats.record_attempt();

        let url = self.inner.config.url.as_str();
        debug!(url = %url, agent_id = %self.inner.identity.agent_id, "Connecting");

        let outcome = tokio::time::timeout(self.inner.config.connect_timeout, connect_async(url))
            .await
            .map_err(|_| {
                TransportError::ConnectionFailed(format!(
                    "connect timed out after {:?}",
                    self.inner.config.connect_timeout
                ))
            })
            .and_then(|result| {
                result.map_err(|e| TransportError::ConnectionFailed(e.to_string()))
            });

        match outcome {
            Ok((stream, _response)) => {
                self.on_connected(stream).await;
                Ok(())
            }
            Err(error) => {
                self.on_connect_failed(&error, from_reconnector);
                Err(error)
            }
        }
    }

    /// Installs a freshly opened socket. Called with the connect lock held.
    async fn on_connected(&self, stream: WsStream) {
        let (writer, reader) = stream.split();
        *self.inner.writer.lock().await = Some(writer);

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.touch_inbound();
        self.inner.breaker.lock().record_success();
        self.inner.health.lock().reset();
        self.inner.stats.record_success();
        self.set_state(ConnectionState::Connected);

        // Register the session before its tasks start so an immediate loss
        // report from them is attributed to this connection
        let (shutdown_tx, _) = broadcast::channel(4);
        let previous = self.inner.session.lock().replace(Session {
            generation,
            shutdown_tx: shutdown_tx.clone(),
            handles: Vec::new(),
        });
        if let Some(previous) = previous {
            previous.signal_shutdown();
        }

        let handles = self.start_session_tasks(generation, &shutdown_tx, reader);
        if let Some(session) = self.inner.session.lock().as_mut()
            && session.generation == generation
        {
            session.handles.extend(handles);
        }

        info!(
            url = %self.inner.config.url,
            agent_id = %self.inner.identity.agent_id,
            generation,
            "Connected"
        );
        self.inner.events.emit(ConnectionEvent::Connected {
            transport_type: TransportType::WebSocket,
            endpoint: self.inner.config.url.clone(),
        });

        let identify = Frame::event(IDENTIFY_EVENT, self.inner.identity.identification_payload());
        if let Err(e) = self.send_frame(&identify).await {
            warn!(agent_id = %self.inner.identity.agent_id, "Failed to send identification: {}", e);
        }
    }

    fn on_connect_failed(&self, error: &TransportError, from_reconnector: bool) {
        self.set_state(ConnectionState::Failed);
        self.inner.breaker.lock().record_failure();
        self.inner.stats.record_failure();

        warn!(url = %self.inner.config.url, "Connect failed: {}", error);
        self.inner.events.emit(ConnectionEvent::ConnectFailed {
            endpoint: self.inner.config.url.clone(),
            reason: error.to_string(),
        });

        // The reconnector drives its own retries
        if !from_reconnector {
            self.schedule_reconnect();
        }
    }

    /// Closes the connection.
    ///
    /// Stops background tasks, closes the socket, fails every pending call
    /// with a connection-closed error and disables automatic reconnection
    /// until the next `connect()`.
    pub async fn disconnect(&self) -> TransportResult<()> {
        self.inner.reconnect_allowed.store(false, Ordering::SeqCst);
        let _ = self.inner.shutdown_tx.send(());

        let _guard = self.inner.connect_lock.lock().await;

        let was = self.state();
        let session = self.inner.session.lock().take();
        if let Some(session) = session {
            session.signal_shutdown();
            for handle in session.handles {
                handle.abort();
            }
        }

        let writer = self.inner.writer.lock().await.take();
        if let Some(mut writer) = writer {
            let _ = writer.send(Message::Close(None)).await;
            let _ = writer.close().await;
        }

        self.inner.batcher.drain();
        let failed = self
            .inner
            .correlator
            .fail_all(&TransportError::ConnectionClosed("disconnected".to_string()));
        self.set_state(ConnectionState::Disconnected);

        info!(
            url = %self.inner.config.url,
            failed_requests = failed,
            "Disconnected"
        );
        if was != ConnectionState::Disconnected {
            self.inner.events.emit(ConnectionEvent::Disconnected {
                endpoint: self.inner.config.url.clone(),
                reason: "disconnect requested".to_string(),
                unexpected: false,
            });
        }
        Ok(())
    }

    /// Handles an unexpected close observed by a background task of
    /// connection `generation`.
    ///
    /// Follows the connect-failure path and schedules reconnection.
    /// Reports from a superseded connection are ignored.
    pub(crate) async fn handle_connection_lost(&self, generation: u64, reason: &str) {
        let _guard = self.inner.connect_lock.lock().await;

        let current = {
            let mut session = self.inner.session.lock();
            if session.as_ref().is_some_and(|s| s.generation == generation) {
                session.take()
            } else {
                None
            }
        };
        let Some(current) = current else {
            debug!(generation, "Ignoring loss report from superseded connection");
            return;
        };
        current.signal_shutdown();

        self.inner.writer.lock().await.take();
        self.inner.batcher.drain();
        let failed = self
            .inner
            .correlator
            .fail_all(&TransportError::ConnectionClosed(reason.to_string()));

        self.set_state(ConnectionState::Failed);
        self.inner.breaker.lock().record_failure();
        self.inner.stats.record_failure();

        warn!(
            url = %self.inner.config.url,
            reason = %reason,
            failed_requests = failed,
            "Connection lost"
        );
        self.inner.events.emit(ConnectionEvent::Disconnected {
            endpoint: self.inner.config.url.clone(),
            reason: reason.to_string(),
            unexpected: true,
        });

        self.schedule_reconnect();
    }

    /// Writes one frame.
    ///
    /// Fails with a connection error unless the state is `Connected` and the
    /// writer half is present.
    pub(crate) async fn send_frame(&self, frame: &Frame) -> TransportResult<()> {
        let state = self.state();
        if !state.is_connected() {
            return Err(TransportError::NotConnected(format!("connection is {state}")));
        }

        let text = frame.encode()?;
        let mut writer = self.inner.writer.lock().await;
        let writer = writer
            .as_mut()
            .ok_or_else(|| TransportError::NotConnected("writer half absent".to_string()))?;
        writer
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    /// Writes a WebSocket control frame, ignoring state.
    pub(crate) async fn send_control(&self, message: Message) {
        if let Some(writer) = self.inner.writer.lock().await.as_mut()
            && let Err(e) = writer.send(message).await
        {
            debug!("Failed to send control frame: {}", e);
        }
    }

    pub(crate) fn set_state(&self, next: ConnectionState) {
        let mut state = self.inner.state.write();
        if *state != next {
            debug!(from = %*state, to = %next, "Connection state transition");
            *state = next;
        }
    }

    /// Time of the last inbound frame
    pub fn last_inbound(&self) -> Instant {
        *self.inner.last_inbound.lock()
    }
}
