//! Core types for the persistent connection
//!
//! The connection manager is a cheap handle over shared state. Each piece of
//! shared state sits behind its own lock so that, for example, reading the
//! state never waits on an in-progress connect.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use futures::stream::{SplitSink, SplitStream};
use parking_lot::{Mutex, RwLock};
use tokio::net::TcpStream;
use tokio::sync::{Semaphore, broadcast};
use tokio::task::JoinHandle;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, tungstenite::Message};

use schemalink_transport_traits::{
    AgentIdentity, ConnectionEvent, ConnectionEventEmitter, ConnectionState, ConnectionStats,
    ConnectionStatsSnapshot, ServerEvent, TransportError, TransportResult,
};

use crate::batching::BatchingEngine;
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerStats};
use crate::config::WebSocketConfig;
use crate::correlator::RequestCorrelator;
use crate::health::{HealthInfo, HealthMonitor};

/// Client-side WebSocket stream
pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
/// WebSocket write half
pub(crate) type WsWriter = SplitSink<WsStream, Message>;
/// WebSocket read half
pub(crate) type WsReader = SplitStream<WsStream>;

/// Background tasks of one live connection.
#[derive(Debug)]
pub(crate) struct Session {
    /// Connection generation the tasks belong to
    pub(crate) generation: u64,
    /// Stops every task of this session
    pub(crate) shutdown_tx: broadcast::Sender<()>,
    /// Task handles
    pub(crate) handles: Vec<JoinHandle<()>>,
}

impl Session {
    /// Signals every task to stop; tasks exit at their next select point.
    pub(crate) fn signal_shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// Shared state behind a [`ConnectionManager`]
pub(crate) struct ConnectionInner {
    pub(crate) config: WebSocketConfig,
    pub(crate) identity: AgentIdentity,

    /// Authoritative connection state
    pub(crate) state: RwLock<ConnectionState>,
    /// Serializes connect attempts
    pub(crate) connect_lock: tokio::sync::Mutex<()>,
    /// Write half; `None` while disconnected
    pub(crate) writer: tokio::sync::Mutex<Option<WsWriter>>,

    pub(crate) breaker: Mutex<CircuitBreaker>,
    pub(crate) correlator: RequestCorrelator,
    pub(crate) batcher: BatchingEngine,
    pub(crate) health: Mutex<HealthMonitor>,
    pub(crate) stats: ConnectionStats,

    pub(crate) events: ConnectionEventEmitter,
    pub(crate) server_events: broadcast::Sender<ServerEvent>,

    /// Caps outstanding requests
    pub(crate) request_permits: Arc<Semaphore>,

    /// Tasks of the live connection
    pub(crate) session: Mutex<Option<Session>>,
    /// Stops the reconnector on caller-initiated disconnect
    pub(crate) shutdown_tx: broadcast::Sender<()>,
    /// Incremented on each successful connect
    pub(crate) generation: AtomicU64,

    /// Cleared by `disconnect()`, set again by `connect()`
    pub(crate) reconnect_allowed: AtomicBool,
    /// Set while a reconnect loop is running
    pub(crate) reconnecting: AtomicBool,
    /// Set once bounded reconnection gave up
    pub(crate) exhausted: AtomicBool,

    /// Arrival time of the last inbound frame
    pub(crate) last_inbound: Mutex<Instant>,
}

/// Owns one persistent-socket connection: its state machine, read loop,
/// heartbeat, health monitor and reconnector.
///
/// Cloning yields another handle to the same connection.
#[derive(Clone)]
pub struct ConnectionManager {
    pub(crate) inner: Arc<ConnectionInner>,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("url", &self.inner.config.url)
            .field("agent_id", &self.inner.identity.agent_id)
            .field("state", &self.state())
            .field("pending", &self.inner.correlator.pending_count())
            .finish()
    }
}

impl ConnectionManager {
    /// Create a manager for `config`. No I/O is performed until `connect()`.
    pub fn new(config: WebSocketConfig) -> TransportResult<Self> {
        config.validate()?;

        let identity = AgentIdentity::derive(config.role.clone(), config.url.clone())
            .with_capabilities(config.capabilities.iter().cloned());
        let (shutdown_tx, _) = broadcast::channel(4);
        let (server_events, _) = broadcast::channel(256);

        let inner = ConnectionInner {
            breaker: Mutex::new(CircuitBreaker::new(config.circuit_breaker.clone())),
            correlator: RequestCorrelator::new(identity.agent_id.clone()),
            batcher: BatchingEngine::new(config.batch.clone()),
            health: Mutex::new(HealthMonitor::new(config.health.failure_threshold)),
            request_permits: Arc::new(Semaphore::new(config.max_concurrent_requests)),
            reconnect_allowed: AtomicBool::new(config.reconnect.enabled),
            identity,
            config,
            state: RwLock::new(ConnectionState::Disconnected),
            connect_lock: tokio::sync::Mutex::new(()),
            writer: tokio::sync::Mutex::new(None),
            stats: ConnectionStats::new(),
            events: ConnectionEventEmitter::default(),
            server_events,
            session: Mutex::new(None),
            shutdown_tx,
            generation: AtomicU64::new(0),
            reconnecting: AtomicBool::new(false),
            exhausted: AtomicBool::new(false),
            last_inbound: Mutex::new(Instant::now()),
        };

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.read()
    }

    /// Whether the connection is open
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Configuration in use
    pub fn config(&self) -> &WebSocketConfig {
        &self.inner.config
    }

    /// Identity presented to the server
    pub fn identity(&self) -> &AgentIdentity {
        &self.inner.identity
    }

    /// Subscribe to lifecycle events
    pub fn subscribe_connection_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events.subscribe()
    }

    /// Subscribe to recognized server-pushed events
    pub fn subscribe_server_events(&self) -> broadcast::Receiver<ServerEvent> {
        self.inner.server_events.subscribe()
    }

    /// Connection counters
    pub fn stats(&self) -> ConnectionStatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Circuit breaker statistics
    pub fn circuit_breaker_stats(&self) -> CircuitBreakerStats {
        self.inner.breaker.lock().statistics()
    }

    /// Health monitor state
    pub fn health_info(&self) -> HealthInfo {
        self.inner.health.lock().info()
    }

    /// Calls waiting for replies
    pub fn pending_requests(&self) -> usize {
        self.inner.correlator.pending_count()
    }

    /// Whether bounded reconnection has given up
    pub fn is_exhausted(&self) -> bool {
        self.inner.exhausted.load(Ordering::SeqCst)
    }

    /// Current connection generation
    pub(crate) fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    /// Records inbound activity for the heartbeat and health monitor
    pub(crate) fn touch_inbound(&self) {
        *self.inner.last_inbound.lock() = Instant::now();
    }

    /// Whether any frame arrived at or after `since`
    pub(crate) fn inbound_since(&self, since: Instant) -> bool {
        *self.inner.last_inbound.lock() >= since
    }

    /// Fails fast when the circuit is open.
    pub(crate) fn check_breaker(&self) -> TransportResult<()> {
        self.inner
            .breaker
            .lock()
            .check()
            .map_err(|retry_after| TransportError::CircuitOpen { retry_after })
    }
}
