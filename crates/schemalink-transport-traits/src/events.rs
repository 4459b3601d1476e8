//! Connection lifecycle events and typed server-pushed events.

use std::fmt;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::broadcast;

use crate::types::TransportType;

/// Lifecycle events a connection reports to its listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// The socket is open and identified.
    Connected {
        /// Transport that connected
        transport_type: TransportType,
        /// Remote endpoint
        endpoint: String,
    },
    /// The connection closed, either by the caller or unexpectedly.
    Disconnected {
        /// Remote endpoint
        endpoint: String,
        /// Why the connection closed
        reason: String,
        /// `false` for a caller-initiated disconnect
        unexpected: bool,
    },
    /// A connect attempt failed.
    ConnectFailed {
        /// Remote endpoint
        endpoint: String,
        /// Failure description
        reason: String,
    },
    /// The reconnector is waiting before its next attempt.
    Reconnecting {
        /// 1-based attempt number
        attempt: u32,
        /// Backoff delay before the attempt
        delay: Duration,
    },
    /// Bounded reconnection gave up; the connection is terminal.
    ReconnectExhausted {
        /// Attempts made
        attempts: u32,
    },
}

/// Broadcasts [`ConnectionEvent`]s to any number of listeners.
#[derive(Debug, Clone)]
pub struct ConnectionEventEmitter {
    sender: broadcast::Sender<ConnectionEvent>,
}

impl ConnectionEventEmitter {
    /// Creates an emitter with room for `capacity` undelivered events per listener.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Registers a new listener.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.sender.subscribe()
    }

    /// Emits an event. Having no listeners is not an error.
    pub fn emit(&self, event: ConnectionEvent) {
        let _ = self.sender.send(event);
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ConnectionEventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Server-pushed event names this client understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A database or table schema changed.
    SchemaChanged,
    /// Explicit cache-invalidation hint.
    CacheInvalidate,
    /// Server acknowledged the identification event.
    ConnectionAck,
    /// Server-side heartbeat.
    Heartbeat,
}

impl EventKind {
    /// All known kinds.
    pub const ALL: [Self; 4] = [
        Self::SchemaChanged,
        Self::CacheInvalidate,
        Self::ConnectionAck,
        Self::Heartbeat,
    ];

    /// Wire name of the event.
    pub const fn name(self) -> &'static str {
        match self {
            Self::SchemaChanged => "schema_changed",
            Self::CacheInvalidate => "cache_invalidate",
            Self::ConnectionAck => "connection_ack",
            Self::Heartbeat => "heartbeat",
        }
    }

    /// Resolves a wire name. Unknown names return `None`.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    /// Whether events of this kind evict cached results.
    pub const fn invalidates_cache(self) -> bool {
        matches!(self, Self::SchemaChanged | Self::CacheInvalidate)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Resource named by an invalidation event.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InvalidationTarget {
    /// Affected database
    pub database: String,
    /// Affected table; `None` means the whole database
    pub table: Option<String>,
}

/// A recognized server-pushed event.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerEvent {
    /// Event kind
    pub kind: EventKind,
    /// Event body
    pub payload: Value,
}

impl ServerEvent {
    /// Creates an event.
    pub fn new(kind: EventKind, payload: Value) -> Self {
        Self { kind, payload }
    }

    /// The resource this event invalidates, if it is an invalidating event
    /// and names a database.
    pub fn invalidation_target(&self) -> Option<InvalidationTarget> {
        if !self.kind.invalidates_cache() {
            return None;
        }

        let database = first_str(&self.payload, &["database", "database_name", "db"])?;
        let table = first_str(&self.payload, &["table", "table_name"]);
        Some(InvalidationTarget {
            database: database.to_string(),
            table: table.map(str::to_string),
        })
    }
}

fn first_str<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .filter(|s| !s.is_empty())
}
