//! # SchemaLink WebSocket Transport
//!
//! Persistent WebSocket connection to a SchemaLink tool server. A single
//! [`ConnectionManager`] owns the socket and everything that keeps it
//! usable: the connection state machine, a circuit breaker in front of
//! connect attempts, exponential-backoff reconnection, heartbeat and a
//! coarser health monitor, request/response correlation and optional
//! request batching.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use schemalink_websocket::{ConnectionManager, WebSocketConfig};
//! use schemalink_transport_traits::ToolCall;
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = WebSocketConfig::client("ws://127.0.0.1:8765/ws").with_role("planner");
//! let manager = ConnectionManager::new(config)?;
//! manager.connect().await?;
//!
//! let databases = manager
//!     .call(ToolCall::new("discover_databases", json!({})))
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! schemalink-websocket/
//! ├── config.rs          # Configuration types and builders
//! ├── types.rs           # Shared state and the manager handle
//! ├── connection.rs      # Connect, disconnect and connection loss
//! ├── tasks.rs           # Read loop, heartbeat, health monitor, reconnector
//! ├── transport.rs       # Tool calls and the ToolTransport implementation
//! ├── circuit_breaker.rs # Failure gate in front of connect attempts
//! ├── reconnect.rs       # Exponential backoff schedule
//! ├── correlator.rs      # Request ids and result slots
//! ├── batching.rs        # Batch windows
//! └── health.rs          # Health status tracking
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::must_use_candidate
)]

pub mod batching;
pub mod circuit_breaker;
pub mod config;
pub mod connection;
pub mod correlator;
pub mod health;
pub mod reconnect;
pub mod tasks;
pub mod transport;
pub mod types;

// Re-export main types for convenience
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerStats, CircuitState};
pub use config::{
    BatchConfig, CircuitBreakerConfig, HealthCheckConfig, HeartbeatConfig, ReconnectConfig,
    WebSocketConfig,
};
pub use connection::IDENTIFY_EVENT;
pub use health::{HealthInfo, HealthStatus};
pub use types::ConnectionManager;

// Re-export the shared transport vocabulary
pub use schemalink_transport_traits::{
    CallOptions, ConnectionEvent, ConnectionState, EventKind, ServerEvent, ToolCall,
    ToolTransport, TransportError, TransportResult,
};
