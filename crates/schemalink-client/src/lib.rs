//! # SchemaLink Client
//!
//! Resilient tool client for a SchemaLink schema/tool server. A call flows
//! through the result cache, then the in-flight deduplication registry, then
//! the transport selector, which prefers the persistent socket and fails over
//! to the HTTP fallback.
//!
//! ## Features
//!
//! - **Result cache**: TTL per operation class, bounded, invalidated by
//!   server-pushed schema events
//! - **Deduplication**: concurrent identical calls share one round trip
//! - **Typed events**: `EventKind` → handlers table fixed at construction
//! - **Hybrid failover**: coarse failure counter with cooldown and one silent
//!   switch per call
//! - **Layered configuration**: defaults, file, `SCHEMALINK__*` environment
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use schemalink_client::{ConfigLoader, SchemaLinkClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigLoader::new().with_file("schemalink.toml").load()?;
//! let client = SchemaLinkClient::new(config)?;
//! client.connect().await?;
//!
//! let databases = client.discover_databases().await?;
//! println!("{databases}");
//! # Ok(())
//! # }
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

pub mod cache;
pub mod client;
pub mod config;
pub mod dedup;
pub mod events;
pub mod fingerprint;
pub mod selector;

pub use cache::{CacheConfig, CacheStats, ResultCache, TtlClass};
pub use client::{ClientBuilder, ClientHealth, SchemaLinkClient};
pub use config::{ClientConfig, ConfigError, ConfigLoader};
pub use dedup::{DeduplicationRegistry, DeduplicationStats};
pub use events::{EventDispatcher, EventDispatcherBuilder, EventHandler};
pub use fingerprint::Fingerprint;
pub use selector::{SelectorConfig, SelectorStats, TransportMode, TransportSelector};

pub use schemalink_http::FallbackConfig;
pub use schemalink_transport_traits::{
    CallOptions, ConnectionEvent, ConnectionState, ConnectionStatsSnapshot, ErrorKind, EventKind,
    InvalidationTarget, ServerEvent, ToolCall, TransportError, TransportResult, TransportType,
};
pub use schemalink_websocket::{
    BatchConfig, CircuitBreakerConfig, HealthCheckConfig, HeartbeatConfig, ReconnectConfig,
    WebSocketConfig,
};
