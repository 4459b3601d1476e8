//! # SchemaLink Transport Traits
//!
//! Shared vocabulary for the SchemaLink transport layer. Every transport and
//! the client façade depend on this crate.
//!
//! ## Overview
//!
//! This crate defines:
//! - **Traits**: [`ToolTransport`]
//! - **Wire**: [`Frame`], [`BatchItem`]
//! - **Types**: [`ConnectionState`], [`TransportType`], [`ToolCall`], [`CallOptions`]
//! - **Identity**: [`AgentIdentity`]
//! - **Events**: [`ConnectionEvent`], [`ServerEvent`], [`EventKind`]
//! - **Errors**: [`TransportError`], [`ErrorKind`], [`TransportResult`]
//! - **Config**: [`TimeoutConfig`]
//! - **Metrics**: [`ConnectionStats`], [`ConnectionStatsSnapshot`]

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

pub mod config;
mod error;
mod events;
mod frame;
mod identity;
mod metrics;
mod traits;
mod types;

// Re-export all public items
pub use config::TimeoutConfig;
pub use error::{ErrorKind, TransportError, TransportResult};
pub use events::{
    ConnectionEvent, ConnectionEventEmitter, EventKind, InvalidationTarget, ServerEvent,
};
pub use frame::{BatchItem, Frame, UNKNOWN_ERROR_TYPE, batch_item_result, now_timestamp};
pub use identity::AgentIdentity;
pub use metrics::{ConnectionStats, ConnectionStatsSnapshot};
pub use traits::{ToolTransport, TransportFuture};
pub use types::{CallOptions, ConnectionState, ToolCall, TransportType};
