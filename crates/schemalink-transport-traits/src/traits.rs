//! Core transport trait.

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;

use crate::error::TransportResult;
use crate::types::{ConnectionState, ToolCall, TransportType};

/// Boxed future returned by [`ToolTransport`] methods.
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A transport capable of carrying tool calls to the schema/tool server.
///
/// Both the persistent socket and the stateless fallback implement this
/// trait, which lets the selector treat them uniformly.
pub trait ToolTransport: Send + Sync + std::fmt::Debug {
    /// Returns the type of this transport.
    fn transport_type(&self) -> TransportType;

    /// Returns the authoritative connection state.
    ///
    /// Stateless transports report `Connected` while they consider the
    /// server reachable.
    fn state(&self) -> ConnectionState;

    /// Issues a tool call and waits for its result.
    fn call(&self, call: ToolCall) -> TransportFuture<'_, TransportResult<Value>>;

    /// Establishes the transport. Stateless transports treat this as a no-op.
    fn connect(&self) -> TransportFuture<'_, TransportResult<()>> {
        Box::pin(async { Ok(()) })
    }

    /// Tears the transport down. Stateless transports treat this as a no-op.
    fn disconnect(&self) -> TransportFuture<'_, TransportResult<()>> {
        Box::pin(async { Ok(()) })
    }

    /// Probes the remote end.
    fn health_check(&self) -> TransportFuture<'_, bool>;

    /// Returns `true` when terminal failure means no further attempts will be made.
    fn is_exhausted(&self) -> bool {
        false
    }

    /// The endpoint this transport talks to.
    fn endpoint(&self) -> Option<String> {
        None
    }
}
