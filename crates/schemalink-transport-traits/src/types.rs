//! Core transport types.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Enumerates the transports a tool call can travel over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportType {
    /// Persistent WebSocket connection (primary).
    WebSocket,
    /// Stateless HTTP request/response (fallback).
    Http,
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WebSocket => write!(f, "websocket"),
            Self::Http => write!(f, "http"),
        }
    }
}

/// Lifecycle state of a persistent connection.
///
/// A connection holds exactly one state at a time; the owning state machine
/// serializes every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No socket; nothing scheduled.
    #[default]
    Disconnected,
    /// A connect attempt is in progress.
    Connecting,
    /// Socket open and background tasks running.
    Connected,
    /// Waiting in the reconnect backoff loop.
    Reconnecting,
    /// The last attempt failed, or the connection was lost.
    Failed,
}

impl ConnectionState {
    /// Returns `true` when frames may be written.
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting => write!(f, "reconnecting"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Per-call options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallOptions {
    /// Overrides the transport's default request timeout.
    pub timeout: Option<Duration>,
    /// Allows the call to be coalesced into a batch frame.
    pub batchable: bool,
}

impl CallOptions {
    /// Options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an explicit timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Mark the call as batchable.
    pub fn batchable(mut self) -> Self {
        self.batchable = true;
        self
    }
}

/// One logical `(method, params)` operation, independent of transport.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    /// Tool method name
    pub method: String,
    /// Tool parameters
    pub params: Value,
    /// Per-call options
    pub options: CallOptions,
}

impl ToolCall {
    /// Creates a call with default options.
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
            options: CallOptions::default(),
        }
    }

    /// Replaces the call options.
    pub fn with_options(mut self, options: CallOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets an explicit timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = Some(timeout);
        self
    }

    /// Marks the call as batchable.
    pub fn batchable(mut self) -> Self {
        self.options.batchable = true;
        self
    }
}
