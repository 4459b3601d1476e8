//! Transport error types.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// A specialized `Result` type for transport operations.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Represents errors that can occur while issuing a tool call.
///
/// Errors are `Clone` so a single outcome can be delivered to every waiter
/// attached to a deduplicated in-flight call.
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum TransportError {
    /// The transport is not connected and cannot send.
    #[error("Not connected: {0}")]
    NotConnected(String),

    /// Failed to establish a connection.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The connection closed while the call was pending.
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// Failed to write a frame to the socket.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Bounded reconnection gave up; the connection is terminal.
    #[error("Reconnection exhausted after {attempts} attempts")]
    ReconnectExhausted {
        /// Number of reconnect attempts made before giving up
        attempts: u32,
    },

    /// The circuit breaker is open. No network I/O was performed.
    #[error("Circuit open: failing fast (retry after {retry_after:?})")]
    CircuitOpen {
        /// Remaining cooldown before the breaker will allow a probe
        retry_after: Duration,
    },

    /// The call did not resolve within its own timeout.
    #[error("Request timed out after {timeout:?} for method: {method}")]
    Timeout {
        /// The method that timed out
        method: String,
        /// The timeout that was exceeded
        timeout: Duration,
    },

    /// A malformed or unexpected frame was observed.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The server returned an application-level failure for this request.
    #[error("Remote error ({error_type}): {message}")]
    Remote {
        /// Server-supplied error message
        message: String,
        /// Server-supplied error classification
        error_type: String,
    },

    /// Failed to serialize or deserialize a payload.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// The transport was configured with invalid parameters.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// The requested transport is not available.
    #[error("Transport not available: {0}")]
    NotAvailable(String),

    /// An unexpected internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification of [`TransportError`].
///
/// A caller observes exactly one kind for its own call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Not connected, connect failed, or the connection closed.
    Connection,
    /// Fail-fast rejection by a circuit breaker.
    CircuitOpen,
    /// Per-call timeout.
    Timeout,
    /// Malformed inbound data.
    Protocol,
    /// Application-level failure reported by the server.
    Remote,
    /// Local misuse or internal failure.
    Local,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection => write!(f, "connection"),
            Self::CircuitOpen => write!(f, "circuit_open"),
            Self::Timeout => write!(f, "timeout"),
            Self::Protocol => write!(f, "protocol"),
            Self::Remote => write!(f, "remote"),
            Self::Local => write!(f, "local"),
        }
    }
}

impl TransportError {
    /// Returns the coarse classification of this error.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotConnected(_)
            | Self::ConnectionFailed(_)
            | Self::ConnectionClosed(_)
            | Self::SendFailed(_)
            | Self::ReconnectExhausted { .. }
            | Self::NotAvailable(_) => ErrorKind::Connection,
            Self::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Protocol(_) | Self::SerializationFailed(_) => ErrorKind::Protocol,
            Self::Remote { .. } => ErrorKind::Remote,
            Self::ConfigurationError(_) | Self::Internal(_) => ErrorKind::Local,
        }
    }

    /// Returns `true` if the failure reflects the health of the transport
    /// rather than the outcome of the tool itself.
    ///
    /// Remote errors are answers from a healthy server and never count
    /// against a transport.
    pub const fn is_transport_failure(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Connection | ErrorKind::CircuitOpen | ErrorKind::Timeout | ErrorKind::Protocol
        )
    }

    /// Builds a [`TransportError::Remote`].
    pub fn remote(message: impl Into<String>, error_type: impl Into<String>) -> Self {
        Self::Remote {
            message: message.into(),
            error_type: error_type.into(),
        }
    }

    /// Builds a [`TransportError::Timeout`].
    pub fn timeout(method: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            method: method.into(),
            timeout,
        }
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationFailed(err.to_string())
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::ConnectionFailed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            TransportError::NotConnected("x".into()).kind(),
            ErrorKind::Connection
        );
        assert_eq!(
            TransportError::CircuitOpen {
                retry_after: Duration::from_secs(1)
            }
            .kind(),
            ErrorKind::CircuitOpen
        );
        assert_eq!(
            TransportError::timeout("get_table_schema", Duration::from_secs(5)).kind(),
            ErrorKind::Timeout
        );
        assert_eq!(
            TransportError::Protocol("bad".into()).kind(),
            ErrorKind::Protocol
        );
        assert_eq!(
            TransportError::remote("no such table", "NotFound").kind(),
            ErrorKind::Remote
        );
    }

    #[test]
    fn test_remote_errors_are_not_transport_failures() {
        assert!(!TransportError::remote("boom", "ValueError").is_transport_failure());
        assert!(TransportError::ConnectionClosed("eof".into()).is_transport_failure());
        assert!(
            TransportError::ReconnectExhausted { attempts: 3 }.is_transport_failure()
        );
        assert!(!TransportError::ConfigurationError("bad".into()).is_transport_failure());
    }

    #[test]
    fn test_error_display() {
        let err = TransportError::timeout("execute_query", Duration::from_millis(250));
        assert!(err.to_string().contains("execute_query"));
        assert!(err.to_string().contains("250ms"));

        let err = TransportError::remote("table missing", "KeyError");
        assert_eq!(err.to_string(), "Remote error (KeyError): table missing");
    }

    #[test]
    fn test_serde_error_conversion() {
        let parse: Result<serde_json::Value, _> = serde_json::from_str("{not json");
        let err: TransportError = parse.unwrap_err().into();
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }
}
