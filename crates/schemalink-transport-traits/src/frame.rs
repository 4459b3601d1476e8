//! Wire frames exchanged over the persistent socket.
//!
//! Every message is a single JSON object discriminated by its `type` field.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{TransportError, TransportResult};

/// Error type reported when the server omits one.
pub const UNKNOWN_ERROR_TYPE: &str = "UnknownError";

fn default_error_type() -> String {
    UNKNOWN_ERROR_TYPE.to_string()
}

/// Current time as floating-point seconds since the Unix epoch.
pub fn now_timestamp() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// One entry of a `batch_request` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchItem {
    /// Tool method name
    pub method: String,
    /// Tool parameters
    #[serde(default)]
    pub params: Value,
    /// Submission time
    #[serde(default)]
    pub timestamp: f64,
}

impl BatchItem {
    /// Creates a batch item stamped with the current time.
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
            timestamp: now_timestamp(),
        }
    }
}

/// A single wire message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// Outbound tool call.
    Request {
        /// Correlation id
        request_id: String,
        /// Tool method name
        method: String,
        /// Tool parameters
        #[serde(default)]
        params: Value,
        /// Submission time
        #[serde(default)]
        timestamp: f64,
    },
    /// Successful reply to a [`Frame::Request`].
    Response {
        /// Correlation id of the request being answered
        request_id: String,
        /// Tool result
        #[serde(default)]
        payload: Value,
    },
    /// Several tool calls coalesced into one frame.
    BatchRequest {
        /// Correlation id of the whole batch
        request_id: String,
        /// Items in submission order
        requests: Vec<BatchItem>,
    },
    /// Reply to a [`Frame::BatchRequest`]; `results` follow submission order.
    BatchResponse {
        /// Correlation id of the batch being answered
        request_id: String,
        /// One result per submitted item
        results: Vec<Value>,
    },
    /// Server push with no correlation id.
    Event {
        /// Event name, e.g. `schema_changed`
        event_name: String,
        /// Event body
        #[serde(default)]
        payload: Value,
    },
    /// Failure report, optionally tied to a request.
    Error {
        /// Correlation id, when the failure belongs to a request
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        /// Error message
        error: String,
        /// Error classification
        #[serde(default = "default_error_type")]
        error_type: String,
    },
    /// Liveness probe.
    Ping {
        /// Send time
        #[serde(default)]
        timestamp: f64,
        /// Sender identity
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent_id: Option<String>,
    },
    /// Liveness answer.
    Pong {
        /// Send time
        #[serde(default)]
        timestamp: f64,
        /// Sender identity
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent_id: Option<String>,
    },
}

impl Frame {
    /// Builds a request frame stamped with the current time.
    pub fn request(request_id: impl Into<String>, method: impl Into<String>, params: Value) -> Self {
        Self::Request {
            request_id: request_id.into(),
            method: method.into(),
            params,
            timestamp: now_timestamp(),
        }
    }

    /// Builds an event frame.
    pub fn event(event_name: impl Into<String>, payload: Value) -> Self {
        Self::Event {
            event_name: event_name.into(),
            payload,
        }
    }

    /// Builds a ping frame.
    pub fn ping(agent_id: &str) -> Self {
        Self::Ping {
            timestamp: now_timestamp(),
            agent_id: Some(agent_id.to_string()),
        }
    }

    /// Builds a pong frame.
    pub fn pong(agent_id: &str) -> Self {
        Self::Pong {
            timestamp: now_timestamp(),
            agent_id: Some(agent_id.to_string()),
        }
    }

    /// The correlation id carried by this frame, if any.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Self::Request { request_id, .. }
            | Self::Response { request_id, .. }
            | Self::BatchRequest { request_id, .. }
            | Self::BatchResponse { request_id, .. } => Some(request_id),
            Self::Error { request_id, .. } => request_id.as_deref(),
            Self::Event { .. } | Self::Ping { .. } | Self::Pong { .. } => None,
        }
    }

    /// The `type` tag of this frame.
    pub const fn frame_type(&self) -> &'static str {
        match self {
            Self::Request { .. } => "request",
            Self::Response { .. } => "response",
            Self::BatchRequest { .. } => "batch_request",
            Self::BatchResponse { .. } => "batch_response",
            Self::Event { .. } => "event",
            Self::Error { .. } => "error",
            Self::Ping { .. } => "ping",
            Self::Pong { .. } => "pong",
        }
    }

    /// Serializes the frame to its JSON text form.
    pub fn encode(&self) -> TransportResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses a JSON text message.
    ///
    /// Malformed JSON and unknown `type` tags both yield
    /// [`TransportError::Protocol`].
    pub fn decode(text: &str) -> TransportResult<Self> {
        serde_json::from_str(text)
            .map_err(|e| TransportError::Protocol(format!("malformed frame: {e}")))
    }
}

/// Interprets one element of a `batch_response` `results` array.
///
/// Elements shaped `{type:"error", error, error_type}` resolve to
/// [`TransportError::Remote`]; anything else is the item's payload.
pub fn batch_item_result(value: Value) -> TransportResult<Value> {
    let is_error = value
        .get("type")
        .and_then(Value::as_str)
        .is_some_and(|t| t == "error");

    if !is_error {
        return Ok(value);
    }

    let message = value
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("unspecified error")
        .to_string();
    let error_type = value
        .get("error_type")
        .and_then(Value::as_str)
        .unwrap_or(UNKNOWN_ERROR_TYPE)
        .to_string();
    Err(TransportError::Remote {
        message,
        error_type,
    })
}
