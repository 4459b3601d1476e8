//! Stateless HTTP fallback client
//!
//! Every tool call is one `POST /tools/{tool_name}`. There is no connection
//! to maintain: `state()` reflects the outcome of the most recent exchange
//! with the server.

use std::time::{Duration, Instant};

use parking_lot::RwLock;
use reqwest::{Client as HttpClient, StatusCode, header};
use serde_json::{Map, Value};
use tracing::{debug, trace, warn};

use schemalink_transport_traits::{
    AgentIdentity, ConnectionState, ConnectionStats, ConnectionStatsSnapshot, ToolCall,
    ToolTransport, TransportError, TransportFuture, TransportResult, TransportType,
    UNKNOWN_ERROR_TYPE, now_timestamp,
};

use crate::config::FallbackConfig;

/// Builds the request body for a tool call.
///
/// Object params are used as-is; anything else is wrapped as
/// `{"args": params}`. `agent_id` and `timestamp` are added last and win over
/// same-named params.
pub fn tool_body(params: Value, agent_id: &str, timestamp: f64) -> Value {
    let mut body = match params {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("args".to_string(), other);
            map
        }
    };
    body.insert("agent_id".to_string(), Value::String(agent_id.to_string()));
    body.insert("timestamp".to_string(), Value::from(timestamp));
    Value::Object(body)
}

/// HTTP fallback transport
pub struct FallbackTransport {
    config: FallbackConfig,
    base_url: url::Url,
    identity: AgentIdentity,
    http_client: HttpClient,
    state: RwLock<ConnectionState>,
    stats: ConnectionStats,
}

impl std::fmt::Debug for FallbackTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackTransport")
            .field("base_url", &self.config.base_url)
            .field("agent_id", &self.identity.agent_id)
            .field("state", &*self.state.read())
            .finish()
    }
}

impl FallbackTransport {
    /// Create a fallback transport. No I/O is performed.
    pub fn new(config: FallbackConfig) -> TransportResult<Self> {
        config.validate()?;

        let identity = AgentIdentity::derive(config.role.clone(), config.base_url.clone());
        let base_url = url::Url::parse(config.trimmed_base()).map_err(|e| {
            TransportError::ConfigurationError(format!("invalid fallback url: {e}"))
        })?;

        let mut client_builder = HttpClient::builder().timeout(config.timeout);

        if let Some(ref user_agent) = config.user_agent {
            client_builder = client_builder.user_agent(user_agent);
        }

        let mut headers = header::HeaderMap::new();
        for (key, value) in &config.headers {
            match (
                header::HeaderName::from_bytes(key.as_bytes()),
                header::HeaderValue::from_str(value),
            ) {
                (Ok(k), Ok(v)) => {
                    headers.insert(k, v);
                }
                _ => warn!(header = %key, "Skipping invalid header"),
            }
        }
        client_builder = client_builder.default_headers(headers);

        let http_client = client_builder.build().map_err(|e| {
            TransportError::ConfigurationError(format!("failed to build HTTP client: {e}"))
        })?;

        Ok(Self {
            config,
            base_url,
            identity,
            http_client,
            state: RwLock::new(ConnectionState::Disconnected),
            stats: ConnectionStats::new(),
        })
    }

    /// Use `identity` instead of the one derived from the configuration, so
    /// the server sees the same agent on both transports.
    #[must_use]
    pub fn with_identity(mut self, identity: AgentIdentity) -> Self {
        self.identity = identity;
        self
    }

    /// Configuration in use
    pub fn config(&self) -> &FallbackConfig {
        &self.config
    }

    /// Identity sent with every call
    pub fn identity(&self) -> &AgentIdentity {
        &self.identity
    }

    /// Request counters
    pub fn stats(&self) -> ConnectionStatsSnapshot {
        self.stats.snapshot()
    }

    fn endpoint_url(&self, segments: &[&str]) -> TransportResult<url::Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| {
                TransportError::ConfigurationError(format!(
                    "fallback url cannot be a base: {}",
                    self.config.base_url
                ))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn set_state(&self, next: ConnectionState) {
        let mut state = self.state.write();
        if *state != next {
            debug!(from = %*state, to = %next, "Fallback state transition");
            *state = next;
        }
    }

    /// Issues `POST /tools/{method}` and returns the response body.
    pub async fn call(&self, call: ToolCall) -> TransportResult<Value> {
        let ToolCall {
            method,
            params,
            options,
        } = call;
        let timeout = options.timeout.unwrap_or(self.config.timeout);

        self.stats.record_request();
        let started = Instant::now();
        let result = self.post_tool(&method, params, timeout).await;
        self.stats
            .record_latency_us(started.elapsed().as_micros() as u64);

        match &result {
            Ok(_) => self.set_state(ConnectionState::Connected),
            Err(e) => {
                self.stats.record_failed_request();
                if e.is_transport_failure() {
                    self.set_state(ConnectionState::Failed);
                }
            }
        }
        result
    }

    async fn post_tool(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> TransportResult<Value> {
        let url = self.endpoint_url(&["tools", method])?;
        let body = tool_body(params, &self.identity.agent_id, now_timestamp());

        debug!(method = %method, url = %url, "Sending fallback tool call");

        let response = self
            .http_client
            .post(url.as_str())
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| map_request_error(method, timeout, &e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| map_request_error(method, timeout, &e))?;
        trace!(method = %method, status = %status, bytes = text.len(), "Fallback response");

        if status.is_success() {
            if text.trim().is_empty() {
                return Ok(Value::Null);
            }
            return serde_json::from_str(&text).map_err(|e| {
                TransportError::Protocol(format!("malformed fallback response: {e}"))
            });
        }

        Err(status_error(status, &text))
    }

    /// `GET /health`; any 2xx status is healthy.
    pub async fn probe(&self) -> bool {
        let url = match self.endpoint_url(&["health"]) {
            Ok(url) => url,
            Err(e) => {
                warn!("Cannot build health url: {}", e);
                return false;
            }
        };

        let healthy = match self
            .http_client
            .get(url.as_str())
            .timeout(self.config.health_timeout)
            .send()
            .await
        {
            Ok(response) => {
                let healthy = response.status().is_success();
                if !healthy {
                    warn!(status = %response.status(), "Fallback health check failed");
                }
                healthy
            }
            Err(e) => {
                warn!("Fallback health check failed: {}", e);
                false
            }
        };

        self.set_state(if healthy {
            ConnectionState::Connected
        } else {
            ConnectionState::Failed
        });
        healthy
    }
}

fn map_request_error(method: &str, timeout: Duration, error: &reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::timeout(method, timeout)
    } else if error.is_connect() {
        TransportError::ConnectionFailed(error.to_string())
    } else {
        TransportError::SendFailed(error.to_string())
    }
}

/// Maps a non-2xx reply: 4xx is the server rejecting the call, anything else
/// is the server being unavailable.
fn status_error(status: StatusCode, body: &str) -> TransportError {
    let parsed = serde_json::from_str::<Value>(body).ok();
    let field = |name: &str| {
        parsed
            .as_ref()
            .and_then(|v| v.get(name))
            .and_then(Value::as_str)
            .map(str::to_string)
    };
    let message = field("error").unwrap_or_else(|| {
        if body.trim().is_empty() {
            status.canonical_reason().unwrap_or("no reason").to_string()
        } else {
            body.trim().to_string()
        }
    });

    if status.is_client_error() {
        TransportError::Remote {
            message,
            error_type: field("error_type").unwrap_or_else(|| UNKNOWN_ERROR_TYPE.to_string()),
        }
    } else {
        warn!(status = %status, "Fallback server error: {}", message);
        TransportError::ConnectionFailed(format!("server returned {status}: {message}"))
    }
}

impl ToolTransport for FallbackTransport {
    fn transport_type(&self) -> TransportType {
        TransportType::Http
    }

    fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    fn call(&self, call: ToolCall) -> TransportFuture<'_, TransportResult<Value>> {
        Box::pin(FallbackTransport::call(self, call))
    }

    fn connect(&self) -> TransportFuture<'_, TransportResult<()>> {
        Box::pin(async move {
            if self.probe().await {
                Ok(())
            } else {
                Err(TransportError::ConnectionFailed(format!(
                    "fallback at {} is not healthy",
                    self.config.base_url
                )))
            }
        })
    }

    fn disconnect(&self) -> TransportFuture<'_, TransportResult<()>> {
        Box::pin(async move {
            self.set_state(ConnectionState::Disconnected);
            Ok(())
        })
    }

    fn health_check(&self) -> TransportFuture<'_, bool> {
        Box::pin(self.probe())
    }

    fn endpoint(&self) -> Option<String> {
        Some(self.config.base_url.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_tool_body_merges_object_params() {
        let body = tool_body(json!({"database": "fin"}), "planner-1", 12.5);
        assert_eq!(
            body,
            json!({"database": "fin", "agent_id": "planner-1", "timestamp": 12.5})
        );
    }

    #[test]
    fn test_tool_body_wraps_non_object_params() {
        let body = tool_body(json!(["fin", "accounts"]), "planner-1", 1.0);
        assert_eq!(body["args"], json!(["fin", "accounts"]));

        let body = tool_body(Value::Null, "planner-1", 1.0);
        assert_eq!(body.as_object().map(Map::len), Some(2));
    }

    #[test]
    fn test_status_error_mapping() {
        let err = status_error(
            StatusCode::NOT_FOUND,
            r#"{"error":"no such table","error_type":"KeyError"}"#,
        );
        assert_eq!(err, TransportError::remote("no such table", "KeyError"));

        let err = status_error(StatusCode::BAD_REQUEST, "");
        assert_eq!(err, TransportError::remote("Bad Request", UNKNOWN_ERROR_TYPE));

        let err = status_error(StatusCode::SERVICE_UNAVAILABLE, r#"{"error":"draining"}"#);
        assert!(matches!(err, TransportError::ConnectionFailed(ref m) if m.contains("draining")));
    }

    #[test]
    fn test_tool_url() {
        let transport =
            FallbackTransport::new(FallbackConfig::new("http://127.0.0.1:8766/api/")).unwrap();
        let url = transport.endpoint_url(&["tools", "get_table_schema"]).unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:8766/api/tools/get_table_schema");
    }

    #[test]
    fn test_new_transport_is_disconnected() {
        let transport = FallbackTransport::new(FallbackConfig::default()).unwrap();
        assert_eq!(ToolTransport::state(&transport), ConnectionState::Disconnected);
        assert_eq!(transport.transport_type(), TransportType::Http);
        assert!(transport.identity().agent_id.starts_with("agent-"));
    }
}
