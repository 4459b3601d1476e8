//! Configuration types for the persistent WebSocket connection
//!
//! This module provides configuration structures for the connection manager
//! including timeouts, reconnection policy, circuit breaker, heartbeat,
//! health monitoring and batching.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use schemalink_transport_traits::config::duration_ms;
use schemalink_transport_traits::{TransportError, TransportResult};

/// Configuration for a persistent WebSocket connection
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSocketConfig {
    /// Server URL (`ws://` or `wss://`)
    pub url: String,

    /// Agent role, used to derive the agent identity
    pub role: String,

    /// Capabilities advertised in the identification event
    pub capabilities: Vec<String>,

    /// Bound on opening the socket
    #[serde(with = "duration_ms")]
    pub connect_timeout: Duration,

    /// Default per-call timeout
    #[serde(with = "duration_ms")]
    pub request_timeout: Duration,

    /// Maximum inbound message size (default: 16MB)
    pub max_message_size: usize,

    /// Cap on simultaneously outstanding requests
    pub max_concurrent_requests: usize,

    /// Heartbeat configuration
    pub heartbeat: HeartbeatConfig,

    /// Health monitor configuration
    pub health: HealthCheckConfig,

    /// Reconnection configuration
    pub reconnect: ReconnectConfig,

    /// Circuit breaker configuration
    pub circuit_breaker: CircuitBreakerConfig,

    /// Batching configuration
    pub batch: BatchConfig,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8765/ws".to_string(),
            role: "agent".to_string(),
            capabilities: vec!["batching".to_string(), "schema_events".to_string()],
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            max_message_size: 16 * 1024 * 1024, // 16MB
            max_concurrent_requests: 64,
            heartbeat: HeartbeatConfig::default(),
            health: HealthCheckConfig::default(),
            reconnect: ReconnectConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            batch: BatchConfig::default(),
        }
    }
}

impl WebSocketConfig {
    /// Create a configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a configuration for `url` with default values
    pub fn client(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Set the agent role
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    /// Set the advertised capabilities
    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    /// Set the connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the default request timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set maximum message size
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Set the outstanding request cap
    pub fn with_max_concurrent_requests(mut self, max: usize) -> Self {
        self.max_concurrent_requests = max;
        self
    }

    /// Set heartbeat configuration
    pub fn with_heartbeat(mut self, config: HeartbeatConfig) -> Self {
        self.heartbeat = config;
        self
    }

    /// Set health monitor configuration
    pub fn with_health(mut self, config: HealthCheckConfig) -> Self {
        self.health = config;
        self
    }

    /// Set reconnection configuration
    pub fn with_reconnect_config(mut self, config: ReconnectConfig) -> Self {
        self.reconnect = config;
        self
    }

    /// Set circuit breaker configuration
    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = config;
        self
    }

    /// Set batching configuration
    pub fn with_batch(mut self, config: BatchConfig) -> Self {
        self.batch = config;
        self
    }

    /// Checks the configuration for values the connection cannot run with.
    pub fn validate(&self) -> TransportResult<()> {
        if self.url.trim().is_empty() {
            return Err(TransportError::ConfigurationError(
                "websocket url must not be empty".to_string(),
            ));
        }
        let parsed = url::Url::parse(&self.url).map_err(|e| {
            TransportError::ConfigurationError(format!("invalid websocket url {}: {e}", self.url))
        })?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(TransportError::ConfigurationError(format!(
                "websocket url must use ws:// or wss://, got {}",
                parsed.scheme()
            )));
        }
        if self.role.trim().is_empty() {
            return Err(TransportError::ConfigurationError(
                "agent role must not be empty".to_string(),
            ));
        }
        if self.max_concurrent_requests == 0 {
            return Err(TransportError::ConfigurationError(
                "max_concurrent_requests must be at least 1".to_string(),
            ));
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(TransportError::ConfigurationError(
                "circuit breaker failure_threshold must be at least 1".to_string(),
            ));
        }
        if self.health.failure_threshold == 0 {
            return Err(TransportError::ConfigurationError(
                "health failure_threshold must be at least 1".to_string(),
            ));
        }
        if self.heartbeat.enabled
            && (self.heartbeat.interval.is_zero() || self.heartbeat.pong_timeout.is_zero())
        {
            return Err(TransportError::ConfigurationError(
                "heartbeat interval and pong_timeout must be non-zero".to_string(),
            ));
        }
        if self.health.enabled
            && (self.health.interval.is_zero() || self.health.probe_timeout.is_zero())
        {
            return Err(TransportError::ConfigurationError(
                "health interval and probe_timeout must be non-zero".to_string(),
            ));
        }
        if self.reconnect.max_delay < self.reconnect.initial_delay {
            return Err(TransportError::ConfigurationError(
                "reconnect max_delay must not be below initial_delay".to_string(),
            ));
        }
        Ok(())
    }
}

/// Reconnection configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Enable automatic reconnection
    pub enabled: bool,

    /// Delay before the first attempt
    #[serde(with = "duration_ms")]
    pub initial_delay: Duration,

    /// Upper bound on the backoff delay
    #[serde(with = "duration_ms")]
    pub max_delay: Duration,

    /// Maximum number of attempts; `None` retries forever
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_attempts: None,
        }
    }
}

impl ReconnectConfig {
    /// Reconnection turned off
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Quick retries for interactive agents
    pub fn aggressive() -> Self {
        Self {
            enabled: true,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            max_attempts: None,
        }
    }

    /// Bounded retries; exhaustion is terminal for the connection
    pub fn bounded(max_attempts: u32) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            ..Self::default()
        }
    }

    /// Set the initial delay
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the maximum delay
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the attempt bound
    pub fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}

/// Circuit breaker configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive connection failures that open the circuit
    pub failure_threshold: u32,

    /// Time the circuit stays open before the next check closes it
    #[serde(with = "duration_ms")]
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a configuration with the given threshold and cooldown
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold,
            cooldown,
        }
    }
}

/// Heartbeat configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Send periodic pings
    pub enabled: bool,

    /// Ping interval
    #[serde(with = "duration_ms")]
    pub interval: Duration,

    /// Time allowed for a pong (or any inbound frame) after a ping
    #[serde(with = "duration_ms")]
    pub pong_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(10),
        }
    }
}

impl HeartbeatConfig {
    /// Heartbeat turned off
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Heartbeat with the given interval and pong timeout
    pub fn new(interval: Duration, pong_timeout: Duration) -> Self {
        Self {
            enabled: true,
            interval,
            pong_timeout,
        }
    }
}

/// Health monitor configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Run the health monitor
    pub enabled: bool,

    /// Health check interval
    #[serde(with = "duration_ms")]
    pub interval: Duration,

    /// Time a probe waits for inbound traffic
    #[serde(with = "duration_ms")]
    pub probe_timeout: Duration,

    /// Consecutive failed checks before the connection is declared stale
    pub failure_threshold: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(60),
            probe_timeout: Duration::from_secs(10),
            failure_threshold: 2,
        }
    }
}

impl HealthCheckConfig {
    /// Health monitor turned off
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

/// Batching configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Items that trigger an immediate flush; `<= 1` disables batching
    pub max_batch_size: usize,

    /// Longest an item waits in an open window
    #[serde(with = "duration_ms")]
    pub max_batch_delay: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 10,
            max_batch_delay: Duration::from_millis(50),
        }
    }
}

impl BatchConfig {
    /// Batching turned off
    pub fn disabled() -> Self {
        Self {
            max_batch_size: 1,
            ..Self::default()
        }
    }

    /// Batching with the given window
    pub fn new(max_batch_size: usize, max_batch_delay: Duration) -> Self {
        Self {
            max_batch_size,
            max_batch_delay,
        }
    }

    /// Whether batchable calls are coalesced at all
    pub fn is_enabled(&self) -> bool {
        self.max_batch_size > 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = WebSocketConfig::client("ws://localhost:9000/ws")
            .with_role("validator")
            .with_max_concurrent_requests(8)
            .with_request_timeout(Duration::from_secs(3))
            .with_reconnect_config(ReconnectConfig::bounded(4))
            .with_batch(BatchConfig::new(5, Duration::from_millis(20)));

        assert_eq!(config.url, "ws://localhost:9000/ws");
        assert_eq!(config.role, "validator");
        assert_eq!(config.max_concurrent_requests, 8);
        assert_eq!(config.reconnect.max_attempts, Some(4));
        assert!(config.batch.is_enabled());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_defaults() {
        let config = WebSocketConfig::default();
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.health.failure_threshold, 2);
        assert!(config.reconnect.enabled);
        assert_eq!(config.reconnect.max_attempts, None);
        assert!(!BatchConfig::disabled().is_enabled());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        assert!(WebSocketConfig::client("").validate().is_err());
        assert!(WebSocketConfig::client("http://x/ws").validate().is_err());
        assert!(WebSocketConfig::client("not a url").validate().is_err());

        let config = WebSocketConfig::default().with_max_concurrent_requests(0);
        assert!(config.validate().is_err());

        let config = WebSocketConfig::default()
            .with_circuit_breaker(CircuitBreakerConfig::new(0, Duration::from_secs(1)));
        assert!(config.validate().is_err());

        let config = WebSocketConfig::default().with_reconnect_config(
            ReconnectConfig::default()
                .with_initial_delay(Duration::from_secs(10))
                .with_max_delay(Duration::from_secs(1)),
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_zero_intervals() {
        let config = WebSocketConfig::default()
            .with_heartbeat(HeartbeatConfig::new(Duration::ZERO, Duration::from_secs(1)));
        assert!(config.validate().is_err());

        let config = WebSocketConfig::default()
            .with_heartbeat(HeartbeatConfig::new(Duration::from_secs(1), Duration::ZERO));
        assert!(config.validate().is_err());

        let mut config = WebSocketConfig::default();
        config.health.interval = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = WebSocketConfig::default();
        config.health.probe_timeout = Duration::ZERO;
        assert!(config.validate().is_err());

        // Unused when the task never runs
        let mut config = WebSocketConfig::default()
            .with_heartbeat(HeartbeatConfig::disabled())
            .with_health(HealthCheckConfig::disabled());
        config.heartbeat.interval = Duration::ZERO;
        config.health.interval = Duration::ZERO;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_deserializes_millis() {
        let json = r#"{
            "url": "wss://schema.internal/ws",
            "request_timeout": 1500,
            "reconnect": {"initial_delay": 200, "max_attempts": 3},
            "batch": {"max_batch_size": 1}
        }"#;
        let config: WebSocketConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.request_timeout, Duration::from_millis(1500));
        assert_eq!(config.reconnect.initial_delay, Duration::from_millis(200));
        assert_eq!(config.reconnect.max_attempts, Some(3));
        assert!(config.reconnect.enabled);
        assert!(!config.batch.is_enabled());
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
    }
}
