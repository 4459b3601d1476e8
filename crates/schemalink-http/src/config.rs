//! Fallback transport configuration

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use schemalink_transport_traits::config::duration_ms;
use schemalink_transport_traits::{TransportError, TransportResult};

/// HTTP fallback configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// Base URL (e.g., `http://127.0.0.1:8766`)
    pub base_url: String,

    /// Agent role, used to derive the agent id sent with every call
    pub role: String,

    /// Default per-call timeout
    #[serde(with = "duration_ms")]
    pub timeout: Duration,

    /// Timeout for `GET /health`
    #[serde(with = "duration_ms")]
    pub health_timeout: Duration,

    /// User agent string (set to `None` to omit the header)
    pub user_agent: Option<String>,

    /// Custom headers
    pub headers: HashMap<String, String>,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8766".to_string(),
            role: "agent".to_string(),
            timeout: Duration::from_secs(30),
            health_timeout: Duration::from_secs(5),
            user_agent: Some(format!("SchemaLink-Client/{}", env!("CARGO_PKG_VERSION"))),
            headers: HashMap::new(),
        }
    }
}

impl FallbackConfig {
    /// Configuration for `base_url` with defaults elsewhere
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Set the agent role
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    /// Set the default per-call timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the health check timeout
    pub fn with_health_timeout(mut self, timeout: Duration) -> Self {
        self.health_timeout = timeout;
        self
    }

    /// Set or clear the user agent
    pub fn with_user_agent(mut self, user_agent: Option<String>) -> Self {
        self.user_agent = user_agent;
        self
    }

    /// Add a header sent with every request
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Base URL without a trailing slash
    pub(crate) fn trimmed_base(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    /// Checks the configuration for values the transport cannot run with.
    pub fn validate(&self) -> TransportResult<()> {
        if self.base_url.trim().is_empty() {
            return Err(TransportError::ConfigurationError(
                "fallback base_url must not be empty".to_string(),
            ));
        }
        let parsed = url::Url::parse(&self.base_url).map_err(|e| {
            TransportError::ConfigurationError(format!(
                "invalid fallback url {}: {e}",
                self.base_url
            ))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(TransportError::ConfigurationError(format!(
                "fallback url must use http:// or https://, got {}",
                parsed.scheme()
            )));
        }
        if self.role.trim().is_empty() {
            return Err(TransportError::ConfigurationError(
                "agent role must not be empty".to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(TransportError::ConfigurationError(
                "fallback timeout must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
