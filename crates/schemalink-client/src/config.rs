//! Client configuration and layered loading.
//!
//! [`ClientConfig`] aggregates the per-crate configuration structs. The
//! [`ConfigLoader`] merges, in increasing precedence:
//!
//! 1. built-in defaults
//! 2. an optional configuration file (TOML, YAML or JSON by extension)
//! 3. `SCHEMALINK__`-prefixed environment variables, `__` between levels
//!
//! ```text
//! SCHEMALINK__WEBSOCKET__URL=ws://schema-server:8765/ws
//! SCHEMALINK__SELECTOR__FAILURE_THRESHOLD=5
//! SCHEMALINK__CACHE__SCHEMA_TTL=600000
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use schemalink_http::FallbackConfig;
use schemalink_websocket::WebSocketConfig;

use crate::cache::CacheConfig;
use crate::selector::{SelectorConfig, TransportMode};

/// Default environment variable prefix
pub const ENV_PREFIX: &str = "SCHEMALINK";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A source could not be read or deserialized
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// The configuration file does not exist
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    /// The merged configuration is inconsistent
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Complete client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Which transports are used
    pub mode: TransportMode,

    /// Primary (persistent socket) transport
    pub websocket: WebSocketConfig,

    /// Fallback (HTTP) transport
    pub fallback: FallbackConfig,

    /// Result cache
    pub cache: CacheConfig,

    /// Hybrid failover policy
    pub selector: SelectorConfig,

    /// Whether concurrent identical calls share one round trip
    pub deduplicate: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            mode: TransportMode::default(),
            websocket: WebSocketConfig::default(),
            fallback: FallbackConfig::default(),
            cache: CacheConfig::default(),
            selector: SelectorConfig::default(),
            deduplicate: true,
        }
    }
}

impl ClientConfig {
    /// Defaults for a server reachable at `ws_url` and `http_url`
    pub fn new(ws_url: impl Into<String>, http_url: impl Into<String>) -> Self {
        Self {
            websocket: WebSocketConfig::client(ws_url),
            fallback: FallbackConfig::new(http_url),
            ..Default::default()
        }
    }

    /// Set the transport mode
    pub fn with_mode(mut self, mode: TransportMode) -> Self {
        self.mode = mode;
        self
    }

    /// Replace the primary transport configuration
    pub fn with_websocket(mut self, websocket: WebSocketConfig) -> Self {
        self.websocket = websocket;
        self
    }

    /// Replace the fallback transport configuration
    pub fn with_fallback(mut self, fallback: FallbackConfig) -> Self {
        self.fallback = fallback;
        self
    }

    /// Replace the cache configuration
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Replace the selector configuration
    pub fn with_selector(mut self, selector: SelectorConfig) -> Self {
        self.selector = selector;
        self
    }

    /// Enable or disable in-flight deduplication
    pub fn with_deduplication(mut self, enabled: bool) -> Self {
        self.deduplicate = enabled;
        self
    }

    /// Validate the transports the mode uses and the client-level settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mode.uses_primary() {
            self.websocket
                .validate()
                .map_err(|e| ConfigError::Invalid(format!("websocket: {e}")))?;
        }
        if self.mode.uses_fallback() {
            self.fallback
                .validate()
                .map_err(|e| ConfigError::Invalid(format!("fallback: {e}")))?;
        }
        if self.selector.failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "selector.failure_threshold must be at least 1".to_string(),
            ));
        }
        if self.cache.enabled && self.cache.max_entries == 0 {
            return Err(ConfigError::Invalid(
                "cache.max_entries must be at least 1 when caching is enabled".to_string(),
            ));
        }
        Ok(())
    }
}

/// Merges defaults, a file and the environment into a [`ClientConfig`].
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    file: Option<PathBuf>,
    env_prefix: String,
    env_source: Option<HashMap<String, String>>,
}

impl ConfigLoader {
    /// Loader with no file and the default environment prefix
    pub fn new() -> Self {
        Self {
            file: None,
            env_prefix: ENV_PREFIX.to_string(),
            env_source: None,
        }
    }

    /// Read `path` after the defaults. The file must exist.
    pub fn with_file(mut self, path: impl AsRef<Path>) -> Self {
        self.file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Set the environment variable prefix (default: `SCHEMALINK`)
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Use `vars` instead of the process environment
    pub fn with_env_source(mut self, vars: HashMap<String, String>) -> Self {
        self.env_source = Some(vars);
        self
    }

    /// Load and validate the merged configuration.
    pub fn load(self) -> Result<ClientConfig, ConfigError> {
        let defaults = ClientConfig::default();
        let mut builder = config::Config::builder().add_source(config::Config::try_from(&defaults)?);

        if let Some(path) = &self.file {
            if !path.exists() {
                return Err(ConfigError::FileNotFound(path.clone()));
            }
            debug!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(config::File::from(path.as_path()));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(&self.env_prefix)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .source(self.env_source),
        );

        let config: ClientConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
