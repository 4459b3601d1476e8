//! Hybrid transport selection and failover.
//!
//! The selector fronts a primary (persistent socket) and a fallback
//! (stateless HTTP) transport. It keeps its own consecutive-failure counter,
//! coarser than the connection's circuit breaker: once the primary fails
//! `failure_threshold` times in a row, new calls go to the fallback until
//! `cooldown` elapses, after which the next call probes the primary again.
//!
//! Within one call at most one silent switch happens: a transport failure
//! on the primary is retried once on the fallback. Remote errors are
//! answers, not failures, and are returned as-is.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use schemalink_transport_traits::config::duration_ms;
use schemalink_transport_traits::{
    ConnectionEvent, ToolCall, ToolTransport, TransportError, TransportResult, TransportType,
};

/// Which transports a client uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportMode {
    /// Persistent socket with HTTP fallback
    #[default]
    Hybrid,
    /// Persistent socket only
    PrimaryOnly,
    /// HTTP only
    FallbackOnly,
}

impl TransportMode {
    /// Whether the primary transport is used
    pub const fn uses_primary(self) -> bool {
        matches!(self, Self::Hybrid | Self::PrimaryOnly)
    }

    /// Whether the fallback transport is used
    pub const fn uses_fallback(self) -> bool {
        matches!(self, Self::Hybrid | Self::FallbackOnly)
    }
}

/// Selector configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    /// Consecutive primary failures that activate the fallback
    pub failure_threshold: u32,

    /// How long the fallback stays active before the primary is probed
    #[serde(with = "duration_ms")]
    pub cooldown: Duration,

    /// Method name → fallback tool name
    pub aliases: HashMap<String, String>,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(30),
            aliases: HashMap::new(),
        }
    }
}

impl SelectorConfig {
    /// Threshold and cooldown with no aliases
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold,
            cooldown,
            ..Default::default()
        }
    }

    /// Route `method` to the fallback's `tool`
    pub fn with_alias(mut self, method: impl Into<String>, tool: impl Into<String>) -> Self {
        self.aliases.insert(method.into(), tool.into());
        self
    }

    /// Translates a call into the fallback's call shape: aliases rename the
    /// method, non-object params become `{"args": params}`.
    pub fn translate(&self, call: ToolCall) -> ToolCall {
        let ToolCall {
            method,
            params,
            options,
        } = call;
        let method = self.aliases.get(&method).cloned().unwrap_or(method);
        let params = match params {
            Value::Object(_) => params,
            Value::Null => Value::Object(Map::new()),
            other => {
                let mut map = Map::new();
                map.insert("args".to_string(), other);
                Value::Object(map)
            }
        };
        ToolCall {
            method,
            params,
            options,
        }
    }
}

/// Selector statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorStats {
    /// Calls sent to the primary
    pub primary_calls: u64,
    /// Calls sent to the fallback
    pub fallback_calls: u64,
    /// Calls silently retried on the fallback
    pub switches: u64,
    /// Current consecutive primary failures
    pub primary_failures: u32,
    /// Whether new calls currently go to the fallback
    pub fallback_active: bool,
    /// Whether the primary gave up reconnecting
    pub forced_fallback: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Primary,
    Fallback,
}

#[derive(Debug, Default)]
struct SelectorState {
    primary_failures: u32,
    /// When the fallback became active
    fallback_since: Option<Instant>,
    /// Set on reconnect exhaustion; cleared by a primary reconnect
    forced: bool,
}

/// Per-call transport selection over a primary and a fallback transport.
#[derive(Debug)]
pub struct TransportSelector {
    config: SelectorConfig,
    primary: Option<Arc<dyn ToolTransport>>,
    fallback: Option<Arc<dyn ToolTransport>>,
    state: Mutex<SelectorState>,
    primary_calls: AtomicU64,
    fallback_calls: AtomicU64,
    switches: AtomicU64,
}

impl TransportSelector {
    /// Create a selector. At least one transport is required.
    pub fn new(
        config: SelectorConfig,
        primary: Option<Arc<dyn ToolTransport>>,
        fallback: Option<Arc<dyn ToolTransport>>,
    ) -> TransportResult<Self> {
        if primary.is_none() && fallback.is_none() {
            return Err(TransportError::ConfigurationError(
                "selector needs a primary or a fallback transport".to_string(),
            ));
        }
        if config.failure_threshold == 0 {
            return Err(TransportError::ConfigurationError(
                "selector failure_threshold must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            config,
            primary,
            fallback,
            state: Mutex::new(SelectorState::default()),
            primary_calls: AtomicU64::new(0),
            fallback_calls: AtomicU64::new(0),
            switches: AtomicU64::new(0),
        })
    }

    /// The primary transport, if configured
    pub fn primary(&self) -> Option<&Arc<dyn ToolTransport>> {
        self.primary.as_ref()
    }

    /// The fallback transport, if configured
    pub fn fallback(&self) -> Option<&Arc<dyn ToolTransport>> {
        self.fallback.as_ref()
    }

    fn route(&self) -> Route {
        let (Some(primary), Some(_)) = (&self.primary, &self.fallback) else {
            return if self.primary.is_some() {
                Route::Primary
            } else {
                Route::Fallback
            };
        };

        let mut state = self.state.lock();
        if state.forced || primary.is_exhausted() {
            return Route::Fallback;
        }
        if state.primary_failures < self.config.failure_threshold {
            return Route::Primary;
        }
        match state.fallback_since {
            Some(since) if since.elapsed() < self.config.cooldown => Route::Fallback,
            _ => {
                // Cooldown over: this call probes the primary. Restart the
                // window so concurrent calls keep using the fallback.
                state.fallback_since = Some(Instant::now());
                debug!("Fallback cooldown elapsed; probing primary");
                Route::Primary
            }
        }
    }

    fn record_primary_success(&self) {
        let mut state = self.state.lock();
        if state.primary_failures >= self.config.failure_threshold {
            info!("Primary transport recovered; leaving fallback mode");
        }
        state.primary_failures = 0;
        state.fallback_since = None;
    }

    fn record_primary_failure(&self, error: &TransportError) {
        let mut state = self.state.lock();
        state.primary_failures = state.primary_failures.saturating_add(1);
        if state.primary_failures >= self.config.failure_threshold {
            if state.fallback_since.is_none() {
                warn!(
                    failures = state.primary_failures,
                    cooldown = ?self.config.cooldown,
                    "Primary transport failing; activating fallback: {}",
                    error
                );
            }
            state.fallback_since = Some(Instant::now());
        }
    }

    /// Issues `call` on the selected transport, switching to the fallback
    /// at most once if the primary fails.
    pub async fn call(&self, call: ToolCall) -> TransportResult<Value> {
        match self.route() {
            Route::Fallback => self.call_fallback(call).await,
            Route::Primary => {
                let Some(primary) = &self.primary else {
                    return self.call_fallback(call).await;
                };
                self.primary_calls.fetch_add(1, Ordering::Relaxed);

                let retry = self.fallback.as_ref().map(|_| call.clone());
                match primary.call(call).await {
                    Ok(value) => {
                        self.record_primary_success();
                        Ok(value)
                    }
                    Err(e) if !e.is_transport_failure() => Err(e),
                    Err(e) => {
                        self.record_primary_failure(&e);
                        match retry {
                            Some(retry) => {
                                self.switches.fetch_add(1, Ordering::Relaxed);
                                debug!(
                                    method = %retry.method,
                                    "Primary failed; retrying on fallback: {}",
                                    e
                                );
                                self.call_fallback(retry).await
                            }
                            None => Err(e),
                        }
                    }
                }
            }
        }
    }

    async fn call_fallback(&self, call: ToolCall) -> TransportResult<Value> {
        let Some(fallback) = &self.fallback else {
            return Err(TransportError::NotAvailable(
                "no fallback transport configured".to_string(),
            ));
        };
        self.fallback_calls.fetch_add(1, Ordering::Relaxed);
        fallback.call(self.config.translate(call)).await
    }

    /// Reacts to the primary's lifecycle events.
    ///
    /// Reconnect exhaustion forces fallback mode; a fresh primary connection
    /// lifts it.
    pub fn observe(&self, event: &ConnectionEvent) {
        match event {
            ConnectionEvent::ReconnectExhausted { attempts } => {
                let mut state = self.state.lock();
                if !state.forced {
                    warn!(attempts, "Primary gave up reconnecting; forcing fallback");
                }
                state.forced = true;
            }
            ConnectionEvent::Connected {
                transport_type: TransportType::WebSocket,
                ..
            } => {
                let mut state = self.state.lock();
                if state.forced {
                    info!("Primary reconnected; lifting forced fallback");
                }
                state.forced = false;
            }
            _ => {}
        }
    }

    /// Explicitly reconnects the primary and, on success, routes new calls
    /// to it again.
    pub async fn reconnect_primary(&self) -> TransportResult<()> {
        let Some(primary) = &self.primary else {
            return Err(TransportError::NotAvailable(
                "no primary transport configured".to_string(),
            ));
        };

        primary.connect().await?;
        let mut state = self.state.lock();
        *state = SelectorState::default();
        info!("Primary transport reconnected");
        Ok(())
    }

    /// Transport that a new call would use right now, without probing.
    pub fn active_transport(&self) -> TransportType {
        let state = self.state.lock();
        let fallback_active = self.fallback.is_some()
            && (self.primary.is_none()
                || state.forced
                || self.primary.as_ref().is_some_and(|p| p.is_exhausted())
                || state
                    .fallback_since
                    .is_some_and(|since| since.elapsed() < self.config.cooldown));
        if fallback_active {
            TransportType::Http
        } else {
            TransportType::WebSocket
        }
    }

    /// Get selector statistics.
    pub fn stats(&self) -> SelectorStats {
        let forced_by_primary = self.primary.as_ref().is_some_and(|p| p.is_exhausted());
        let state = self.state.lock();
        SelectorStats {
            primary_calls: self.primary_calls.load(Ordering::Relaxed),
            fallback_calls: self.fallback_calls.load(Ordering::Relaxed),
            switches: self.switches.load(Ordering::Relaxed),
            primary_failures: state.primary_failures,
            fallback_active: self.fallback.is_some()
                && (state.forced
                    || forced_by_primary
                    || state.primary_failures >= self.config.failure_threshold),
            forced_fallback: state.forced || forced_by_primary,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use schemalink_transport_traits::{ConnectionState, TransportFuture};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicBool;

    /// Scripted transport: pops queued outcomes, then repeats the default.
    #[derive(Debug)]
    struct ScriptedTransport {
        kind: TransportType,
        script: Mutex<VecDeque<TransportResult<Value>>>,
        default: TransportResult<Value>,
        calls: Mutex<Vec<ToolCall>>,
        exhausted: AtomicBool,
    }

    impl ScriptedTransport {
        fn new(kind: TransportType, default: TransportResult<Value>) -> Arc<Self> {
            Arc::new(Self {
                kind,
                script: Mutex::new(VecDeque::new()),
                default,
                calls: Mutex::new(Vec::new()),
                exhausted: AtomicBool::new(false),
            })
        }

        fn push(&self, outcome: TransportResult<Value>) {
            self.script.lock().push_back(outcome);
        }

        fn call_count(&self) -> usize {
            self.calls.lock().len()
        }

        fn last_call(&self) -> Option<ToolCall> {
            self.calls.lock().last().cloned()
        }
    }

    impl ToolTransport for ScriptedTransport {
        fn transport_type(&self) -> TransportType {
            self.kind
        }

        fn state(&self) -> ConnectionState {
            ConnectionState::Connected
        }

        fn call(&self, call: ToolCall) -> TransportFuture<'_, TransportResult<Value>> {
            self.calls.lock().push(call);
            let outcome = self
                .script
                .lock()
                .pop_front()
                .unwrap_or_else(|| self.default.clone());
            Box::pin(async move { outcome })
        }

        fn connect(&self) -> TransportFuture<'_, TransportResult<()>> {
            self.exhausted.store(false, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        }

        fn health_check(&self) -> TransportFuture<'_, bool> {
            Box::pin(async { true })
        }

        fn is_exhausted(&self) -> bool {
            self.exhausted.load(Ordering::SeqCst)
        }
    }

    fn down() -> TransportResult<Value> {
        Err(TransportError::ConnectionFailed("refused".to_string()))
    }

    fn selector(
        config: SelectorConfig,
        primary: &Arc<ScriptedTransport>,
        fallback: &Arc<ScriptedTransport>,
    ) -> TransportSelector {
        TransportSelector::new(
            config,
            Some(primary.clone() as Arc<dyn ToolTransport>),
            Some(fallback.clone() as Arc<dyn ToolTransport>),
        )
        .unwrap()
    }

    fn call() -> ToolCall {
        ToolCall::new("get_table_schema", json!({"database": "fin"}))
    }

    #[tokio::test]
    async fn test_healthy_primary_is_used() {
        let primary = ScriptedTransport::new(TransportType::WebSocket, Ok(json!("ws")));
        let fallback = ScriptedTransport::new(TransportType::Http, Ok(json!("http")));
        let selector = selector(SelectorConfig::default(), &primary, &fallback);

        assert_eq!(selector.call(call()).await.unwrap(), json!("ws"));
        assert_eq!(fallback.call_count(), 0);
        assert_eq!(selector.active_transport(), TransportType::WebSocket);
    }

    #[tokio::test]
    async fn test_primary_failure_switches_once() {
        let primary = ScriptedTransport::new(TransportType::WebSocket, down());
        let fallback = ScriptedTransport::new(TransportType::Http, Ok(json!("http")));
        let selector = selector(SelectorConfig::default(), &primary, &fallback);

        assert_eq!(selector.call(call()).await.unwrap(), json!("http"));
        assert_eq!(primary.call_count(), 1);
        assert_eq!(fallback.call_count(), 1);

        let stats = selector.stats();
        assert_eq!(stats.switches, 1);
        assert_eq!(stats.primary_failures, 1);
        assert!(!stats.fallback_active);
    }

    #[tokio::test]
    async fn test_both_failing_surfaces_fallback_error() {
        let primary = ScriptedTransport::new(TransportType::WebSocket, down());
        let fallback = ScriptedTransport::new(
            TransportType::Http,
            Err(TransportError::ConnectionFailed("server returned 503".to_string())),
        );
        let selector = selector(SelectorConfig::default(), &primary, &fallback);

        let err = selector.call(call()).await.unwrap_err();
        assert_eq!(
            err,
            TransportError::ConnectionFailed("server returned 503".to_string())
        );
        assert_eq!(primary.call_count(), 1);
        assert_eq!(fallback.call_count(), 1);
    }

    #[tokio::test]
    async fn test_remote_error_passes_through() {
        let primary = ScriptedTransport::new(
            TransportType::WebSocket,
            Err(TransportError::remote("no such table", "KeyError")),
        );
        let fallback = ScriptedTransport::new(TransportType::Http, Ok(json!("http")));
        let selector = selector(SelectorConfig::default(), &primary, &fallback);

        let err = selector.call(call()).await.unwrap_err();
        assert_eq!(err, TransportError::remote("no such table", "KeyError"));
        assert_eq!(fallback.call_count(), 0);
        assert_eq!(selector.stats().primary_failures, 0);
    }

    #[tokio::test]
    async fn test_threshold_routes_to_fallback_until_cooldown() {
        let primary = ScriptedTransport::new(TransportType::WebSocket, Ok(json!("ws")));
        for _ in 0..2 {
            primary.push(down());
        }
        let fallback = ScriptedTransport::new(TransportType::Http, Ok(json!("http")));
        let selector = selector(
            SelectorConfig::new(2, Duration::from_millis(100)),
            &primary,
            &fallback,
        );

        selector.call(call()).await.unwrap();
        selector.call(call()).await.unwrap();
        assert_eq!(primary.call_count(), 2);
        assert!(selector.stats().fallback_active);
        assert_eq!(selector.active_transport(), TransportType::Http);

        // Threshold reached: the primary is not attempted
        assert_eq!(selector.call(call()).await.unwrap(), json!("http"));
        assert_eq!(primary.call_count(), 2);

        // After the cooldown the next call probes the primary
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(selector.call(call()).await.unwrap(), json!("ws"));
        assert_eq!(primary.call_count(), 3);
        assert_eq!(selector.stats().primary_failures, 0);
        assert!(!selector.stats().fallback_active);
    }

    #[tokio::test]
    async fn test_failed_probe_restarts_cooldown() {
        let primary = ScriptedTransport::new(TransportType::WebSocket, down());
        let fallback = ScriptedTransport::new(TransportType::Http, Ok(json!("http")));
        let selector = selector(
            SelectorConfig::new(1, Duration::from_millis(50)),
            &primary,
            &fallback,
        );

        selector.call(call()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        selector.call(call()).await.unwrap();
        assert_eq!(primary.call_count(), 2);

        selector.call(call()).await.unwrap();
        assert_eq!(primary.call_count(), 2);
    }

    #[tokio::test]
    async fn test_exhaustion_forces_fallback_until_reconnect() {
        let primary = ScriptedTransport::new(TransportType::WebSocket, Ok(json!("ws")));
        let fallback = ScriptedTransport::new(TransportType::Http, Ok(json!("http")));
        let selector = selector(SelectorConfig::default(), &primary, &fallback);

        selector.observe(&ConnectionEvent::ReconnectExhausted { attempts: 5 });
        assert_eq!(selector.call(call()).await.unwrap(), json!("http"));
        assert_eq!(primary.call_count(), 0);
        assert!(selector.stats().forced_fallback);

        selector.reconnect_primary().await.unwrap();
        assert_eq!(selector.call(call()).await.unwrap(), json!("ws"));
        assert!(!selector.stats().forced_fallback);
    }

    #[tokio::test]
    async fn test_exhausted_primary_is_skipped() {
        let primary = ScriptedTransport::new(TransportType::WebSocket, Ok(json!("ws")));
        primary.exhausted.store(true, Ordering::SeqCst);
        let fallback = ScriptedTransport::new(TransportType::Http, Ok(json!("http")));
        let selector = selector(SelectorConfig::default(), &primary, &fallback);

        assert_eq!(selector.call(call()).await.unwrap(), json!("http"));
        assert_eq!(primary.call_count(), 0);
    }

    #[tokio::test]
    async fn test_fallback_call_is_translated() {
        let primary = ScriptedTransport::new(TransportType::WebSocket, down());
        let fallback = ScriptedTransport::new(TransportType::Http, Ok(json!("http")));
        let selector = selector(
            SelectorConfig::default().with_alias("get_table_schema", "table_schema"),
            &primary,
            &fallback,
        );

        selector
            .call(ToolCall::new("get_table_schema", json!(["fin", "accounts"])))
            .await
            .unwrap();

        let sent = fallback.last_call().unwrap();
        assert_eq!(sent.method, "table_schema");
        assert_eq!(sent.params, json!({"args": ["fin", "accounts"]}));
        // The primary saw the original shape
        assert_eq!(primary.last_call().unwrap().params, json!(["fin", "accounts"]));
    }

    #[tokio::test]
    async fn test_single_transport_modes() {
        let primary = ScriptedTransport::new(TransportType::WebSocket, down());
        let only_primary = TransportSelector::new(
            SelectorConfig::default(),
            Some(primary.clone() as Arc<dyn ToolTransport>),
            None,
        )
        .unwrap();
        assert!(matches!(
            only_primary.call(call()).await.unwrap_err(),
            TransportError::ConnectionFailed(_)
        ));

        let fallback = ScriptedTransport::new(TransportType::Http, Ok(json!("http")));
        let only_fallback = TransportSelector::new(
            SelectorConfig::default(),
            None,
            Some(fallback.clone() as Arc<dyn ToolTransport>),
        )
        .unwrap();
        assert_eq!(only_fallback.call(call()).await.unwrap(), json!("http"));
        assert_eq!(only_fallback.active_transport(), TransportType::Http);
        assert!(only_fallback.reconnect_primary().await.is_err());

        assert!(TransportSelector::new(SelectorConfig::default(), None, None).is_err());
    }

    #[test]
    fn test_translate_keeps_object_params() {
        let config = SelectorConfig::default();
        let call = config.translate(ToolCall::new("discover_databases", Value::Null));
        assert_eq!(call.params, json!({}));

        let call = config.translate(ToolCall::new("x", json!({"a": 1})));
        assert_eq!(call.method, "x");
        assert_eq!(call.params, json!({"a": 1}));
    }
}
