//! The SchemaLink client façade.
//!
//! [`SchemaLinkClient`] composes the transports with the result cache, the
//! deduplication registry, the event dispatcher and the transport selector.
//! It is cheaply cloneable; all clones share one connection and one cache.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use schemalink_http::FallbackTransport;
use schemalink_transport_traits::{
    ConnectionEvent, ConnectionEventEmitter, ConnectionStatsSnapshot, EventKind, ServerEvent,
    ToolCall, ToolTransport, TransportError, TransportResult, TransportType,
};
use schemalink_websocket::{CircuitBreakerStats, ConnectionManager, HealthInfo};

use crate::cache::{CacheStats, ResultCache};
use crate::config::ClientConfig;
use crate::dedup::{DeduplicationRegistry, DeduplicationStats};
use crate::events::{EventDispatcher, EventDispatcherBuilder};
use crate::fingerprint::Fingerprint;
use crate::selector::{SelectorStats, TransportSelector};

/// Health of each configured transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientHealth {
    /// Primary health; `None` when no primary is configured
    pub primary: Option<bool>,
    /// Fallback health; `None` when no fallback is configured
    pub fallback: Option<bool>,
    /// Transport a new call would use
    pub active: TransportType,
}

impl ClientHealth {
    /// Whether at least one transport can serve calls
    pub fn is_serviceable(&self) -> bool {
        self.primary == Some(true) || self.fallback == Some(true)
    }
}

pub(crate) struct ClientInner {
    config: ClientConfig,
    primary: Option<ConnectionManager>,
    fallback: Option<Arc<FallbackTransport>>,
    selector: TransportSelector,
    cache: ResultCache,
    dedup: DeduplicationRegistry,
    dispatcher: EventDispatcher,
    server_events: broadcast::Sender<ServerEvent>,
    connection_events: ConnectionEventEmitter,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.get_mut().take() {
            debug!("Last client handle dropped; stopping event pump");
            pump.abort();
        }
    }
}

impl ClientInner {
    /// Invalidate first so handlers never observe the stale entries.
    fn handle_server_event(&self, event: &ServerEvent) {
        if let Some(target) = event.invalidation_target() {
            let removed = self.cache.invalidate(&target);
            info!(
                event = %event.kind,
                database = %target.database,
                table = ?target.table,
                removed,
                "Schema change invalidated cached results"
            );
        }
        self.dispatcher.dispatch(event);
        let _ = self.server_events.send(event.clone());
    }

    fn handle_connection_event(&self, event: &ConnectionEvent) {
        trace!(?event, "Connection event");
        self.selector.observe(event);
        self.connection_events.emit(event.clone());
    }
}

/// Resilient tool client.
///
/// # Example
///
/// ```rust,no_run
/// use schemalink_client::{ClientConfig, EventKind, SchemaLinkClient};
///
/// # async fn example() -> schemalink_client::TransportResult<()> {
/// let config = ClientConfig::new("ws://127.0.0.1:8765/ws", "http://127.0.0.1:8766");
/// let client = SchemaLinkClient::builder(config)
///     .on(EventKind::SchemaChanged, |event| {
///         println!("schema changed: {}", event.payload);
///     })
///     .build()?;
///
/// client.connect().await?;
/// let schema = client.get_table_schema("fin", "accounts").await?;
/// println!("{schema}");
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SchemaLinkClient {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for SchemaLinkClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaLinkClient")
            .field("mode", &self.inner.config.mode)
            .field("primary", &self.inner.primary)
            .field("fallback", &self.inner.fallback)
            .field("cached", &self.inner.cache.len())
            .field("dispatcher", &self.inner.dispatcher)
            .finish()
    }
}

impl SchemaLinkClient {
    /// Client with no event handlers
    pub fn new(config: ClientConfig) -> TransportResult<Self> {
        Self::builder(config).build()
    }

    /// Start building a client
    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder::new(config)
    }

    /// Configuration in use
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Opens the primary connection and starts forwarding its events.
    ///
    /// In hybrid mode a failed primary connect is logged and calls go to the
    /// fallback; with no fallback the failure is returned. Without a primary
    /// this only probes the fallback.
    pub async fn connect(&self) -> TransportResult<()> {
        self.ensure_event_pump();

        let Some(primary) = &self.inner.primary else {
            if let Some(fallback) = &self.inner.fallback
                && !fallback.probe().await
            {
                warn!(endpoint = %fallback.config().base_url, "Fallback transport unhealthy");
            }
            return Ok(());
        };

        match primary.connect().await {
            Ok(()) => Ok(()),
            Err(e) if self.inner.fallback.is_some() => {
                warn!("Primary connect failed; calls will use the fallback: {}", e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Closes the primary connection. Cached results are kept.
    pub async fn disconnect(&self) -> TransportResult<()> {
        if let Some(primary) = &self.inner.primary {
            primary.disconnect().await?;
        }
        if let Some(fallback) = &self.inner.fallback {
            fallback.disconnect().await?;
        }
        Ok(())
    }

    /// Explicitly reconnects the primary, lifting forced fallback mode.
    pub async fn reconnect(&self) -> TransportResult<()> {
        self.ensure_event_pump();
        self.inner.selector.reconnect_primary().await
    }

    fn ensure_event_pump(&self) {
        let mut pump = self.inner.pump.lock();
        if pump.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        *pump = spawn_event_pump(&self.inner);
    }

    /// Calls `method` with `params` using default call options.
    pub async fn call(&self, method: &str, params: Value) -> TransportResult<Value> {
        self.call_with(ToolCall::new(method, params)).await
    }

    /// Issues `call`, serving it from the cache or from an identical call
    /// already in flight when possible.
    pub async fn call_with(&self, call: ToolCall) -> TransportResult<Value> {
        let inner = &*self.inner;
        let key = Fingerprint::compute(&call.method, &call.params);
        let cacheable = inner.cache.is_cacheable(&call.method);

        if cacheable && let Some(value) = inner.cache.get(&key) {
            trace!(method = %call.method, fingerprint = %key, "Served from cache");
            return Ok(value);
        }

        let cache_key = key.clone();
        let execute = move || async move {
            // Captured before the round trip so a result that crosses an
            // invalidation is not stored
            let epoch = inner.cache.epoch();
            let method = call.method.clone();
            let params = cacheable.then(|| call.params.clone());

            let outcome = inner.selector.call(call).await;
            if let (Ok(value), Some(params)) = (&outcome, params) {
                inner
                    .cache
                    .insert(cache_key, &method, &params, value.clone(), epoch);
            }
            outcome
        };

        if inner.config.deduplicate {
            inner.dedup.run(key, execute).await
        } else {
            execute().await
        }
    }

    /// List the databases the server knows about
    pub async fn discover_databases(&self) -> TransportResult<Value> {
        self.call("discover_databases", json!({})).await
    }

    /// Schema of `database.table`
    pub async fn get_table_schema(&self, database: &str, table: &str) -> TransportResult<Value> {
        self.call(
            "get_table_schema",
            json!({ "database": database, "table": table }),
        )
        .await
    }

    /// Run `query` against `database`
    pub async fn execute_query(&self, database: &str, query: &str) -> TransportResult<Value> {
        self.call("execute_query", json!({ "database": database, "query": query }))
            .await
    }

    /// Evicts cached results referencing `database` (and `table`, if given)
    /// as if the server had pushed the invalidation.
    pub fn invalidate(&self, database: &str, table: Option<&str>) -> usize {
        let mut payload = json!({ "database": database });
        if let Some(table) = table {
            payload["table"] = json!(table);
        }
        ServerEvent::new(EventKind::CacheInvalidate, payload)
            .invalidation_target()
            .map_or(0, |target| self.inner.cache.invalidate(&target))
    }

    /// Drop every cached result
    pub fn clear_cache(&self) {
        self.inner.cache.clear();
    }

    /// Probes every configured transport.
    pub async fn health(&self) -> ClientHealth {
        let primary = match self.inner.selector.primary() {
            Some(primary) => Some(primary.health_check().await),
            None => None,
        };
        let fallback = match self.inner.selector.fallback() {
            Some(fallback) => Some(fallback.health_check().await),
            None => None,
        };
        ClientHealth {
            primary,
            fallback,
            active: self.inner.selector.active_transport(),
        }
    }

    /// Subscribe to server events; each is delivered after its cache
    /// invalidation has been applied.
    pub fn subscribe_server_events(&self) -> broadcast::Receiver<ServerEvent> {
        self.inner.server_events.subscribe()
    }

    /// Subscribe to primary connection lifecycle events
    pub fn subscribe_connection_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.connection_events.subscribe()
    }

    /// Result cache statistics
    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats()
    }

    /// Deduplication statistics
    pub fn dedup_stats(&self) -> DeduplicationStats {
        self.inner.dedup.stats()
    }

    /// Selector statistics
    pub fn selector_stats(&self) -> SelectorStats {
        self.inner.selector.stats()
    }

    /// Primary connection counters
    pub fn connection_stats(&self) -> Option<ConnectionStatsSnapshot> {
        self.inner.primary.as_ref().map(ConnectionManager::stats)
    }

    /// Fallback transport counters
    pub fn fallback_stats(&self) -> Option<ConnectionStatsSnapshot> {
        self.inner.fallback.as_ref().map(|fallback| fallback.stats())
    }

    /// Primary circuit breaker statistics
    pub fn circuit_breaker_stats(&self) -> Option<CircuitBreakerStats> {
        self.inner
            .primary
            .as_ref()
            .map(ConnectionManager::circuit_breaker_stats)
    }

    /// Primary health monitor state
    pub fn health_info(&self) -> Option<HealthInfo> {
        self.inner.primary.as_ref().map(ConnectionManager::health_info)
    }

    /// The primary connection, if configured
    pub fn primary(&self) -> Option<&ConnectionManager> {
        self.inner.primary.as_ref()
    }
}

fn spawn_event_pump(inner: &Arc<ClientInner>) -> Option<JoinHandle<()>> {
    let primary = inner.primary.as_ref()?;
    let mut server_rx = primary.subscribe_server_events();
    let mut connection_rx = primary.subscribe_connection_events();
    let weak: Weak<ClientInner> = Arc::downgrade(inner);

    Some(tokio::spawn(async move {
        loop {
            tokio::select! {
                event = server_rx.recv() => match event {
                    Ok(event) => {
                        let Some(inner) = weak.upgrade() else { break };
                        inner.handle_server_event(&event);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        // A missed invalidation could leave stale entries
                        warn!(skipped, "Server events lagged; clearing result cache");
                        let Some(inner) = weak.upgrade() else { break };
                        inner.cache.clear();
                    }
                    Err(RecvError::Closed) => break,
                },
                event = connection_rx.recv() => match event {
                    Ok(event) => {
                        let Some(inner) = weak.upgrade() else { break };
                        inner.handle_connection_event(&event);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Connection events lagged");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
        debug!("Event pump stopped");
    }))
}

/// Builder for [`SchemaLinkClient`].
#[derive(Debug)]
pub struct ClientBuilder {
    config: ClientConfig,
    handlers: EventDispatcherBuilder,
}

impl ClientBuilder {
    /// Builder for `config`
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            handlers: EventDispatcher::builder(),
        }
    }

    /// Register `handler` for server events of `kind`
    #[must_use]
    pub fn on<F>(mut self, kind: EventKind, handler: F) -> Self
    where
        F: Fn(&ServerEvent) + Send + Sync + 'static,
    {
        self.handlers = self.handlers.on(kind, handler);
        self
    }

    /// Register `handler` for every server event
    #[must_use]
    pub fn on_any<F>(mut self, handler: F) -> Self
    where
        F: Fn(&ServerEvent) + Send + Sync + 'static,
    {
        self.handlers = self.handlers.on_any(handler);
        self
    }

    /// Validate the configuration and construct the transports. No I/O is
    /// performed until [`SchemaLinkClient::connect`].
    pub fn build(self) -> TransportResult<SchemaLinkClient> {
        let Self { config, handlers } = self;
        config
            .validate()
            .map_err(|e| TransportError::ConfigurationError(e.to_string()))?;

        let primary = if config.mode.uses_primary() {
            Some(ConnectionManager::new(config.websocket.clone())?)
        } else {
            None
        };

        let fallback = if config.mode.uses_fallback() {
            let mut transport = FallbackTransport::new(config.fallback.clone())?;
            // One agent id across both transports
            if let Some(primary) = &primary {
                transport = transport.with_identity(primary.identity().clone());
            }
            Some(Arc::new(transport))
        } else {
            None
        };

        let selector = TransportSelector::new(
            config.selector.clone(),
            primary
                .clone()
                .map(|p| Arc::new(p) as Arc<dyn ToolTransport>),
            fallback.clone().map(|f| f as Arc<dyn ToolTransport>),
        )?;

        info!(
            mode = ?config.mode,
            primary = ?primary.as_ref().map(|p| p.config().url.clone()),
            fallback = ?fallback.as_ref().map(|f| f.config().base_url.clone()),
            "SchemaLink client configured"
        );

        let (server_events, _) = broadcast::channel(256);
        let inner = ClientInner {
            cache: ResultCache::new(config.cache.clone()),
            dedup: DeduplicationRegistry::new(),
            dispatcher: handlers.build(),
            server_events,
            connection_events: ConnectionEventEmitter::default(),
            pump: Mutex::new(None),
            primary,
            fallback,
            selector,
            config,
        };

        Ok(SchemaLinkClient {
            inner: Arc::new(inner),
        })
    }
}
