//! TTL result cache with event-driven invalidation.
//!
//! Completed tool results are stored under their call fingerprint. Each
//! method belongs to a [`TtlClass`] whose TTL is configurable; a zero TTL
//! makes the class non-cacheable. Entries expire lazily on read and are
//! evicted eagerly by invalidation events naming a resource they reference.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace};

use schemalink_transport_traits::InvalidationTarget;
use schemalink_transport_traits::config::duration_ms;

use crate::fingerprint::{Fingerprint, database_tag, resource_tags, table_tag};

/// Operation class deciding how long a result stays fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TtlClass {
    /// Schema-shape lookups; change rarely
    Schema,
    /// Database and table listings
    Discovery,
    /// Query execution; volatile
    Execution,
    /// Text generation; never identical twice
    Generation,
    /// Anything unclassified
    Default,
}

impl TtlClass {
    /// Built-in class for `method`.
    pub fn infer(method: &str) -> Self {
        match method {
            "get_table_schema" | "get_schema" | "describe_table" | "get_table_columns"
            | "get_relationships" => Self::Schema,
            "discover_databases" | "list_databases" | "list_tables" | "discover_tables" => {
                Self::Discovery
            }
            "execute_query" | "run_query" | "execute_sql" => Self::Execution,
            m if m.starts_with("generate_") || m.starts_with("llm_") || m == "extract_intent" => {
                Self::Generation
            }
            _ => Self::Default,
        }
    }
}

/// Cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Whether results are cached at all
    pub enabled: bool,

    /// Maximum number of cached entries
    pub max_entries: usize,

    /// TTL for [`TtlClass::Schema`]
    #[serde(with = "duration_ms")]
    pub schema_ttl: Duration,

    /// TTL for [`TtlClass::Discovery`]
    #[serde(with = "duration_ms")]
    pub discovery_ttl: Duration,

    /// TTL for [`TtlClass::Execution`]; zero disables caching
    #[serde(with = "duration_ms")]
    pub execution_ttl: Duration,

    /// TTL for [`TtlClass::Generation`]; zero disables caching
    #[serde(with = "duration_ms")]
    pub generation_ttl: Duration,

    /// TTL for [`TtlClass::Default`]
    #[serde(with = "duration_ms")]
    pub default_ttl: Duration,

    /// Per-method class overrides
    pub method_classes: HashMap<String, TtlClass>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 1000,
            schema_ttl: Duration::from_secs(300),
            discovery_ttl: Duration::from_secs(60),
            execution_ttl: Duration::ZERO,
            generation_ttl: Duration::ZERO,
            default_ttl: Duration::from_secs(30),
            method_classes: HashMap::new(),
        }
    }
}

impl CacheConfig {
    /// Caching turned off
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Set the entry bound
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    /// Set the TTL of `class`
    pub fn with_ttl(mut self, class: TtlClass, ttl: Duration) -> Self {
        match class {
            TtlClass::Schema => self.schema_ttl = ttl,
            TtlClass::Discovery => self.discovery_ttl = ttl,
            TtlClass::Execution => self.execution_ttl = ttl,
            TtlClass::Generation => self.generation_ttl = ttl,
            TtlClass::Default => self.default_ttl = ttl,
        }
        self
    }

    /// Assign `method` to `class`
    pub fn with_method_class(mut self, method: impl Into<String>, class: TtlClass) -> Self {
        self.method_classes.insert(method.into(), class);
        self
    }

    /// Class of `method`, honouring overrides
    pub fn class_for(&self, method: &str) -> TtlClass {
        self.method_classes
            .get(method)
            .copied()
            .unwrap_or_else(|| TtlClass::infer(method))
    }

    /// TTL of `class`
    pub fn ttl_for(&self, class: TtlClass) -> Duration {
        match class {
            TtlClass::Schema => self.schema_ttl,
            TtlClass::Discovery => self.discovery_ttl,
            TtlClass::Execution => self.execution_ttl,
            TtlClass::Generation => self.generation_ttl,
            TtlClass::Default => self.default_ttl,
        }
    }
}

/// Cache entry with metadata.
#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    created: Instant,
    ttl: Duration,
    resources: BTreeSet<String>,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.created.elapsed() >= self.ttl
    }

    /// Whether an invalidation of `target` evicts this entry.
    ///
    /// A database-wide event hits everything tagged with the database. A
    /// table event hits that table's entries plus the database's
    /// table-agnostic entries, such as listings.
    fn references(&self, target: &InvalidationTarget) -> bool {
        let db = database_tag(&target.database);
        match &target.table {
            None => self.resources.contains(&db),
            Some(table) => {
                if self.resources.contains(&table_tag(&target.database, table)) {
                    return true;
                }
                let table_prefix = format!("table:{}.", target.database);
                self.resources.contains(&db)
                    && !self.resources.iter().any(|r| r.starts_with(&table_prefix))
            }
        }
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Cache hits
    pub hits: u64,
    /// Cache misses
    pub misses: u64,
    /// Entries evicted due to size limit
    pub evictions: u64,
    /// Entries expired
    pub expirations: u64,
    /// Entries removed by invalidation events
    pub invalidations: u64,
    /// Current entry count
    pub current_entries: usize,
}

/// Thread-safe result cache.
#[derive(Debug)]
pub struct ResultCache {
    config: CacheConfig,
    entries: RwLock<HashMap<Fingerprint, CacheEntry>>,
    /// Bumped by every invalidation; results fetched across one are stale
    epoch: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    invalidations: AtomicU64,
}

impl ResultCache {
    /// Create a new cache with the given configuration.
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            entries: RwLock::new(HashMap::new()),
            epoch: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    /// Configuration in use
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Whether results of `method` may be cached.
    pub fn is_cacheable(&self, method: &str) -> bool {
        self.config.enabled
            && self.config.max_entries > 0
            && !self.config.ttl_for(self.config.class_for(method)).is_zero()
    }

    /// Current invalidation epoch. Pass it back to [`ResultCache::insert`]
    /// so a result fetched across an invalidation is not stored.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Get a cached value.
    pub fn get(&self, key: &Fingerprint) -> Option<Value> {
        {
            let entries = self.entries.read();
            match entries.get(key) {
                Some(entry) if !entry.is_expired() => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    trace!(fingerprint = %key, "Cache hit");
                    return Some(entry.value.clone());
                }
                Some(_) => {}
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
            }
        }

        // Expired: remove unless a fresh value replaced it meanwhile
        let mut entries = self.entries.write();
        if entries.get(key).is_some_and(CacheEntry::is_expired) {
            entries.remove(key);
            self.expirations.fetch_add(1, Ordering::Relaxed);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store the result of `method(params)`.
    ///
    /// Returns `false` without storing when the method is not cacheable or
    /// an invalidation happened since `observed_epoch`.
    pub fn insert(
        &self,
        key: Fingerprint,
        method: &str,
        params: &Value,
        value: Value,
        observed_epoch: u64,
    ) -> bool {
        if !self.is_cacheable(method) {
            return false;
        }
        let ttl = self.config.ttl_for(self.config.class_for(method));
        let resources = resource_tags(params);

        let mut entries = self.entries.write();
        if self.epoch.load(Ordering::SeqCst) != observed_epoch {
            debug!(method = %method, "Result crossed an invalidation; not caching");
            return false;
        }

        if !entries.contains_key(&key) {
            while entries.len() >= self.config.max_entries {
                if !self.evict_oldest(&mut entries) {
                    break;
                }
            }
        }
        entries.insert(
            key,
            CacheEntry {
                value,
                created: Instant::now(),
                ttl,
                resources,
            },
        );
        true
    }

    /// Evict the oldest entry.
    fn evict_oldest(&self, entries: &mut HashMap<Fingerprint, CacheEntry>) -> bool {
        let oldest = entries
            .iter()
            .min_by_key(|(_, entry)| entry.created)
            .map(|(key, _)| key.clone());

        match oldest {
            Some(key) => {
                entries.remove(&key);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Remove every entry referencing `target`; returns how many went.
    pub fn invalidate(&self, target: &InvalidationTarget) -> usize {
        let mut entries = self.entries.write();
        self.epoch.fetch_add(1, Ordering::SeqCst);

        let before = entries.len();
        entries.retain(|_, entry| !entry.references(target));
        let removed = before - entries.len();

        self.invalidations
            .fetch_add(removed as u64, Ordering::Relaxed);
        debug!(
            database = %target.database,
            table = ?target.table,
            removed,
            "Cache invalidated"
        );
        removed
    }

    /// Get cache statistics.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            current_entries: self.entries.read().len(),
        }
    }

    /// Current entry count
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the cache holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Clear all cached entries.
    pub fn clear(&self) {
        self.entries.write().clear();
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}
