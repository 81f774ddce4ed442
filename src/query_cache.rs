//! Shared store for compiled statements and table readers.
//!
//! Building a statement means analyzing the whole operation chain, cutting
//! it, optimizing and rendering it. The result only depends on the chain's
//! shape, the schema mapping, the dialect and the build flags, so it is kept
//! here and shared.
//!
//! # Architecture
//!
//! Statements: (canonical chain, schema name, dialect, build options) -> `CompiledQuery`
//! Table readers: (entity, ordered column list, schema name) -> `Materializer`
//!
//! The two maps are locked independently. Two concurrent misses for the same
//! key both build and the later insert wins.
//!
//! # Configuration
//!
//! Read by [`QueryCacheConfig::from_env`]:
//! - `CHAINQL_QUERY_CACHE_ENABLED` (default: true)
//! - `CHAINQL_QUERY_CACHE_MAX_ENTRIES` (default: 1000)
//! - `CHAINQL_QUERY_CACHE_MAX_TABLE_READERS` (default: 256)

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::materializer::Materializer;
use crate::query_planner::query_builder::CompiledQuery;

/// Key for statement lookup
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryCacheKey {
    /// Canonical (serialized) operation chain
    pub chain: String,
    pub schema_name: String,
    pub dialect: String,
    /// Build flags that change the generated statement
    pub options: String,
}

impl QueryCacheKey {
    pub fn new(chain: &str, schema_name: &str, dialect: &str, options: &str) -> Self {
        QueryCacheKey {
            chain: chain.to_string(),
            schema_name: schema_name.to_string(),
            dialect: dialect.to_string(),
            options: options.to_string(),
        }
    }
}

/// Key for table reader lookup
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableReaderKey {
    pub entity: String,
    pub columns: Vec<String>,
    pub schema_name: String,
}

impl TableReaderKey {
    pub fn new(entity: &str, columns: &[String], schema_name: &str) -> Self {
        TableReaderKey {
            entity: entity.to_string(),
            columns: columns.to_vec(),
            schema_name: schema_name.to_string(),
        }
    }
}

trait SchemaScoped {
    fn schema_name(&self) -> &str;
}

impl SchemaScoped for QueryCacheKey {
    fn schema_name(&self) -> &str {
        &self.schema_name
    }
}

impl SchemaScoped for TableReaderKey {
    fn schema_name(&self) -> &str {
        &self.schema_name
    }
}

/// Stored value plus LRU bookkeeping.
#[derive(Debug)]
struct CacheEntry<V> {
    value: Arc<V>,
    /// Access sequence number of the last hit (for LRU)
    last_accessed: AtomicU64,
    access_count: AtomicU64,
}

impl<V> CacheEntry<V> {
    fn new(value: Arc<V>, sequence: u64) -> Self {
        CacheEntry {
            value,
            last_accessed: AtomicU64::new(sequence),
            access_count: AtomicU64::new(0),
        }
    }

    /// Entries are touched under the read lock.
    fn touch(&self, sequence: u64) {
        self.last_accessed.store(sequence, Ordering::Relaxed);
        self.access_count.fetch_add(1, Ordering::Relaxed);
    }
}

/// One independently locked map with LRU eviction.
struct CacheMap<K, V> {
    entries: RwLock<HashMap<K, CacheEntry<V>>>,
    max_entries: usize,
}

impl<K: Eq + Hash + Clone + SchemaScoped, V> CacheMap<K, V> {
    fn new(max_entries: usize) -> Self {
        CacheMap {
            entries: RwLock::new(HashMap::new()),
            max_entries,
        }
    }

    fn get(&self, key: &K, sequence: u64) -> Option<Arc<V>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(key).map(|entry| {
            entry.touch(sequence);
            Arc::clone(&entry.value)
        })
    }

    /// Returns the number of evicted entries.
    fn insert(&self, key: K, value: Arc<V>, sequence: u64) -> u64 {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let mut evicted = 0;
        while !entries.contains_key(&key) && !entries.is_empty() && entries.len() >= self.max_entries
        {
            if !Self::evict_lru(&mut entries) {
                break;
            }
            evicted += 1;
        }
        if self.max_entries > 0 {
            entries.insert(key, CacheEntry::new(value, sequence));
        }
        evicted
    }

    fn evict_lru(entries: &mut HashMap<K, CacheEntry<V>>) -> bool {
        let oldest = entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_accessed.load(Ordering::Relaxed))
            .map(|(key, _)| key.clone());
        match oldest {
            Some(key) => entries.remove(&key).is_some(),
            None => false,
        }
    }

    fn invalidate_schema(&self, schema_name: &str) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.retain(|key, _| key.schema_name() != schema_name);
    }

    fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Size limits and the on/off switch.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryCacheConfig {
    /// `false` turns every lookup into a miss that is not counted
    pub enabled: bool,
    /// Maximum number of compiled statements (LRU eviction)
    pub max_entries: usize,
    /// Maximum number of table readers (LRU eviction)
    pub max_table_readers: usize,
}

impl Default for QueryCacheConfig {
    fn default() -> Self {
        QueryCacheConfig {
            enabled: true,
            max_entries: 1000,
            max_table_readers: 256,
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl QueryCacheConfig {
    /// `CHAINQL_QUERY_CACHE_*` values; unparseable ones fall back to the defaults.
    pub fn from_env() -> Self {
        let defaults = QueryCacheConfig::default();

        QueryCacheConfig {
            enabled: env_or("CHAINQL_QUERY_CACHE_ENABLED", defaults.enabled),
            max_entries: env_or("CHAINQL_QUERY_CACHE_MAX_ENTRIES", defaults.max_entries),
            max_table_readers: env_or(
                "CHAINQL_QUERY_CACHE_MAX_TABLE_READERS",
                defaults.max_table_readers,
            ),
        }
    }
}

/// Statement and table reader cache. Safe to share behind an `Arc`.
pub struct QueryCache {
    statements: CacheMap<QueryCacheKey, CompiledQuery>,
    table_readers: CacheMap<TableReaderKey, Materializer>,
    config: QueryCacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    /// Logical clock ordering accesses for LRU
    sequence: AtomicU64,
}

impl QueryCache {
    pub fn new(config: QueryCacheConfig) -> Self {
        QueryCache {
            statements: CacheMap::new(config.max_entries),
            table_readers: CacheMap::new(config.max_table_readers),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(QueryCacheConfig::default())
    }

    pub fn from_env() -> Self {
        Self::new(QueryCacheConfig::from_env())
    }

    pub fn config(&self) -> &QueryCacheConfig {
        &self.config
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    fn record<V>(&self, found: Option<Arc<V>>) -> Option<Arc<V>> {
        let counter = if found.is_some() {
            &self.hits
        } else {
            &self.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    pub fn get(&self, key: &QueryCacheKey) -> Option<Arc<CompiledQuery>> {
        if !self.config.enabled {
            return None;
        }
        let found = self.record(self.statements.get(key, self.next_sequence()));
        log::debug!(
            "Statement cache {} for schema {}",
            if found.is_some() { "hit" } else { "miss" },
            key.schema_name
        );
        found
    }

    /// May evict the least recently used statement.
    pub fn insert(&self, key: QueryCacheKey, query: Arc<CompiledQuery>) {
        if !self.config.enabled {
            return;
        }
        let evicted = self.statements.insert(key, query, self.next_sequence());
        self.evictions.fetch_add(evicted, Ordering::Relaxed);
    }

    pub fn get_table_reader(&self, key: &TableReaderKey) -> Option<Arc<Materializer>> {
        if !self.config.enabled {
            return None;
        }
        self.record(self.table_readers.get(key, self.next_sequence()))
    }

    pub fn insert_table_reader(&self, key: TableReaderKey, reader: Arc<Materializer>) {
        if !self.config.enabled {
            return;
        }
        let evicted = self.table_readers.insert(key, reader, self.next_sequence());
        self.evictions.fetch_add(evicted, Ordering::Relaxed);
    }

    /// Drops every entry built against `schema_name`, e.g. after its mapping
    /// was reloaded.
    pub fn invalidate_schema(&self, schema_name: &str) {
        self.statements.invalidate_schema(schema_name);
        self.table_readers.invalidate_schema(schema_name);
    }

    pub fn clear(&self) {
        self.statements.clear();
        self.table_readers.clear();
    }

    pub fn metrics(&self) -> CacheMetrics {
        CacheMetrics {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            size: self.statements.len(),
            table_readers: self.table_readers.len(),
            max_entries: self.config.max_entries,
            max_table_readers: self.config.max_table_readers,
        }
    }
}

/// Point-in-time counters.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    /// Cached statements
    pub size: usize,
    pub table_readers: usize,
    pub max_entries: usize,
    pub max_table_readers: usize,
}

impl CacheMetrics {
    /// Hits over lookups, 0.0 before the first lookup.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Share of the statement map in use.
    pub fn entry_utilization(&self) -> f64 {
        if self.max_entries == 0 {
            0.0
        } else {
            self.size as f64 / self.max_entries as f64
        }
    }
}
