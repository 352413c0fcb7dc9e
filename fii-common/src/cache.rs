//! Process-local query cache.
//!
//! Namespaced store with per-namespace TTL and size policies. Read-heavy
//! lookups (latest date, store stats, ticker lists, ledger entries) are
//! cached here; the owning repository invalidates its namespaces inside
//! the same call that mutates the underlying table, so readers never see
//! a fresh row behind a stale cache.
//!
//! Values are stored as `serde_json::Value`, so any serde type can be
//! cached without the cache knowing about domain types.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::logging::channel;

/// Expiration and capacity policy for one namespace.
#[derive(Debug, Clone, Copy)]
pub struct CachePolicy {
    /// Time to live for entries in this namespace
    pub ttl: Duration,
    /// Maximum number of entries held for this namespace
    pub max_entries: usize,
}

impl CachePolicy {
    pub fn new(ttl_secs: u64, max_entries: usize) -> Self {
        Self {
            ttl: Duration::from_secs(ttl_secs),
            max_entries: max_entries.max(1),
        }
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::new(300, 1000)
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: serde_json::Value,
    created_at: Instant,
    last_access: Instant,
}

impl CacheEntry {
    fn new(value: serde_json::Value) -> Self {
        let now = Instant::now();
        Self {
            value,
            created_at: now,
            last_access: now,
        }
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.created_at.elapsed() >= ttl
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: u64,
    misses: u64,
    evictions: u64,
}

#[derive(Debug, Default)]
struct Namespace {
    entries: HashMap<String, CacheEntry>,
    counters: Counters,
}

/// Per-namespace statistics snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// Whole-cache statistics snapshot.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub namespaces: HashMap<String, NamespaceStats>,
}

impl CacheStats {
    /// Total entries across all namespaces
    pub fn entries(&self) -> usize {
        self.namespaces.values().map(|n| n.entries).sum()
    }

    /// Hit ratio in percent across all namespaces
    pub fn hit_ratio(&self) -> f64 {
        let hits: u64 = self.namespaces.values().map(|n| n.hits).sum();
        let misses: u64 = self.namespaces.values().map(|n| n.misses).sum();
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64 * 100.0
        }
    }
}

/// Namespaced TTL + LRU cache.
///
/// Owned by the process and never shared across processes.
pub struct QueryCache {
    default_policy: CachePolicy,
    policies: RwLock<HashMap<String, CachePolicy>>,
    namespaces: RwLock<HashMap<String, Namespace>>,
}

impl QueryCache {
    pub fn new(default_policy: CachePolicy) -> Self {
        Self {
            default_policy,
            policies: RwLock::new(HashMap::new()),
            namespaces: RwLock::new(HashMap::new()),
        }
    }

    /// Register a policy for a namespace. Entries already cached keep
    /// their values but are judged against the new policy from now on.
    pub fn register_policy(&self, namespace: &str, policy: CachePolicy) {
        self.policies.write().insert(namespace.to_string(), policy);
        debug!(
            target: channel::CACHE,
            "policy registered for '{}': ttl={}s max={}",
            namespace,
            policy.ttl.as_secs(),
            policy.max_entries
        );
    }

    fn policy(&self, namespace: &str) -> CachePolicy {
        self.policies
            .read()
            .get(namespace)
            .copied()
            .unwrap_or(self.default_policy)
    }

    /// Look up a cached value. Expired entries are dropped lazily and
    /// count as a miss plus an eviction.
    pub fn get<T: DeserializeOwned>(&self, namespace: &str, key: &str) -> Option<T> {
        let ttl = self.policy(namespace).ttl;
        let mut namespaces = self.namespaces.write();
        let ns = namespaces.entry(namespace.to_string()).or_default();

        match ns.entries.get_mut(key) {
            Some(entry) if entry.is_expired(ttl) => {
                ns.entries.remove(key);
                ns.counters.misses += 1;
                ns.counters.evictions += 1;
                None
            }
            Some(entry) => {
                entry.last_access = Instant::now();
                let value = entry.value.clone();
                ns.counters.hits += 1;
                serde_json::from_value(value).ok()
            }
            None => {
                ns.counters.misses += 1;
                None
            }
        }
    }

    /// Store a value. When the namespace is at capacity the
    /// least-recently-used entry is evicted first.
    pub fn put<T: Serialize>(&self, namespace: &str, key: &str, value: &T) {
        let value = match serde_json::to_value(value) {
            Ok(v) => v,
            Err(err) => {
                debug!(target: channel::CACHE, "refusing to cache '{}:{}': {}", namespace, key, err);
                return;
            }
        };

        let max_entries = self.policy(namespace).max_entries;
        let mut namespaces = self.namespaces.write();
        let ns = namespaces.entry(namespace.to_string()).or_default();

        if !ns.entries.contains_key(key) && ns.entries.len() >= max_entries {
            if let Some(lru_key) = ns
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_access)
                .map(|(k, _)| k.clone())
            {
                ns.entries.remove(&lru_key);
                ns.counters.evictions += 1;
            }
        }

        ns.entries.insert(key.to_string(), CacheEntry::new(value));
    }

    /// Drop every entry in a namespace.
    pub fn invalidate(&self, namespace: &str) {
        let mut namespaces = self.namespaces.write();
        if let Some(ns) = namespaces.get_mut(namespace) {
            let dropped = ns.entries.len();
            ns.entries.clear();
            if dropped > 0 {
                debug!(target: channel::CACHE, "invalidated {} entries in '{}'", dropped, namespace);
            }
        }
    }

    /// Drop a single entry.
    pub fn invalidate_key(&self, namespace: &str, key: &str) {
        let mut namespaces = self.namespaces.write();
        if let Some(ns) = namespaces.get_mut(namespace) {
            ns.entries.remove(key);
        }
    }

    /// Drop everything, keeping registered policies.
    pub fn clear_all(&self) {
        let mut namespaces = self.namespaces.write();
        for ns in namespaces.values_mut() {
            ns.entries.clear();
        }
    }

    /// Snapshot hit/miss/eviction counters and entry counts.
    pub fn stats(&self) -> CacheStats {
        let namespaces = self.namespaces.read();
        CacheStats {
            namespaces: namespaces
                .iter()
                .map(|(name, ns)| {
                    (
                        name.clone(),
                        NamespaceStats {
                            entries: ns.entries.len(),
                            hits: ns.counters.hits,
                            misses: ns.counters.misses,
                            evictions: ns.counters.evictions,
                        },
                    )
                })
                .collect(),
        }
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(CachePolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_after_put_hits() {
        let cache = QueryCache::default();
        cache.put("stats", "rows", &42u64);

        assert_eq!(cache.get::<u64>("stats", "rows"), Some(42));
        let stats = cache.stats();
        assert_eq!(stats.namespaces["stats"].hits, 1);
    }

    #[test]
    fn miss_is_counted() {
        let cache = QueryCache::default();
        assert_eq!(cache.get::<u64>("stats", "rows"), None);
        assert_eq!(cache.stats().namespaces["stats"].misses, 1);
    }

    #[test]
    fn zero_ttl_expires_immediately() {
        let cache = QueryCache::default();
        cache.register_policy("volatile", CachePolicy::new(0, 10));
        cache.put("volatile", "k", &"v");

        assert_eq!(cache.get::<String>("volatile", "k"), None);
        let ns = &cache.stats().namespaces["volatile"];
        assert_eq!(ns.misses, 1);
        assert_eq!(ns.evictions, 1);
    }

    #[test]
    fn capacity_never_exceeded() {
        let cache = QueryCache::default();
        cache.register_policy("small", CachePolicy::new(300, 3));

        for i in 0..10 {
            cache.put("small", &format!("k{}", i), &i);
        }

        let ns = &cache.stats().namespaces["small"];
        assert_eq!(ns.entries, 3);
        assert_eq!(ns.evictions, 7);
    }

    #[test]
    fn overflow_evicts_least_recently_used() {
        let cache = QueryCache::default();
        cache.register_policy("small", CachePolicy::new(300, 2));

        cache.put("small", "a", &1);
        cache.put("small", "b", &2);
        // Touch "a" so "b" becomes the LRU entry
        assert_eq!(cache.get::<i32>("small", "a"), Some(1));
        cache.put("small", "c", &3);

        assert_eq!(cache.get::<i32>("small", "a"), Some(1));
        assert_eq!(cache.get::<i32>("small", "b"), None);
        assert_eq!(cache.get::<i32>("small", "c"), Some(3));
    }

    #[test]
    fn invalidate_namespace_misses_until_next_put() {
        let cache = QueryCache::default();
        cache.put("latest_date", "v", &"2025-03-18");
        cache.put("list_tickers", "v", &vec!["ABCD11"]);

        cache.invalidate("latest_date");

        assert_eq!(cache.get::<String>("latest_date", "v"), None);
        // Other namespaces are untouched
        assert_eq!(
            cache.get::<Vec<String>>("list_tickers", "v"),
            Some(vec!["ABCD11".to_string()])
        );

        cache.put("latest_date", "v", &"2025-03-19");
        assert_eq!(
            cache.get::<String>("latest_date", "v"),
            Some("2025-03-19".to_string())
        );
    }

    #[test]
    fn invalidate_single_key() {
        let cache = QueryCache::default();
        cache.put("events", "AAAA11", &1);
        cache.put("events", "BBBB11", &2);

        cache.invalidate_key("events", "AAAA11");

        assert_eq!(cache.get::<i32>("events", "AAAA11"), None);
        assert_eq!(cache.get::<i32>("events", "BBBB11"), Some(2));
    }

    #[test]
    fn clear_all_keeps_policies() {
        let cache = QueryCache::default();
        cache.register_policy("small", CachePolicy::new(300, 1));
        cache.put("small", "a", &1);
        cache.put("other", "b", &2);

        cache.clear_all();
        assert_eq!(cache.stats().entries(), 0);

        // Policy still caps the namespace at one entry
        cache.put("small", "x", &1);
        cache.put("small", "y", &2);
        assert_eq!(cache.stats().namespaces["small"].entries, 1);
    }

    #[test]
    fn updating_existing_key_does_not_evict() {
        let cache = QueryCache::default();
        cache.register_policy("small", CachePolicy::new(300, 2));

        cache.put("small", "a", &1);
        cache.put("small", "b", &2);
        cache.put("small", "a", &10);

        let ns = &cache.stats().namespaces["small"];
        assert_eq!(ns.entries, 2);
        assert_eq!(ns.evictions, 0);
        assert_eq!(cache.get::<i32>("small", "a"), Some(10));
    }
}
