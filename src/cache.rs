//! TTL- and size-bounded in-memory result cache.
//!
//! Used by the pipeline to deduplicate idempotent calls, but generic over
//! key and value. Entries expire a fixed time after creation; a background
//! task sweeps expired entries on an interval. When full, inserting a new key
//! evicts the single oldest entry, found by linear scan. That keeps inserts
//! O(n) in the number of entries, which is fine for the small tables this is
//! meant for and a known limit for large capacities.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Configuration for a [`ResultCache`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultCacheConfig {
    /// How long an entry stays valid after creation.
    pub ttl: Duration,
    /// Maximum number of entries.
    pub capacity: usize,
    /// How often expired entries are swept.
    pub sweep_interval: Duration,
}

impl Default for ResultCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60),
            capacity: 256,
            sweep_interval: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    created_at: Instant,
    sequence: u64,
}

#[derive(Debug)]
struct Storage<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    next_sequence: u64,
}

impl<K: Eq + Hash + Clone, V> Storage<K, V> {
    fn insert(&mut self, key: K, value: V, capacity: usize) {
        if !self.entries.contains_key(&key) && self.entries.len() >= capacity {
            self.evict_oldest();
        }
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.entries.insert(
            key,
            CacheEntry {
                value,
                created_at: Instant::now(),
                sequence,
            },
        );
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, e)| (e.created_at, e.sequence))
            .map(|(k, _)| k.clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }
}

impl<K: Eq + Hash, V> Storage<K, V> {
    fn sweep(&mut self, ttl: Duration) -> usize {
        let before = self.entries.len();
        let now = Instant::now();
        self.entries
            .retain(|_, e| now.saturating_duration_since(e.created_at) < ttl);
        before - self.entries.len()
    }
}

/// A concurrent key/value cache with per-entry TTL and a capacity bound.
///
/// Reads take a shared lock; writes, eviction and the sweep take the
/// exclusive lock. Must be created inside a Tokio runtime, since it spawns
/// its sweep task.
///
/// # Examples
///
/// ```
/// use cloudcall::cache::{ResultCache, ResultCacheConfig};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let cache: ResultCache<String, u32> = ResultCache::new(ResultCacheConfig::default());
/// cache.set("a".to_string(), 1).await;
/// assert_eq!(cache.get(&"a".to_string()).await, Some(1));
/// cache.close().await;
/// # }
/// ```
pub struct ResultCache<K, V> {
    storage: Arc<RwLock<Storage<K, V>>>,
    config: ResultCacheConfig,
    shutdown: CancellationToken,
    closed: AtomicBool,
}

impl<K, V> std::fmt::Debug for ResultCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("config", &self.config)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<K, V> ResultCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Creates the cache and starts its sweep task.
    ///
    /// A capacity of zero is treated as one.
    pub fn new(mut config: ResultCacheConfig) -> Self {
        config.capacity = config.capacity.max(1);
        let storage = Arc::new(RwLock::new(Storage {
            entries: HashMap::new(),
            next_sequence: 0,
        }));
        let shutdown = CancellationToken::new();

        tokio::spawn(sweep_loop(
            Arc::downgrade(&storage),
            config.ttl,
            config.sweep_interval,
            shutdown.clone(),
        ));

        Self {
            storage,
            config,
            shutdown,
            closed: AtomicBool::new(false),
        }
    }

    /// The cache configuration.
    pub fn config(&self) -> &ResultCacheConfig {
        &self.config
    }

    fn is_fresh(&self, entry: &CacheEntry<V>) -> bool {
        entry.created_at.elapsed() < self.config.ttl
    }

    /// Returns the value for `key` if present and not expired.
    pub async fn get(&self, key: &K) -> Option<V> {
        let storage = self.storage.read().await;
        storage
            .entries
            .get(key)
            .filter(|e| self.is_fresh(e))
            .map(|e| e.value.clone())
    }

    /// Inserts or replaces `key`, evicting the oldest entry when full.
    pub async fn set(&self, key: K, value: V) {
        let mut storage = self.storage.write().await;
        storage.insert(key, value, self.config.capacity);
    }

    /// Returns the fresh value for `key`, or inserts the one built by `make`.
    ///
    /// The lookup and insert happen under one write lock, so concurrent
    /// callers for the same key all observe the same value.
    pub async fn get_or_insert_with<F>(&self, key: K, make: F) -> V
    where
        F: FnOnce() -> V,
    {
        let mut storage = self.storage.write().await;
        if let Some(entry) = storage.entries.get(&key).filter(|e| self.is_fresh(e)) {
            return entry.value.clone();
        }
        let value = make();
        storage.insert(key, value.clone(), self.config.capacity);
        value
    }

    /// Removes `key`.
    pub async fn invalidate(&self, key: &K) {
        self.storage.write().await.entries.remove(key);
    }

    /// Removes every entry.
    pub async fn clear(&self) {
        self.storage.write().await.entries.clear();
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub async fn len(&self) -> usize {
        self.storage.read().await.entries.len()
    }

    /// Returns `true` if no entries are stored.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Removes expired entries now, returning how many were removed.
    pub async fn sweep(&self) -> usize {
        self.storage.write().await.sweep(self.config.ttl)
    }

    /// Stops the sweep task and clears the cache.
    ///
    /// Calling it again is a no-op.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown.cancel();
        self.clear().await;
        tracing::debug!("Result cache closed");
    }
}

impl<K, V> Drop for ResultCache<K, V> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn sweep_loop<K, V>(
    storage: std::sync::Weak<RwLock<Storage<K, V>>>,
    ttl: Duration,
    every: Duration,
    shutdown: CancellationToken,
) where
    K: Eq + Hash,
{
    let mut ticker = tokio::time::interval(every.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let Some(storage) = storage.upgrade() else { break };
                let removed = storage.write().await.sweep(ttl);
                if removed > 0 {
                    tracing::debug!(removed = removed, "Swept expired cache entries");
                }
            }
        }
    }
}
