//! Cache Tiers
//!
//! One storage level in the hierarchy. The fast tier is the in-process
//! sharded store; the distributed and durable tiers delegate to an async
//! [`TierBackend`]. A tier enforces its own capacity limits by invoking the
//! eviction engine before an insert that would overflow.

use std::sync::Arc;

use tracing::debug;

use super::backend::TierBackend;
use super::entry::CacheEntry;
use super::eviction::EvictionPolicy;
use super::stats::{HotKey, LatencyTracker, TierCounters, TierStats};
use super::store::ShardedStore;
use crate::config::TierOptions;
use crate::error::Result;

/// One storage level in the cache hierarchy, fastest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TierLevel {
    /// Fast in-process memory
    FastMemory,
    /// Distributed cache cluster
    Distributed,
    /// Durable store
    Durable,
}

impl TierLevel {
    /// All levels in fastest-first search order.
    pub fn all() -> [TierLevel; 3] {
        [
            TierLevel::FastMemory,
            TierLevel::Distributed,
            TierLevel::Durable,
        ]
    }
}

impl std::fmt::Display for TierLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TierLevel::FastMemory => write!(f, "fast-memory"),
            TierLevel::Distributed => write!(f, "distributed"),
            TierLevel::Durable => write!(f, "durable"),
        }
    }
}

enum TierStorage {
    Memory(ShardedStore),
    Backend(Arc<dyn TierBackend>),
}

/// Result of a tier write.
pub struct PutOutcome {
    /// Whether the entry was stored
    pub stored: bool,
    /// Keys evicted to make room (callers must prune the tag index)
    pub evicted: Vec<String>,
}

/// A single cache tier: storage, capacity limits, eviction and counters.
pub struct Tier {
    level: TierLevel,
    options: TierOptions,
    storage: TierStorage,
    eviction: EvictionPolicy,
    counters: TierCounters,
    /// Serializes the capacity-check/evict/insert sequence in [`Tier::put`];
    /// concurrent writers could otherwise leave the tier over its limits.
    write_lock: tokio::sync::Mutex<()>,
}

impl Tier {
    /// Create the fast in-process tier.
    pub fn memory(level: TierLevel, options: TierOptions, eviction: EvictionPolicy) -> Self {
        Self {
            level,
            options,
            storage: TierStorage::Memory(ShardedStore::new()),
            eviction,
            counters: TierCounters::new(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Create a backend-based tier.
    pub fn backed(
        level: TierLevel,
        options: TierOptions,
        eviction: EvictionPolicy,
        backend: Arc<dyn TierBackend>,
    ) -> Self {
        Self {
            level,
            options,
            storage: TierStorage::Backend(backend),
            eviction,
            counters: TierCounters::new(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn level(&self) -> TierLevel {
        self.level
    }

    pub fn enabled(&self) -> bool {
        self.options.enabled
    }

    pub fn options(&self) -> &TierOptions {
        &self.options
    }

    pub fn counters(&self) -> &TierCounters {
        &self.counters
    }

    /// Look up a live entry. Expired entries are purged and reported as
    /// misses. `update_access` controls whether the entry's access stats are
    /// bumped (stats reads pass `false`).
    pub async fn get(&self, key: &str, update_access: bool) -> Result<Option<CacheEntry>> {
        let tracker = LatencyTracker::start();
        let found = match &self.storage {
            TierStorage::Memory(store) => store.get(key, update_access),
            TierStorage::Backend(backend) => backend.get(key).await?,
        };

        let entry = match found {
            Some(entry) if entry.is_expired() => {
                // Lazy expiry: purge and report a miss
                self.remove(key).await?;
                self.counters.record_expired(1);
                None
            }
            other => other,
        };

        match &entry {
            Some(e) => {
                if update_access {
                    // The memory store bumped its stored entry under the
                    // shard lock; backend tiers bump here and write back.
                    if let TierStorage::Backend(backend) = &self.storage {
                        e.record_access();
                        backend.put(key, e.clone()).await?;
                    }
                }
                self.counters.record_hit();
                self.counters.record_read_latency(tracker.elapsed());
            }
            None => self.counters.record_miss(),
        }

        Ok(entry)
    }

    /// Store an entry, evicting as needed so that afterwards
    /// `size_bytes <= max_size_bytes` and `entries <= max_entries` hold.
    pub async fn put(&self, key: &str, entry: CacheEntry) -> Result<PutOutcome> {
        let size = entry.size();
        if size > self.options.max_size_bytes {
            debug!(tier = %self.level, key, size, "entry larger than tier capacity, skipping");
            return Ok(PutOutcome {
                stored: false,
                evicted: Vec::new(),
            });
        }

        // One writer at a time: the capacity check, eviction, and insert
        // must observe a consistent tier.
        let _write = self.write_lock.lock().await;

        let replacing = self.contains(key).await?;
        let current_bytes = self.size_bytes();
        let current_entries = self.len();

        let need_bytes = (current_bytes + size).saturating_sub(self.options.max_size_bytes);
        let need_entries = if replacing {
            0
        } else {
            (current_entries + 1).saturating_sub(self.options.max_entries)
        };

        let evicted = if need_bytes > 0 || need_entries > 0 {
            self.evict(need_bytes, need_entries, key).await?
        } else {
            Vec::new()
        };

        match &self.storage {
            TierStorage::Memory(store) => {
                store.insert(key.to_string(), entry);
            }
            TierStorage::Backend(backend) => backend.put(key, entry).await?,
        }
        self.counters.record_set();

        Ok(PutOutcome {
            stored: true,
            evicted,
        })
    }

    /// Remove victims until the required space is free. The incoming key is
    /// never selected as its own victim.
    async fn evict(
        &self,
        need_bytes: u64,
        need_entries: u64,
        incoming_key: &str,
    ) -> Result<Vec<String>> {
        let mut snapshot = self.entries().await?;
        snapshot.retain(|(key, _)| key != incoming_key);

        let victims = self
            .eviction
            .select_victims(&snapshot, need_bytes, need_entries);

        let mut evicted = Vec::with_capacity(victims.len());
        for (key, _) in victims {
            if self.remove(&key).await? {
                evicted.push(key);
            }
        }

        if !evicted.is_empty() {
            self.counters.record_eviction(evicted.len() as u64);
            debug!(tier = %self.level, count = evicted.len(), "evicted entries");
        }
        Ok(evicted)
    }

    /// Remove an entry; returns whether one existed.
    pub async fn remove(&self, key: &str) -> Result<bool> {
        match &self.storage {
            TierStorage::Memory(store) => Ok(store.remove(key).is_some()),
            TierStorage::Backend(backend) => backend.delete(key).await,
        }
    }

    /// Check presence without touching access stats.
    pub async fn contains(&self, key: &str) -> Result<bool> {
        match &self.storage {
            TierStorage::Memory(store) => Ok(store.contains(key)),
            TierStorage::Backend(backend) => Ok(backend.get(key).await?.is_some()),
        }
    }

    /// Snapshot of all keys.
    pub async fn keys(&self) -> Result<Vec<String>> {
        match &self.storage {
            TierStorage::Memory(store) => Ok(store.keys()),
            TierStorage::Backend(backend) => backend.keys().await,
        }
    }

    /// Snapshot of all entries.
    pub async fn entries(&self) -> Result<Vec<(String, CacheEntry)>> {
        match &self.storage {
            TierStorage::Memory(store) => Ok(store.entries()),
            TierStorage::Backend(backend) => backend.entries().await,
        }
    }

    /// Drop all entries and reset this tier's counters.
    pub async fn clear(&self) -> Result<()> {
        match &self.storage {
            TierStorage::Memory(store) => store.clear(),
            TierStorage::Backend(backend) => backend.clear().await?,
        }
        self.counters.reset();
        Ok(())
    }

    /// Remove all expired entries, returning their keys so the caller can
    /// prune the tag index in the same logical operation.
    pub async fn sweep_expired(&self) -> Result<Vec<String>> {
        let mut purged = Vec::new();
        for (key, entry) in self.entries().await? {
            if entry.is_expired() && self.remove(&key).await? {
                purged.push(key);
            }
        }
        if !purged.is_empty() {
            self.counters.record_expired(purged.len() as u64);
        }
        Ok(purged)
    }

    /// Current entry count.
    pub fn len(&self) -> u64 {
        match &self.storage {
            TierStorage::Memory(store) => store.len(),
            TierStorage::Backend(backend) => backend.len(),
        }
    }

    /// Whether the tier holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current total payload bytes.
    pub fn size_bytes(&self) -> u64 {
        match &self.storage {
            TierStorage::Memory(store) => store.size_bytes(),
            TierStorage::Backend(backend) => backend.size_bytes(),
        }
    }

    /// Statistics snapshot including the top-N most accessed keys.
    pub async fn stats(&self, top_n: usize) -> Result<TierStats> {
        let mut hot: Vec<HotKey> = self
            .entries()
            .await?
            .into_iter()
            .map(|(key, entry)| HotKey {
                key,
                access_count: entry.access_count(),
            })
            .collect();
        hot.sort_by(|a, b| b.access_count.cmp(&a.access_count).then(a.key.cmp(&b.key)));
        hot.truncate(top_n);

        Ok(self.counters.snapshot(self.len(), self.size_bytes(), hot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::backend::InMemoryBackend;
    use bytes::Bytes;
    use std::time::Duration;
    use tokio_test::assert_ok;

    fn make_entry(data: &[u8]) -> CacheEntry {
        CacheEntry::new(Bytes::copy_from_slice(data), Duration::from_secs(60))
    }

    fn small_tier(max_entries: u64, max_size_bytes: u64) -> Tier {
        Tier::memory(
            TierLevel::FastMemory,
            TierOptions {
                enabled: true,
                max_entries,
                max_size_bytes,
                default_ttl: Duration::from_secs(60),
            },
            EvictionPolicy::default(),
        )
    }

    #[tokio::test]
    async fn test_put_get() {
        let tier = small_tier(100, 10_000);

        let outcome = assert_ok!(tier.put("k", make_entry(b"hello")).await);
        assert!(outcome.stored);
        assert!(outcome.evicted.is_empty());

        let got = tier.get("k", true).await.unwrap().unwrap();
        assert_eq!(got.value().as_ref(), b"hello");
        assert_eq!(tier.counters().hits(), 1);
    }

    #[tokio::test]
    async fn test_miss_recorded() {
        let tier = small_tier(100, 10_000);
        assert!(tier.get("absent", true).await.unwrap().is_none());
        assert_eq!(tier.counters().misses(), 1);
    }

    #[tokio::test]
    async fn test_expired_entry_is_miss_and_purged() {
        let tier = small_tier(100, 10_000);
        let entry = CacheEntry::new(Bytes::from_static(b"v"), Duration::from_millis(10));
        tier.put("k", entry).await.unwrap();

        tokio::time::sleep(Duration::from_millis(25)).await;

        assert!(tier.get("k", true).await.unwrap().is_none());
        assert_eq!(tier.len(), 0);
        assert_eq!(tier.counters().misses(), 1);
    }

    #[tokio::test]
    async fn test_access_counts_persist_in_memory_tier() {
        let tier = small_tier(100, 10_000);
        tier.put("k", make_entry(b"v")).await.unwrap();

        for _ in 0..5 {
            tier.get("k", true).await.unwrap();
        }

        let entries = tier.entries().await.unwrap();
        let (_, stored) = entries.iter().find(|(k, _)| k == "k").unwrap();
        assert_eq!(stored.access_count(), 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_puts_respect_max_entries() {
        let tier = Arc::new(small_tier(1, 10_000));

        let writers: Vec<_> = (0..8)
            .map(|i| {
                let tier = Arc::clone(&tier);
                tokio::spawn(async move {
                    tier.put(&format!("k-{}", i), make_entry(b"v")).await
                })
            })
            .collect();
        for writer in writers {
            assert!(writer.await.unwrap().unwrap().stored);
        }

        assert!(tier.len() <= 1);
    }

    #[tokio::test]
    async fn test_max_entries_eviction() {
        let tier = small_tier(2, 10_000);

        tier.put("a", make_entry(b"1")).await.unwrap();
        tier.put("b", make_entry(b"2")).await.unwrap();
        // make "b" more valuable
        tier.get("b", true).await.unwrap();
        tier.get("b", true).await.unwrap();

        let outcome = tier.put("c", make_entry(b"3")).await.unwrap();
        assert_eq!(outcome.evicted, vec!["a".to_string()]);
        assert_eq!(tier.len(), 2);
        assert!(tier.contains("c").await.unwrap());
        assert!(tier.contains("b").await.unwrap());
    }

    #[tokio::test]
    async fn test_byte_capacity_eviction_frees_required_space() {
        let tier = small_tier(100, 300);

        tier.put("a", make_entry(&[0u8; 100])).await.unwrap();
        tier.put("b", make_entry(&[0u8; 100])).await.unwrap();
        tier.put("c", make_entry(&[0u8; 100])).await.unwrap();

        let outcome = tier.put("d", make_entry(&[0u8; 150])).await.unwrap();
        assert!(outcome.stored);
        assert!(!outcome.evicted.is_empty());
        assert!(tier.size_bytes() <= 300);
        assert!(tier.contains("d").await.unwrap());
    }

    #[tokio::test]
    async fn test_oversized_entry_not_stored() {
        let tier = small_tier(100, 50);
        let outcome = tier.put("big", make_entry(&[0u8; 100])).await.unwrap();
        assert!(!outcome.stored);
        assert_eq!(tier.len(), 0);
    }

    #[tokio::test]
    async fn test_replace_does_not_evict_for_entry_count() {
        let tier = small_tier(1, 10_000);
        tier.put("a", make_entry(b"v1")).await.unwrap();
        let outcome = tier.put("a", make_entry(b"v2")).await.unwrap();
        assert!(outcome.evicted.is_empty());
        assert_eq!(tier.len(), 1);
    }

    #[tokio::test]
    async fn test_backend_tier_roundtrip() {
        let tier = Tier::backed(
            TierLevel::Distributed,
            TierOptions::distributed(),
            EvictionPolicy::default(),
            Arc::new(InMemoryBackend::new()),
        );

        tier.put("k", make_entry(b"remote")).await.unwrap();
        let got = tier.get("k", true).await.unwrap().unwrap();
        assert_eq!(got.value().as_ref(), b"remote");
        assert!(tier.remove("k").await.unwrap());
        assert!(!tier.remove("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_sweep_expired() {
        let tier = small_tier(100, 10_000);
        tier.put(
            "short",
            CacheEntry::new(Bytes::from_static(b"v"), Duration::from_millis(5)),
        )
        .await
        .unwrap();
        tier.put("long", make_entry(b"v")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;

        let purged = tier.sweep_expired().await.unwrap();
        assert_eq!(purged, vec!["short".to_string()]);
        assert_eq!(tier.len(), 1);
    }

    #[tokio::test]
    async fn test_stats_top_keys() {
        let tier = small_tier(100, 10_000);
        tier.put("hot", make_entry(b"v")).await.unwrap();
        tier.put("cold", make_entry(b"v")).await.unwrap();
        for _ in 0..5 {
            tier.get("hot", true).await.unwrap();
        }

        let stats = tier.stats(1).await.unwrap();
        assert_eq!(stats.top_keys.len(), 1);
        assert_eq!(stats.top_keys[0].key, "hot");
        assert_eq!(stats.entries, 2);
    }

    #[tokio::test]
    async fn test_clear_resets_counters() {
        let tier = small_tier(100, 10_000);
        tier.put("k", make_entry(b"v")).await.unwrap();
        tier.get("k", true).await.unwrap();

        tier.clear().await.unwrap();
        assert!(tier.is_empty());
        assert_eq!(tier.counters().hits(), 0);
    }
}
