//! Sharded Entry Store
//!
//! Concurrent keyed storage for the fast in-process tier. Keys are hashed
//! onto a power-of-two number of shards, each guarded by its own RW lock so
//! reads (the overwhelmingly common operation) only contend within a shard.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use super::entry::CacheEntry;

/// Number of shards. Power of 2 enables fast modulo via bitwise AND.
pub const SHARD_COUNT: usize = 64;

struct Shard {
    map: RwLock<HashMap<String, CacheEntry>>,
}

impl Shard {
    fn new() -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
        }
    }
}

/// Sharded store holding one tier's entries.
pub struct ShardedStore {
    shards: Vec<Shard>,
    /// Number of live entries across shards
    count: AtomicU64,
    /// Total payload bytes across shards
    size_bytes: AtomicU64,
}

impl ShardedStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| Shard::new()).collect(),
            count: AtomicU64::new(0),
            size_bytes: AtomicU64::new(0),
        }
    }

    #[inline]
    fn shard_index(key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) & (SHARD_COUNT - 1)
    }

    /// Get a clone of the entry for `key`, if present. With `record_access`
    /// the stored entry's access stats are bumped under the shard lock, so
    /// the returned clone and the stored entry agree; cloning alone would
    /// leave the stored counters untouched.
    pub fn get(&self, key: &str, record_access: bool) -> Option<CacheEntry> {
        let shard = &self.shards[Self::shard_index(key)];
        let guard = shard.map.read();
        let entry = guard.get(key)?;
        if record_access && !entry.is_expired() {
            entry.record_access();
        }
        Some(entry.clone())
    }

    /// Check presence without cloning.
    pub fn contains(&self, key: &str) -> bool {
        let shard = &self.shards[Self::shard_index(key)];
        shard.map.read().contains_key(key)
    }

    /// Insert an entry, returning the replaced one if any.
    ///
    /// Entry and byte accounting happens under the shard's write lock so a
    /// concurrent capacity check never observes a half-applied insert.
    pub fn insert(&self, key: String, entry: CacheEntry) -> Option<CacheEntry> {
        let size = entry.size();
        let shard = &self.shards[Self::shard_index(&key)];
        let mut guard = shard.map.write();
        let old = guard.insert(key, entry);

        match &old {
            Some(previous) => {
                let old_size = previous.size();
                if size >= old_size {
                    self.size_bytes.fetch_add(size - old_size, Ordering::Relaxed);
                } else {
                    self.size_bytes.fetch_sub(old_size - size, Ordering::Relaxed);
                }
            }
            None => {
                self.count.fetch_add(1, Ordering::Relaxed);
                self.size_bytes.fetch_add(size, Ordering::Relaxed);
            }
        }

        old
    }

    /// Remove an entry, returning it if present.
    pub fn remove(&self, key: &str) -> Option<CacheEntry> {
        let shard = &self.shards[Self::shard_index(key)];
        let removed = shard.map.write().remove(key);
        if let Some(entry) = &removed {
            self.count.fetch_sub(1, Ordering::Relaxed);
            self.size_bytes.fetch_sub(entry.size(), Ordering::Relaxed);
        }
        removed
    }

    /// Drop all entries.
    pub fn clear(&self) {
        for shard in &self.shards {
            shard.map.write().clear();
        }
        self.count.store(0, Ordering::Relaxed);
        self.size_bytes.store(0, Ordering::Relaxed);
    }

    /// Number of entries.
    pub fn len(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total payload bytes.
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes.load(Ordering::Relaxed)
    }

    /// Snapshot of all keys.
    pub fn keys(&self) -> Vec<String> {
        let mut keys = Vec::with_capacity(self.len() as usize);
        for shard in &self.shards {
            keys.extend(shard.map.read().keys().cloned());
        }
        keys
    }

    /// Snapshot of all entries. Used by eviction candidate collection and
    /// the TTL sweep; taken shard by shard so no global lock is held.
    pub fn entries(&self) -> Vec<(String, CacheEntry)> {
        let mut entries = Vec::with_capacity(self.len() as usize);
        for shard in &self.shards {
            let guard = shard.map.read();
            entries.extend(guard.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        entries
    }
}

impl Default for ShardedStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::time::Duration;

    fn make_entry(data: &[u8]) -> CacheEntry {
        CacheEntry::new(Bytes::copy_from_slice(data), Duration::from_secs(60))
    }

    #[test]
    fn test_shard_count_is_power_of_two() {
        assert!(SHARD_COUNT.is_power_of_two());
    }

    #[test]
    fn test_insert_get_remove() {
        let store = ShardedStore::new();

        assert!(store.insert("a".to_string(), make_entry(b"hello")).is_none());
        assert_eq!(store.len(), 1);
        assert_eq!(store.size_bytes(), 5);

        let got = store.get("a", true).unwrap();
        assert_eq!(got.value().as_ref(), b"hello");

        let removed = store.remove("a").unwrap();
        assert_eq!(removed.value().as_ref(), b"hello");
        assert!(store.is_empty());
        assert_eq!(store.size_bytes(), 0);
    }

    #[test]
    fn test_replace_adjusts_size() {
        let store = ShardedStore::new();

        store.insert("a".to_string(), make_entry(b"original"));
        assert_eq!(store.size_bytes(), 8);

        let old = store.insert("a".to_string(), make_entry(b"replaced content"));
        assert!(old.is_some());
        assert_eq!(store.len(), 1);
        assert_eq!(store.size_bytes(), 16);

        store.insert("a".to_string(), make_entry(b"tiny"));
        assert_eq!(store.size_bytes(), 4);
    }

    #[test]
    fn test_get_bumps_stored_access_count() {
        let store = ShardedStore::new();
        store.insert("a".to_string(), make_entry(b"v"));

        for _ in 0..5 {
            store.get("a", true);
        }
        let (_, stored) = store.entries().pop().unwrap();
        assert_eq!(stored.access_count(), 5);

        // Stats reads pass false and leave the count alone
        store.get("a", false);
        let (_, stored) = store.entries().pop().unwrap();
        assert_eq!(stored.access_count(), 5);
    }

    #[test]
    fn test_remove_missing_is_none() {
        let store = ShardedStore::new();
        assert!(store.remove("nope").is_none());
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_keys_and_entries_snapshot() {
        let store = ShardedStore::new();
        for i in 0..50 {
            store.insert(format!("key-{}", i), make_entry(&[i as u8; 10]));
        }

        let mut keys = store.keys();
        keys.sort();
        assert_eq!(keys.len(), 50);
        assert_eq!(keys[0], "key-0");

        assert_eq!(store.entries().len(), 50);
    }

    #[test]
    fn test_clear() {
        let store = ShardedStore::new();
        for i in 0..20 {
            store.insert(format!("key-{}", i), make_entry(b"data"));
        }
        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.size_bytes(), 0);
    }

    #[test]
    fn test_concurrent_access() {
        use std::sync::Arc;
        use std::thread;

        let store = Arc::new(ShardedStore::new());

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for i in 0..500 {
                        let key = format!("key-{}-{}", t, i);
                        store.insert(key.clone(), make_entry(&[0u8; 16]));
                        store.get(&key, true);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.len(), 4000);
        assert_eq!(store.size_bytes(), 4000 * 16);
    }
}
