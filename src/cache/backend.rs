//! Tier Backend Port
//!
//! The distributed and durable tiers delegate storage to a pluggable
//! asynchronous backend (a remote cache cluster, a database table, ...).
//! Backend implementation details are out of scope here; the crate ships an
//! in-memory reference backend used by tests and single-process deployments.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use super::entry::CacheEntry;
use crate::error::Result;

/// Storage port for the distributed/durable tiers.
///
/// Implementations must be safe for concurrent use. Operations involve
/// network or disk I/O and are awaited without holding any in-process tier
/// lock.
#[async_trait]
pub trait TierBackend: Send + Sync {
    /// Fetch the entry for `key`.
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>>;

    /// Store an entry under `key`, replacing any previous one.
    async fn put(&self, key: &str, entry: CacheEntry) -> Result<()>;

    /// Remove the entry for `key`; returns whether one existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Snapshot of all stored keys.
    async fn keys(&self) -> Result<Vec<String>>;

    /// Snapshot of all stored entries.
    async fn entries(&self) -> Result<Vec<(String, CacheEntry)>>;

    /// Drop everything.
    async fn clear(&self) -> Result<()>;

    /// Current entry count.
    fn len(&self) -> u64;

    /// Current total payload bytes.
    fn size_bytes(&self) -> u64;

    /// Operation counters.
    fn stats(&self) -> BackendStats;
}

/// Backend operation counters.
#[derive(Debug, Clone, Default)]
pub struct BackendStats {
    pub reads: u64,
    pub writes: u64,
    pub deletes: u64,
}

/// In-memory reference backend.
#[derive(Default)]
pub struct InMemoryBackend {
    storage: DashMap<String, CacheEntry>,
    size_bytes: AtomicU64,
    reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
}

impl InMemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TierBackend for InMemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.storage.get(key).map(|e| e.clone()))
    }

    async fn put(&self, key: &str, entry: CacheEntry) -> Result<()> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        let size = entry.size();
        match self.storage.insert(key.to_string(), entry) {
            Some(old) => {
                let old_size = old.size();
                if size >= old_size {
                    self.size_bytes.fetch_add(size - old_size, Ordering::Relaxed);
                } else {
                    self.size_bytes.fetch_sub(old_size - size, Ordering::Relaxed);
                }
            }
            None => {
                self.size_bytes.fetch_add(size, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.deletes.fetch_add(1, Ordering::Relaxed);
        if let Some((_, entry)) = self.storage.remove(key) {
            self.size_bytes.fetch_sub(entry.size(), Ordering::Relaxed);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.storage.iter().map(|e| e.key().clone()).collect())
    }

    async fn entries(&self) -> Result<Vec<(String, CacheEntry)>> {
        Ok(self
            .storage
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect())
    }

    async fn clear(&self) -> Result<()> {
        self.storage.clear();
        self.size_bytes.store(0, Ordering::Relaxed);
        Ok(())
    }

    fn len(&self) -> u64 {
        self.storage.len() as u64
    }

    fn size_bytes(&self) -> u64 {
        self.size_bytes.load(Ordering::Relaxed)
    }

    fn stats(&self) -> BackendStats {
        BackendStats {
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
        }
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

    #[tokio::test]
    async fn test_put_get_delete() {
        let backend = InMemoryBackend::new();

        backend.put("key", make_entry(b"data")).await.unwrap();
        assert_eq!(backend.len(), 1);
        assert_eq!(backend.size_bytes(), 4);

        let got = backend.get("key").await.unwrap().unwrap();
        assert_eq!(got.value().as_ref(), b"data");

        assert!(backend.delete("key").await.unwrap());
        assert!(!backend.delete("key").await.unwrap());
        assert_eq!(backend.size_bytes(), 0);
    }

    #[tokio::test]
    async fn test_replace_accounting() {
        let backend = InMemoryBackend::new();

        backend.put("key", make_entry(b"short")).await.unwrap();
        backend.put("key", make_entry(b"a much longer value")).await.unwrap();
        assert_eq!(backend.len(), 1);
        assert_eq!(backend.size_bytes(), 19);
    }

    #[tokio::test]
    async fn test_keys_snapshot_and_clear() {
        let backend = InMemoryBackend::new();
        for i in 0..10 {
            backend.put(&format!("k-{}", i), make_entry(b"v")).await.unwrap();
        }

        let keys = backend.keys().await.unwrap();
        assert_eq!(keys.len(), 10);

        backend.clear().await.unwrap();
        assert_eq!(backend.len(), 0);
        assert!(backend.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_op_counters() {
        let backend = InMemoryBackend::new();

        backend.put("k", make_entry(b"v")).await.unwrap();
        backend.get("k").await.unwrap();
        backend.get("missing").await.unwrap();
        backend.delete("k").await.unwrap();

        let stats = backend.stats();
        assert_eq!(stats.writes, 1);
        assert_eq!(stats.reads, 2);
        assert_eq!(stats.deletes, 1);
    }
}
