//! Cache Entry Types
//!
//! One cached value with its lifecycle and usage metadata. Access tracking
//! uses atomics so concurrent readers never take a write lock just to bump
//! counters.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;

use crate::optimizer::compression::CompressionAlgorithm;

/// Current wall-clock time as epoch milliseconds.
#[inline]
pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Placement metadata carried by every entry.
#[derive(Debug, Clone)]
pub struct EntryMetadata {
    /// Payload size in bytes (after compression, if any)
    pub size_bytes: u64,
    /// Compression applied to the stored payload
    pub compression: CompressionAlgorithm,
    /// Caller-assigned priority, 1 (lowest) to 10 (highest)
    pub priority: u8,
    /// Estimated cost of re-fetching the value from its source
    pub replacement_cost: f64,
}

impl EntryMetadata {
    pub fn new(size_bytes: u64) -> Self {
        Self {
            size_bytes,
            compression: CompressionAlgorithm::None,
            priority: 5,
            replacement_cost: 1.0,
        }
    }
}

/// One cached value.
///
/// Invariant: `expires_at = created_at + ttl`. An entry observed with
/// `now > expires_at` is logically absent; callers treat it as a miss and
/// purge it.
#[derive(Debug)]
pub struct CacheEntry {
    /// Opaque payload (possibly compressed)
    value: Bytes,
    /// Time to live
    ttl: Duration,
    /// Creation timestamp (epoch millis)
    created_at: u64,
    /// Expiry timestamp (epoch millis)
    expires_at: u64,
    /// Last access timestamp (epoch millis)
    last_accessed: AtomicU64,
    /// Access count for frequency-weighted eviction
    access_count: AtomicU32,
    /// Tags for group invalidation
    tags: Vec<String>,
    /// Placement metadata
    pub metadata: EntryMetadata,
}

impl CacheEntry {
    /// Create a new entry with the given TTL.
    pub fn new(value: Bytes, ttl: Duration) -> Self {
        let now = now_millis();
        let size = value.len() as u64;
        Self {
            value,
            ttl,
            created_at: now,
            expires_at: now + ttl.as_millis() as u64,
            last_accessed: AtomicU64::new(now),
            access_count: AtomicU32::new(0),
            tags: Vec::new(),
            metadata: EntryMetadata::new(size),
        }
    }

    /// Builder-style: attach invalidation tags.
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Builder-style: set priority (clamped to 1..=10).
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.metadata.priority = priority.clamp(1, 10);
        self
    }

    /// Builder-style: mark the payload as compressed.
    pub fn with_compression(mut self, algorithm: CompressionAlgorithm) -> Self {
        self.metadata.compression = algorithm;
        self
    }

    /// Stored payload (zero-copy).
    #[inline]
    pub fn value(&self) -> &Bytes {
        &self.value
    }

    /// Payload size in bytes.
    #[inline]
    pub fn size(&self) -> u64 {
        self.metadata.size_bytes
    }

    /// Configured TTL.
    #[inline]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Creation timestamp (epoch millis).
    #[inline]
    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    /// Expiry timestamp (epoch millis).
    #[inline]
    pub fn expires_at(&self) -> u64 {
        self.expires_at
    }

    /// Invalidation tags.
    #[inline]
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Whether the entry is past its expiry.
    #[inline]
    pub fn is_expired(&self) -> bool {
        now_millis() > self.expires_at
    }

    /// Record an access and return the new count.
    #[inline]
    pub fn record_access(&self) -> u32 {
        self.last_accessed.store(now_millis(), Ordering::Relaxed);
        self.access_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Access count.
    #[inline]
    pub fn access_count(&self) -> u32 {
        self.access_count.load(Ordering::Relaxed)
    }

    /// Last access timestamp (epoch millis).
    #[inline]
    pub fn last_accessed(&self) -> u64 {
        self.last_accessed.load(Ordering::Relaxed)
    }

    /// Milliseconds since the last access.
    #[inline]
    pub fn idle_millis(&self) -> u64 {
        now_millis().saturating_sub(self.last_accessed())
    }
}

impl Clone for CacheEntry {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            ttl: self.ttl,
            created_at: self.created_at,
            expires_at: self.expires_at,
            last_accessed: AtomicU64::new(self.last_accessed.load(Ordering::Relaxed)),
            access_count: AtomicU32::new(self.access_count.load(Ordering::Relaxed)),
            tags: self.tags.clone(),
            metadata: self.metadata.clone(),
        }
    }
}
