//! Cache Events
//!
//! Immutable notifications emitted by the cache for observers such as the
//! performance analyzer. Delivery is at-most-once and best-effort over a
//! bounded broadcast channel: a lagging subscriber loses the oldest events
//! instead of blocking cache operations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::tier::TierLevel;

/// A significant occurrence in the cache subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CacheEvent {
    /// A read found a live entry.
    Hit {
        key: String,
        level: TierLevel,
        timestamp: DateTime<Utc>,
    },

    /// A read found nothing in any searched tier.
    Miss {
        key: String,
        timestamp: DateTime<Utc>,
    },

    /// A value was written.
    Set {
        key: String,
        levels: Vec<TierLevel>,
        size_bytes: u64,
        timestamp: DateTime<Utc>,
    },

    /// A key was explicitly deleted.
    Delete {
        key: String,
        timestamp: DateTime<Utc>,
    },

    /// Entries were evicted to reclaim capacity.
    Eviction {
        level: TierLevel,
        keys: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    /// A tag or pattern invalidation removed entries.
    Invalidation {
        removed: u64,
        timestamp: DateTime<Utc>,
    },

    /// A promotion copied an entry into a faster tier.
    Promotion {
        key: String,
        to: TierLevel,
        timestamp: DateTime<Utc>,
    },

    /// A pattern rule was added.
    PatternAdded {
        pattern: String,
        timestamp: DateTime<Utc>,
    },

    /// A pattern rule was removed.
    PatternRemoved {
        pattern: String,
        timestamp: DateTime<Utc>,
    },

    /// A benchmark run started.
    BenchmarkStarted {
        name: String,
        timestamp: DateTime<Utc>,
    },

    /// A benchmark run finished (possibly with partial results).
    BenchmarkCompleted {
        name: String,
        aborted: bool,
        timestamp: DateTime<Utc>,
    },
}

impl CacheEvent {
    /// Short identifier for logging and filtering.
    pub fn event_type(&self) -> &'static str {
        match self {
            CacheEvent::Hit { .. } => "hit",
            CacheEvent::Miss { .. } => "miss",
            CacheEvent::Set { .. } => "set",
            CacheEvent::Delete { .. } => "delete",
            CacheEvent::Eviction { .. } => "eviction",
            CacheEvent::Invalidation { .. } => "invalidation",
            CacheEvent::Promotion { .. } => "promotion",
            CacheEvent::PatternAdded { .. } => "pattern_added",
            CacheEvent::PatternRemoved { .. } => "pattern_removed",
            CacheEvent::BenchmarkStarted { .. } => "benchmark_started",
            CacheEvent::BenchmarkCompleted { .. } => "benchmark_completed",
        }
    }
}

/// Bounded fan-out for cache events.
pub struct EventBus {
    sender: broadcast::Sender<CacheEvent>,
}

impl EventBus {
    /// Create a bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event. With no subscribers, or with all of them lagging,
    /// this silently drops; observers are never allowed to slow the cache.
    pub fn publish(&self, event: CacheEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe; the receiver reports `RecvError::Lagged` when it fell
    /// behind and events were dropped.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.sender.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
