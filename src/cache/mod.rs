//! Multi-Level Intelligent Cache
//!
//! Three cooperating tiers with automatic placement, promotion, and
//! invalidation.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                       IntelligentCache                              │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  fast-memory          │ distributed          │ durable              │
//! │  ┌────────────────┐   │ ┌────────────────┐   │ ┌────────────────┐   │
//! │  │ ShardedStore   │   │ │ TierBackend    │   │ │ TierBackend    │   │
//! │  │ (64-way)       │   │ │ (async)        │   │ │ (async)        │   │
//! │  └────────────────┘   │ └────────────────┘   │ └────────────────┘   │
//! │         │             │          │           │          │           │
//! │         └─────────────┴──────────┴───────────┴──────────┘           │
//! │                              │                                      │
//! │        TierSelector · PromotionPolicy · EvictionPolicy              │
//! │        TagIndex · CachePatternSet · EventBus                        │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Reads search fastest-first and promote hot entries upward; writes fan
//! out to the tiers the selector picks for the value's size and TTL.
//! Every removal path (delete, eviction, expiry, invalidation) keeps the
//! tag index consistent with the live entries.

pub mod backend;
pub mod entry;
pub mod events;
pub mod eviction;
pub mod invalidation;
pub mod patterns;
pub mod selector;
pub mod service;
pub mod stats;
pub mod store;
pub mod tier;

pub use backend::{BackendStats, InMemoryBackend, TierBackend};
pub use entry::{CacheEntry, EntryMetadata};
pub use events::{CacheEvent, EventBus};
pub use eviction::EvictionPolicy;
pub use invalidation::{KeyMatcher, MatchType, TagIndex};
pub use patterns::{CachePattern, CachePatternSet};
pub use selector::{PromotionPolicy, TierSelector};
pub use service::{
    BatchSetEntry, BatchSetOutcome, GetOptions, IntelligentCache, SetOptions,
};
pub use stats::{CacheMetrics, HotKey, TierStats};
pub use store::ShardedStore;
pub use tier::{PutOutcome, Tier, TierLevel};
