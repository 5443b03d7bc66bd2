//! MeshCache - Multi-Level Intelligent Caching
//!
//! A tiered caching subsystem with automatic tier placement, hot-entry
//! promotion, tag- and pattern-based invalidation, continuous performance
//! analysis, and response optimization.
//!
//! # Architecture
//!
//! ```text
//! Reads/Writes → IntelligentCache → [fast-memory | distributed | durable]
//!                      │
//!        ┌─────────────┼─────────────┐
//!        │             │             │
//!  PerformanceAnalyzer │      ResponseOptimizer
//!  (sampling,          │      (compression, transforms,
//!   benchmarks)        │       batching, pooling)
//!                  EventBus
//! ```
//!
//! The cache fans writes out to the tiers selected for a value's size and
//! TTL, searches fastest-first on read, and promotes entries that prove
//! hot. The analyzer samples tier statistics and turns pressure into rated
//! recommendations; the optimizer owns the tunables those recommendations
//! adjust.
//!
//! # Modules
//!
//! - [`analyzer`] - Continuous sampling, detections, and benchmarks
//! - [`cache`] - Tiers, entries, eviction, invalidation, and the service
//! - [`config`] - Tier and service configuration
//! - [`error`] - Error types
//! - [`optimizer`] - Compression, JSON transforms, batching, pooling
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use bytes::Bytes;
//! use meshcache::{CacheOptions, GetOptions, IntelligentCache, SetOptions};
//!
//! # async fn run() -> meshcache::Result<()> {
//! let cache = Arc::new(IntelligentCache::new(CacheOptions::default())?);
//! cache.start();
//!
//! cache
//!     .set(
//!         "user:42",
//!         Bytes::from_static(b"{\"name\":\"tycho\"}"),
//!         SetOptions {
//!             tags: Some(vec!["user:42".into()]),
//!             ..Default::default()
//!         },
//!     )
//!     .await;
//!
//! let profile = cache.get("user:42", GetOptions::default()).await;
//! assert!(profile.is_some());
//!
//! cache.invalidate_by_tags(&["user:42".to_string()]).await;
//! cache.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod analyzer;
pub mod cache;
pub mod config;
pub mod error;
pub mod optimizer;

// Re-export commonly used types
pub use analyzer::{AnalyzerConfig, BenchmarkRunner, BenchmarkSpec, PerformanceAnalyzer};
pub use cache::{
    BatchSetEntry, BatchSetOutcome, CacheEntry, CacheEvent, CacheMetrics, CachePattern,
    GetOptions, IntelligentCache, MatchType, SetOptions, TierLevel, TierStats,
};
pub use config::CacheOptions;
pub use error::{Error, Result};
pub use optimizer::{OptimizerConfig, ResponseOptimizer};
