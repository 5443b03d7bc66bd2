//! Response Optimizer
//!
//! Post-cache response shaping: payload compression, JSON transforms,
//! priority request batching, and backend connection pooling. The
//! [`ResponseOptimizer`] facade owns the tunables the analyzer's
//! recommendations adjust and exposes the metrics its health scoring
//! consumes.

pub mod batcher;
pub mod compression;
pub mod pool;
pub mod transform;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::analyzer::report::{OpportunityKind, OptimizationOpportunity};

use batcher::{BatchConfig, BatchOutcome, BatchProcessor, Priority, RequestBatcher};
use compression::{CompressionAlgorithm, CompressionConfig, CompressionManager};
use pool::{ConnectionPool, PoolConfig, PoolGuard, PoolStats};
use transform::{TransformOptions, TransformPipeline};

/// Top-level optimizer configuration.
#[derive(Debug, Clone, Default)]
pub struct OptimizerConfig {
    pub compression: CompressionConfig,
    pub transform: TransformOptions,
    pub batch: BatchConfig,
    pub pool: PoolConfig,
    /// Whether responses are compressed at all; recommendations can flip
    /// this at runtime
    pub compression_enabled: bool,
}

/// A shaped response: the stored bytes plus how they were encoded.
#[derive(Debug, Clone)]
pub struct OptimizedResponse {
    pub data: Bytes,
    pub algorithm: CompressionAlgorithm,
    pub original_bytes: u64,
}

impl OptimizedResponse {
    pub fn bytes_saved(&self) -> u64 {
        self.original_bytes.saturating_sub(self.data.len() as u64)
    }
}

/// Snapshot consumed by the analyzer's health scoring.
#[derive(Debug, Clone, Serialize)]
pub struct OptimizerMetrics {
    pub compressed_responses: u64,
    pub bytes_saved: u64,
    pub transforms_applied: u64,
    pub recommendations_applied: u64,
    pub batcher: Option<batcher::BatcherStats>,
    pub pool: PoolStats,
}

/// Runtime-adjustable knobs, separate from the immutable managers.
#[derive(Debug, Clone)]
struct Tunables {
    compression_enabled: bool,
}

/// Facade over compression, transforms, batching, and pooling.
pub struct ResponseOptimizer {
    compression: CompressionManager,
    transforms: TransformPipeline,
    pool: ConnectionPool,
    batch_config: BatchConfig,
    batcher: RwLock<Option<Arc<RequestBatcher>>>,
    tunables: RwLock<Tunables>,
    compressed_responses: AtomicU64,
    bytes_saved: AtomicU64,
    transforms_applied: AtomicU64,
    recommendations_applied: AtomicU64,
}

impl ResponseOptimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        Self {
            compression: CompressionManager::with_config(config.compression),
            transforms: TransformPipeline::new(config.transform),
            pool: ConnectionPool::new(config.pool),
            batch_config: config.batch,
            batcher: RwLock::new(None),
            tunables: RwLock::new(Tunables {
                compression_enabled: config.compression_enabled,
            }),
            compressed_responses: AtomicU64::new(0),
            bytes_saved: AtomicU64::new(0),
            transforms_applied: AtomicU64::new(0),
            recommendations_applied: AtomicU64::new(0),
        }
    }

    /// Shape a response payload: compress it when compression is enabled
    /// and both the size and content-type gates pass.
    pub fn optimize_response(
        &self,
        data: Bytes,
        content_type: Option<&str>,
    ) -> OptimizedResponse {
        let original = data.len() as u64;

        let enabled = self.tunables.read().compression_enabled;
        if !enabled || !self.compression.should_compress(original, content_type) {
            return OptimizedResponse {
                data,
                algorithm: CompressionAlgorithm::None,
                original_bytes: original,
            };
        }

        let (stored, algorithm) = self.compression.compress(&data);
        if algorithm != CompressionAlgorithm::None {
            self.compressed_responses.fetch_add(1, Ordering::Relaxed);
            self.bytes_saved
                .fetch_add(original.saturating_sub(stored.len() as u64), Ordering::Relaxed);
        }
        OptimizedResponse {
            data: stored,
            algorithm,
            original_bytes: original,
        }
    }

    /// Restore an optimized payload to its original bytes.
    pub fn restore_response(&self, response: &OptimizedResponse) -> crate::error::Result<Bytes> {
        self.compression
            .decompress(&response.data, response.algorithm)
    }

    /// Apply the configured JSON transforms.
    pub fn transform_json(&self, value: Value) -> Value {
        if self.transforms.options().is_noop() {
            return value;
        }
        self.transforms_applied.fetch_add(1, Ordering::Relaxed);
        self.transforms.apply(value)
    }

    /// Install the batch processor, starting the drain task. Replaces any
    /// earlier batcher without draining it; call once during wiring.
    pub fn attach_batcher(&self, processor: Arc<dyn BatchProcessor>) {
        let batcher = Arc::new(RequestBatcher::new(self.batch_config.clone(), processor));
        *self.batcher.write() = Some(batcher);
    }

    /// Submit a request for batched processing.
    pub async fn submit_batched(
        &self,
        key: impl Into<String>,
        payload: Bytes,
        priority: Priority,
        timeout: Option<std::time::Duration>,
    ) -> BatchOutcome {
        let batcher = self.batcher.read().clone();
        match batcher {
            Some(batcher) => batcher.submit(key, payload, priority, timeout).await,
            None => BatchOutcome::Failed("no batch processor attached".to_string()),
        }
    }

    /// Acquire a pooled connection to a backend endpoint.
    pub async fn acquire_connection(&self, host: &str, port: u16) -> crate::error::Result<PoolGuard> {
        self.pool.acquire(host, port).await
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Act on an analyzer recommendation. Returns whether this component
    /// owns the named tunable; cache-level recommendations (TTL, capacity)
    /// are not applied here.
    pub fn apply_recommendation(&self, opportunity: &OptimizationOpportunity) -> bool {
        let applied = match opportunity.kind {
            OpportunityKind::EnableCompression => {
                let mut tunables = self.tunables.write();
                let changed = !tunables.compression_enabled;
                tunables.compression_enabled = true;
                changed
            }
            OpportunityKind::TuneTtl | OpportunityKind::IncreaseCapacity => false,
        };
        if applied {
            self.recommendations_applied.fetch_add(1, Ordering::Relaxed);
            info!(kind = ?opportunity.kind, id = %opportunity.id, "applied recommendation");
        }
        applied
    }

    pub fn compression_enabled(&self) -> bool {
        self.tunables.read().compression_enabled
    }

    /// Metrics snapshot.
    pub fn metrics(&self) -> OptimizerMetrics {
        OptimizerMetrics {
            compressed_responses: self.compressed_responses.load(Ordering::Relaxed),
            bytes_saved: self.bytes_saved.load(Ordering::Relaxed),
            transforms_applied: self.transforms_applied.load(Ordering::Relaxed),
            recommendations_applied: self.recommendations_applied.load(Ordering::Relaxed),
            batcher: self.batcher.read().as_ref().map(|b| b.stats()),
            pool: self.pool.stats(),
        }
    }

    /// Stop the batcher drain task and the pool reaper.
    pub async fn shutdown(&self) {
        let batcher = self.batcher.write().take();
        if let Some(batcher) = batcher {
            batcher.shutdown().await;
        }
        self.pool.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::report::{Effort, Risk};
    use chrono::Utc;

    fn optimizer() -> ResponseOptimizer {
        ResponseOptimizer::new(OptimizerConfig {
            compression_enabled: true,
            ..Default::default()
        })
    }

    fn compressible_payload() -> Bytes {
        Bytes::from("the quick brown fox ".repeat(200))
    }

    #[test]
    fn test_construction_needs_no_runtime() {
        // Pool and batcher tasks start lazily; building the facade must not
        // require a reactor.
        let optimizer = ResponseOptimizer::new(OptimizerConfig::default());
        assert!(!optimizer.compression_enabled());
        assert_eq!(optimizer.metrics().pool.created, 0);
    }

    #[test]
    fn test_optimize_compresses_text_payload() {
        let optimizer = optimizer();
        let payload = compressible_payload();

        let response = optimizer.optimize_response(payload.clone(), Some("application/json"));
        assert_eq!(response.algorithm, CompressionAlgorithm::Lz4);
        assert!(response.data.len() < payload.len());
        assert!(response.bytes_saved() > 0);

        let restored = optimizer.restore_response(&response).unwrap();
        assert_eq!(restored, payload);

        let metrics = optimizer.metrics();
        assert_eq!(metrics.compressed_responses, 1);
        assert!(metrics.bytes_saved > 0);
    }

    #[test]
    fn test_optimize_skips_binary_content() {
        let optimizer = optimizer();
        let response =
            optimizer.optimize_response(compressible_payload(), Some("image/png"));
        assert_eq!(response.algorithm, CompressionAlgorithm::None);
        assert_eq!(optimizer.metrics().compressed_responses, 0);
    }

    #[test]
    fn test_optimize_respects_disabled_flag() {
        let optimizer = ResponseOptimizer::new(OptimizerConfig::default());
        let response =
            optimizer.optimize_response(compressible_payload(), Some("application/json"));
        assert_eq!(response.algorithm, CompressionAlgorithm::None);
    }

    #[test]
    fn test_apply_recommendation_enables_compression() {
        let optimizer = ResponseOptimizer::new(OptimizerConfig::default());
        assert!(!optimizer.compression_enabled());

        let opportunity = OptimizationOpportunity::new(
            OpportunityKind::EnableCompression,
            "low hit rate on large text payloads",
            0.3,
            Effort::Low,
            Risk::Low,
            Utc::now() + chrono::Duration::minutes(5),
        );
        assert!(optimizer.apply_recommendation(&opportunity));
        assert!(optimizer.compression_enabled());

        // Re-applying is a no-op
        assert!(!optimizer.apply_recommendation(&opportunity));

        // Cache-level recommendations are not this component's to apply
        let ttl = OptimizationOpportunity::new(
            OpportunityKind::TuneTtl,
            "short-lived keys",
            0.1,
            Effort::Low,
            Risk::Medium,
            Utc::now() + chrono::Duration::minutes(5),
        );
        assert!(!optimizer.apply_recommendation(&ttl));
    }

    #[tokio::test]
    async fn test_submit_without_batcher_fails_fast() {
        let optimizer = optimizer();
        let outcome = optimizer
            .submit_batched("k", Bytes::from_static(b"x"), Priority::Normal, None)
            .await;
        assert!(matches!(outcome, BatchOutcome::Failed(_)));
        optimizer.shutdown().await;
    }
}
