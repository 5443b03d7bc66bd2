//! Performance Analyzer
//!
//! Continuously samples cache statistics, diffing each window against the
//! previous one to detect eviction pressure and poor hit rates, and turns
//! detections into rated optimization opportunities. Analysis failures are
//! logged and the last-known-good report stands; they never propagate to
//! callers. On-demand benchmarks live in [`benchmark`].

pub mod benchmark;
pub mod report;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::service::IntelligentCache;
use crate::cache::tier::TierLevel;
use crate::error::Result;
use crate::optimizer::ResponseOptimizer;

use report::{
    AnalysisReport, Effort, OpportunityKind, OptimizationOpportunity, PerformanceBottleneck,
    Severity,
};

/// Detection thresholds and sampling cadence.
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    pub sample_interval: Duration,
    /// Evictions per window per tier above which pressure is flagged
    pub eviction_threshold: u64,
    /// Hit rate below this is a warning
    pub hit_rate_warning: f64,
    /// Hit rate below this is critical
    pub hit_rate_critical: f64,
    /// How long detections and opportunities stay valid
    pub report_validity: Duration,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_secs(30),
            eviction_threshold: 100,
            hit_rate_warning: 0.7,
            hit_rate_critical: 0.5,
            report_validity: Duration::from_secs(300),
        }
    }
}

/// Per-tier counters remembered from the previous sample window.
#[derive(Debug, Clone, Copy, Default)]
struct WindowBaseline {
    evictions: u64,
    hits: u64,
    misses: u64,
}

/// Samples the cache and produces [`AnalysisReport`]s.
pub struct PerformanceAnalyzer {
    config: AnalyzerConfig,
    cache: Arc<IntelligentCache>,
    optimizer: Option<Arc<ResponseOptimizer>>,
    baselines: Mutex<HashMap<String, WindowBaseline>>,
    last_report: RwLock<Option<AnalysisReport>>,
    token: Mutex<Option<CancellationToken>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl PerformanceAnalyzer {
    pub fn new(config: AnalyzerConfig, cache: Arc<IntelligentCache>) -> Self {
        Self {
            config,
            cache,
            optimizer: None,
            baselines: Mutex::new(HashMap::new()),
            last_report: RwLock::new(None),
            token: Mutex::new(None),
            worker: Mutex::new(None),
        }
    }

    /// Fold an optimizer's metrics into health scoring.
    pub fn with_optimizer(mut self, optimizer: Arc<ResponseOptimizer>) -> Self {
        self.optimizer = Some(optimizer);
        self
    }

    /// Start the sampling task. Idempotent.
    pub fn start(self: &Arc<Self>) {
        let mut slot = self.token.lock();
        if slot.is_some() {
            return;
        }
        let token = CancellationToken::new();
        *slot = Some(token.clone());

        let analyzer = Arc::clone(self);
        let interval = self.config.sample_interval;
        *self.worker.lock() = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => analyzer.sample().await,
                }
            }
            debug!("analyzer sampling task stopped");
        }));
        info!("performance analyzer started");
    }

    /// Stop the sampling task and wait for it.
    pub async fn stop(&self) {
        let token = self.token.lock().take();
        if let Some(token) = token {
            token.cancel();
        }
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }
    }

    /// One sampling pass. A failed analysis keeps the previous report.
    pub async fn sample(&self) {
        match self.analyze().await {
            Ok(report) => {
                if !report.bottlenecks.is_empty() {
                    info!(
                        bottlenecks = report.bottlenecks.len(),
                        opportunities = report.opportunities.len(),
                        health = report.health_score,
                        "analysis found issues"
                    );
                }
                *self.last_report.write() = Some(report);
            }
            Err(e) => {
                // Last-known-good report stands
                warn!(error = %e, "analysis pass failed, keeping previous report");
            }
        }
    }

    /// The most recent successful report.
    pub fn latest_report(&self) -> Option<AnalysisReport> {
        self.last_report.read().clone()
    }

    /// Run the detectors against the current window.
    pub async fn analyze(&self) -> Result<AnalysisReport> {
        let now = Utc::now();
        let valid_until = now
            + chrono::Duration::from_std(self.config.report_validity)
                .unwrap_or_else(|_| chrono::Duration::seconds(300));

        let metrics = self.cache.metrics().await;
        let mut bottlenecks = Vec::new();
        let mut opportunities = Vec::new();

        let mut baselines = self.baselines.lock();
        for (tier_name, stats) in &metrics.per_tier {
            let level = tier_level(tier_name);
            let baseline = baselines.entry(tier_name.clone()).or_default();

            // Window deltas; counter resets (e.g. clear) restart the window
            let evictions = stats.evictions.saturating_sub(baseline.evictions);
            let window_hits = stats.hits.saturating_sub(baseline.hits);
            let window_misses = stats.misses.saturating_sub(baseline.misses);
            *baseline = WindowBaseline {
                evictions: stats.evictions,
                hits: stats.hits,
                misses: stats.misses,
            };

            if evictions > self.config.eviction_threshold {
                // Severity scales with overshoot
                let severity = if evictions > self.config.eviction_threshold * 4 {
                    Severity::Critical
                } else {
                    Severity::Warning
                };
                bottlenecks.push(PerformanceBottleneck::HighEviction {
                    id: Uuid::new_v4(),
                    level,
                    evictions_in_window: evictions,
                    threshold: self.config.eviction_threshold,
                    severity,
                    detected_at: now,
                    valid_until,
                });
                opportunities.push(OptimizationOpportunity::new(
                    OpportunityKind::IncreaseCapacity,
                    format!("{tier_name} evicted {evictions} entries in one window"),
                    0.3,
                    Effort::Medium,
                    Effort::Low,
                    valid_until,
                ));
                opportunities.push(OptimizationOpportunity::new(
                    OpportunityKind::TuneTtl,
                    format!("shorter TTLs would reduce churn in {tier_name}"),
                    0.15,
                    Effort::Low,
                    Effort::Medium,
                    valid_until,
                ));
            }

            let window_total = window_hits + window_misses;
            if window_total >= 10 {
                let hit_rate = window_hits as f64 / window_total as f64;
                if hit_rate < self.config.hit_rate_warning {
                    let severity = if hit_rate < self.config.hit_rate_critical {
                        Severity::Critical
                    } else {
                        Severity::Warning
                    };
                    bottlenecks.push(PerformanceBottleneck::SlowLookup {
                        id: Uuid::new_v4(),
                        level,
                        hit_rate,
                        severity,
                        detected_at: now,
                        valid_until,
                    });
                    opportunities.push(OptimizationOpportunity::new(
                        OpportunityKind::EnableCompression,
                        format!(
                            "{tier_name} hit rate {:.0}%; compression would fit more entries",
                            hit_rate * 100.0
                        ),
                        0.2,
                        Effort::Low,
                        Effort::Low,
                        valid_until,
                    ));
                }
            }
        }
        drop(baselines);

        let optimizer_metrics = self.optimizer.as_ref().map(|o| o.metrics());
        let health_score =
            AnalysisReport::health_score(&metrics, &bottlenecks, optimizer_metrics.as_ref());

        Ok(AnalysisReport {
            generated_at: now,
            bottlenecks,
            opportunities,
            metrics,
            health_score,
        })
    }
}

fn tier_level(name: &str) -> TierLevel {
    match name {
        "distributed" => TierLevel::Distributed,
        "durable" => TierLevel::Durable,
        _ => TierLevel::FastMemory,
    }
}

/// Re-exported for convenience alongside the analyzer.
pub use benchmark::{BenchmarkComparison, BenchmarkResult, BenchmarkRunner, BenchmarkSpec};
