//! Analysis report types.
//!
//! Bottlenecks and opportunities are immutable snapshots: once produced
//! they are never mutated in place, and each carries a `valid_until`
//! timestamp after which consumers should treat it as stale.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::cache::stats::CacheMetrics;
use crate::cache::tier::TierLevel;
use crate::optimizer::OptimizerMetrics;

/// Detection severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// A detected performance bottleneck.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PerformanceBottleneck {
    /// Evictions in the sample window exceeded the configured threshold
    HighEviction {
        id: Uuid,
        level: TierLevel,
        evictions_in_window: u64,
        threshold: u64,
        severity: Severity,
        detected_at: DateTime<Utc>,
        valid_until: DateTime<Utc>,
    },
    /// Hit rate fell below the warning or critical threshold
    SlowLookup {
        id: Uuid,
        level: TierLevel,
        hit_rate: f64,
        severity: Severity,
        detected_at: DateTime<Utc>,
        valid_until: DateTime<Utc>,
    },
}

impl PerformanceBottleneck {
    pub fn severity(&self) -> Severity {
        match self {
            PerformanceBottleneck::HighEviction { severity, .. } => *severity,
            PerformanceBottleneck::SlowLookup { severity, .. } => *severity,
        }
    }

    pub fn valid_until(&self) -> DateTime<Utc> {
        match self {
            PerformanceBottleneck::HighEviction { valid_until, .. } => *valid_until,
            PerformanceBottleneck::SlowLookup { valid_until, .. } => *valid_until,
        }
    }

    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        now > self.valid_until()
    }
}

/// What a recommendation proposes to change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OpportunityKind {
    /// Re-tune entry TTLs to reduce churn
    TuneTtl,
    /// Turn on response compression
    EnableCompression,
    /// Raise tier capacity limits
    IncreaseCapacity,
}

/// Qualitative rating for effort and risk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Effort {
    Low,
    Medium,
    High,
}

pub type Risk = Effort;

/// A concrete, rated recommendation derived from a detection.
#[derive(Debug, Clone, Serialize)]
pub struct OptimizationOpportunity {
    pub id: Uuid,
    pub kind: OpportunityKind,
    pub description: String,
    /// Estimated fractional improvement, 0.0..=1.0
    pub estimated_benefit: f64,
    pub effort: Effort,
    pub risk: Risk,
    pub created_at: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
}

impl OptimizationOpportunity {
    pub fn new(
        kind: OpportunityKind,
        description: impl Into<String>,
        estimated_benefit: f64,
        effort: Effort,
        risk: Risk,
        valid_until: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            description: description.into(),
            estimated_benefit: estimated_benefit.clamp(0.0, 1.0),
            effort,
            risk,
            created_at: Utc::now(),
            valid_until,
        }
    }

    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        now > self.valid_until
    }
}

/// One full analysis pass over the cache.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub generated_at: DateTime<Utc>,
    pub bottlenecks: Vec<PerformanceBottleneck>,
    pub opportunities: Vec<OptimizationOpportunity>,
    pub metrics: CacheMetrics,
    /// 0.0 (failing) ..= 1.0 (healthy)
    pub health_score: f64,
}

impl AnalysisReport {
    /// Fold cache and optimizer metrics plus active detections into a
    /// single health score. Critical findings weigh twice as much as
    /// warnings; a healthy hit rate and effective compression pull the
    /// score back up.
    pub fn health_score(
        metrics: &CacheMetrics,
        bottlenecks: &[PerformanceBottleneck],
        optimizer: Option<&OptimizerMetrics>,
    ) -> f64 {
        let mut score = 0.5 + metrics.overall_hit_rate * 0.5;

        for bottleneck in bottlenecks {
            score -= match bottleneck.severity() {
                Severity::Info => 0.02,
                Severity::Warning => 0.1,
                Severity::Critical => 0.2,
            };
        }

        if let Some(optimizer) = optimizer {
            if optimizer.bytes_saved > 0 {
                score += 0.05;
            }
            if optimizer.pool.exhausted > 0 {
                score -= 0.1;
            }
            if let Some(batcher) = &optimizer.batcher {
                if batcher.requests_timed_out > batcher.requests_batched / 10 {
                    score -= 0.1;
                }
            }
        }

        score.clamp(0.0, 1.0)
    }

    pub fn worst_severity(&self) -> Option<Severity> {
        self.bottlenecks.iter().map(|b| b.severity()).max()
    }
}
