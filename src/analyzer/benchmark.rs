//! On-demand cache benchmarks.
//!
//! A benchmark drives the live cache with a configurable read/write mix for
//! a fixed wall-clock duration, then aggregates throughput and latency
//! percentiles. Runs are abortable; an aborted run still reports the
//! partial results it gathered. Completed runs are kept under their name
//! for later comparison.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cache::events::CacheEvent;
use crate::cache::service::{GetOptions, IntelligentCache, SetOptions};
use crate::error::{Error, Result};

/// Read/write mix of a benchmark run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Mixed,
    ReadHeavy,
    WriteHeavy,
}

impl OperationType {
    /// Fraction of operations that are reads.
    pub fn read_fraction(&self) -> f64 {
        match self {
            OperationType::Mixed => 0.5,
            OperationType::ReadHeavy => 0.9,
            OperationType::WriteHeavy => 0.1,
        }
    }
}

/// Benchmark parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkSpec {
    /// Name the result is stored under
    pub name: String,
    pub operation_type: OperationType,
    /// Size of the generated key space
    pub key_count: usize,
    /// Payload size for writes, in bytes
    pub value_size: usize,
    /// Wall-clock run length
    pub duration: Duration,
    /// Number of concurrent workers
    pub concurrency: usize,
}

impl BenchmarkSpec {
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::Config("benchmark name must not be empty".into()));
        }
        if self.key_count == 0 {
            return Err(Error::Config("benchmark key_count must be > 0".into()));
        }
        if self.concurrency == 0 {
            return Err(Error::Config("benchmark concurrency must be > 0".into()));
        }
        if self.duration.is_zero() {
            return Err(Error::Config("benchmark duration must be > 0".into()));
        }
        Ok(())
    }
}

/// Aggregated outcome of one run.
#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkResult {
    pub name: String,
    pub operation_type: OperationType,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub total_ops: u64,
    pub ops_per_sec: f64,
    pub mean_latency_us: f64,
    pub p95_latency_us: u64,
    pub p99_latency_us: u64,
    pub hit_rate: f64,
    pub errors: u64,
    /// Whether the run was cut short; counts above cover only the portion
    /// that ran
    pub aborted: bool,
}

/// Percentage deltas between two named runs, positive meaning the
/// candidate is higher.
#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkComparison {
    pub baseline: String,
    pub candidate: String,
    pub ops_per_sec_pct: f64,
    pub mean_latency_pct: f64,
    pub p95_latency_pct: f64,
    pub p99_latency_pct: f64,
    pub hit_rate_pct: f64,
}

fn pct_delta(baseline: f64, candidate: f64) -> f64 {
    if baseline == 0.0 {
        0.0
    } else {
        (candidate - baseline) / baseline * 100.0
    }
}

#[derive(Default)]
struct WorkerSample {
    latencies_us: Vec<u64>,
    hits: u64,
    reads: u64,
    errors: u64,
    ops: u64,
}

/// Runs benchmarks against a cache and retains named results.
pub struct BenchmarkRunner {
    cache: Arc<IntelligentCache>,
    results: DashMap<String, BenchmarkResult>,
    current: Mutex<Option<CancellationToken>>,
}

impl BenchmarkRunner {
    pub fn new(cache: Arc<IntelligentCache>) -> Self {
        Self {
            cache,
            results: DashMap::new(),
            current: Mutex::new(None),
        }
    }

    /// Run a benchmark to completion (or abort) and store the result under
    /// its name. Only one run at a time.
    pub async fn run(&self, spec: BenchmarkSpec) -> Result<BenchmarkResult> {
        spec.validate()?;

        let token = CancellationToken::new();
        {
            let mut current = self.current.lock();
            if current.is_some() {
                return Err(Error::BenchmarkAborted {
                    name: spec.name.clone(),
                    reason: "another benchmark is already running".into(),
                });
            }
            *current = Some(token.clone());
        }

        info!(name = %spec.name, ?spec.operation_type, "benchmark starting");
        self.cache.events().publish(CacheEvent::BenchmarkStarted {
            name: spec.name.clone(),
            timestamp: Utc::now(),
        });

        let result = self.drive(&spec, &token).await;
        *self.current.lock() = None;

        self.cache.events().publish(CacheEvent::BenchmarkCompleted {
            name: spec.name.clone(),
            aborted: result.aborted,
            timestamp: Utc::now(),
        });
        self.results.insert(spec.name.clone(), result.clone());
        info!(
            name = %spec.name,
            ops_per_sec = result.ops_per_sec,
            p99_us = result.p99_latency_us,
            aborted = result.aborted,
            "benchmark finished"
        );
        Ok(result)
    }

    /// Abort the in-flight run, if any. The run still reports partial
    /// results.
    pub fn abort(&self) {
        if let Some(token) = self.current.lock().as_ref() {
            token.cancel();
        }
    }

    async fn drive(&self, spec: &BenchmarkSpec, token: &CancellationToken) -> BenchmarkResult {
        let started_at = Utc::now();
        let payload = Bytes::from(vec![0x5a; spec.value_size]);

        // Seed the key space so reads can hit from the first tick
        for i in 0..spec.key_count {
            if token.is_cancelled() {
                break;
            }
            let key = format!("bench:{}:{i}", spec.name);
            if !self.cache.set(&key, payload.clone(), SetOptions::default()).await {
                warn!(key, "benchmark seed write failed");
            }
            // Memory-tier writes complete without yielding; give abort a
            // chance to run.
            tokio::task::yield_now().await;
        }

        let clock = Instant::now();
        let deadline = clock + spec.duration;
        let mut workers = Vec::with_capacity(spec.concurrency);
        for worker in 0..spec.concurrency {
            let cache = Arc::clone(&self.cache);
            let token = token.clone();
            let payload = payload.clone();
            let name = spec.name.clone();
            let key_count = spec.key_count;
            let read_fraction = spec.operation_type.read_fraction();
            workers.push(tokio::spawn(async move {
                let mut rng = SmallRng::seed_from_u64(
                    (worker as u64).wrapping_mul(0x9e3779b97f4a7c15) ^ key_count as u64,
                );
                let mut sample = WorkerSample::default();

                while Instant::now() < deadline && !token.is_cancelled() {
                    let key = format!("bench:{name}:{}", rng.gen_range(0..key_count));
                    let op_start = Instant::now();

                    if rng.gen::<f64>() < read_fraction {
                        sample.reads += 1;
                        if cache.get(&key, GetOptions::default()).await.is_some() {
                            sample.hits += 1;
                        }
                    } else if !cache.set(&key, payload.clone(), SetOptions::default()).await {
                        sample.errors += 1;
                    }

                    sample
                        .latencies_us
                        .push(op_start.elapsed().as_micros() as u64);
                    sample.ops += 1;

                    // The memory-tier fast path never hits a pending await,
                    // so yield each iteration or the loop starves the
                    // runtime and cancellation is never observed.
                    tokio::task::yield_now().await;
                }
                sample
            }));
        }

        let mut merged = WorkerSample::default();
        for worker in futures::future::join_all(workers).await {
            match worker {
                Ok(sample) => {
                    merged.latencies_us.extend(sample.latencies_us);
                    merged.hits += sample.hits;
                    merged.reads += sample.reads;
                    merged.errors += sample.errors;
                    merged.ops += sample.ops;
                }
                Err(e) => {
                    warn!(error = %e, "benchmark worker panicked");
                    merged.errors += 1;
                }
            }
        }

        let elapsed = clock.elapsed();
        merged.latencies_us.sort_unstable();
        let percentile = |p: f64| -> u64 {
            if merged.latencies_us.is_empty() {
                return 0;
            }
            let idx = ((merged.latencies_us.len() as f64 * p).ceil() as usize)
                .saturating_sub(1)
                .min(merged.latencies_us.len() - 1);
            merged.latencies_us[idx]
        };

        BenchmarkResult {
            name: spec.name.clone(),
            operation_type: spec.operation_type,
            started_at,
            elapsed,
            total_ops: merged.ops,
            ops_per_sec: if elapsed.as_secs_f64() > 0.0 {
                merged.ops as f64 / elapsed.as_secs_f64()
            } else {
                0.0
            },
            mean_latency_us: if merged.latencies_us.is_empty() {
                0.0
            } else {
                merged.latencies_us.iter().sum::<u64>() as f64 / merged.latencies_us.len() as f64
            },
            p95_latency_us: percentile(0.95),
            p99_latency_us: percentile(0.99),
            hit_rate: if merged.reads == 0 {
                0.0
            } else {
                merged.hits as f64 / merged.reads as f64
            },
            errors: merged.errors,
            aborted: token.is_cancelled(),
        }
    }

    /// Stored result by name.
    pub fn result(&self, name: &str) -> Option<BenchmarkResult> {
        self.results.get(name).map(|r| r.clone())
    }

    /// All stored results.
    pub fn results(&self) -> Vec<BenchmarkResult> {
        self.results.iter().map(|r| r.clone()).collect()
    }

    /// Percentage deltas between two stored runs.
    pub fn compare(&self, baseline: &str, candidate: &str) -> Result<BenchmarkComparison> {
        let base = self
            .result(baseline)
            .ok_or_else(|| Error::BenchmarkNotFound(baseline.to_string()))?;
        let cand = self
            .result(candidate)
            .ok_or_else(|| Error::BenchmarkNotFound(candidate.to_string()))?;

        Ok(BenchmarkComparison {
            baseline: base.name.clone(),
            candidate: cand.name.clone(),
            ops_per_sec_pct: pct_delta(base.ops_per_sec, cand.ops_per_sec),
            mean_latency_pct: pct_delta(base.mean_latency_us, cand.mean_latency_us),
            p95_latency_pct: pct_delta(base.p95_latency_us as f64, cand.p95_latency_us as f64),
            p99_latency_pct: pct_delta(base.p99_latency_us as f64, cand.p99_latency_us as f64),
            hit_rate_pct: pct_delta(base.hit_rate, cand.hit_rate),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheOptions;
    use assert_matches::assert_matches;

    fn runner() -> BenchmarkRunner {
        let cache = Arc::new(IntelligentCache::new(CacheOptions::default()).unwrap());
        BenchmarkRunner::new(cache)
    }

    fn quick_spec(name: &str) -> BenchmarkSpec {
        BenchmarkSpec {
            name: name.to_string(),
            operation_type: OperationType::Mixed,
            key_count: 32,
            value_size: 128,
            duration: Duration::from_millis(100),
            concurrency: 2,
        }
    }

    #[tokio::test]
    async fn test_run_produces_result() {
        let runner = runner();
        let result = runner.run(quick_spec("smoke")).await.unwrap();

        assert!(result.total_ops > 0);
        assert!(result.ops_per_sec > 0.0);
        assert!(result.p99_latency_us >= result.p95_latency_us);
        assert!(!result.aborted);
        assert_eq!(result.errors, 0);
        // Seeded key space makes reads hit
        assert!(result.hit_rate > 0.5);
        assert!(runner.result("smoke").is_some());
    }

    #[tokio::test]
    async fn test_abort_reports_partial() {
        let runner = Arc::new(runner());
        let mut spec = quick_spec("aborted");
        spec.duration = Duration::from_secs(30);

        let handle = {
            let runner = Arc::clone(&runner);
            tokio::spawn(async move { runner.run(spec).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        runner.abort();

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(result.aborted);
        assert!(result.elapsed < Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_compare_named_results() {
        let runner = runner();
        runner.run(quick_spec("a")).await.unwrap();
        runner.run(quick_spec("b")).await.unwrap();

        let comparison = runner.compare("a", "b").unwrap();
        assert_eq!(comparison.baseline, "a");
        assert_eq!(comparison.candidate, "b");

        let err = runner.compare("a", "missing").unwrap_err();
        assert_matches!(err, Error::BenchmarkNotFound(name) if name == "missing");
    }

    #[tokio::test]
    async fn test_invalid_spec_rejected() {
        let runner = runner();
        let mut spec = quick_spec("bad");
        spec.key_count = 0;
        assert_matches!(runner.run(spec).await.unwrap_err(), Error::Config(_));
    }

    #[test]
    fn test_read_fractions() {
        assert_eq!(OperationType::Mixed.read_fraction(), 0.5);
        assert!(OperationType::ReadHeavy.read_fraction() > 0.8);
        assert!(OperationType::WriteHeavy.read_fraction() < 0.2);
    }
}
