//! Priority request batching.
//!
//! Callers submit individual requests; the batcher coalesces them into
//! batches bounded by entry count, byte size, and a maximum wait window,
//! then hands each batch to a [`BatchProcessor`]. Higher-priority requests
//! drain first within a batch. Each submission carries its own timeout and
//! resolves to [`BatchOutcome::TimedOut`] when the deadline passes before
//! the batch completes; a timeout is a per-request outcome, not an error,
//! and never aborts the batch for its peers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// Request priority. Higher priorities drain first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Normal,
    Low,
}

impl Priority {
    const ALL: [Priority; 3] = [Priority::High, Priority::Normal, Priority::Low];

    fn index(self) -> usize {
        match self {
            Priority::High => 0,
            Priority::Normal => 1,
            Priority::Low => 2,
        }
    }
}

/// Batch formation limits.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Entry-count trigger
    pub max_batch_size: usize,
    /// Payload-byte trigger
    pub max_batch_bytes: u64,
    /// Longest a pending request waits before a partial batch is flushed
    pub max_wait: Duration,
    /// Timeout applied when a submission does not name one
    pub default_request_timeout: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 32,
            max_batch_bytes: 256 * 1024,
            max_wait: Duration::from_millis(10),
            default_request_timeout: Duration::from_secs(5),
        }
    }
}

/// One request inside a formed batch.
#[derive(Debug)]
pub struct BatchRequest {
    pub id: Uuid,
    pub key: String,
    pub payload: Bytes,
    pub priority: Priority,
}

/// Per-request resolution.
#[derive(Debug)]
pub enum BatchOutcome {
    Completed(Bytes),
    Failed(String),
    TimedOut,
}

/// Processes a formed batch. Must return one response per request, in
/// request order.
#[async_trait]
pub trait BatchProcessor: Send + Sync + 'static {
    async fn process(&self, requests: &[BatchRequest]) -> Vec<Result<Bytes, String>>;
}

struct Pending {
    request: BatchRequest,
    done: oneshot::Sender<BatchOutcome>,
}

/// Counters for batcher observability.
#[derive(Debug, Default)]
pub struct BatcherCounters {
    pub batches_formed: AtomicU64,
    pub requests_batched: AtomicU64,
    pub requests_timed_out: AtomicU64,
}

/// Snapshot of [`BatcherCounters`].
#[derive(Debug, Clone, Serialize)]
pub struct BatcherStats {
    pub batches_formed: u64,
    pub requests_batched: u64,
    pub requests_timed_out: u64,
    pub queued: usize,
    /// Mean requests per formed batch
    pub mean_batch_size: f64,
}

struct Queues {
    by_priority: [Mutex<VecDeque<Pending>>; 3],
    queued_bytes: AtomicU64,
    notify: Notify,
}

impl Queues {
    fn new() -> Self {
        Self {
            by_priority: [
                Mutex::new(VecDeque::new()),
                Mutex::new(VecDeque::new()),
                Mutex::new(VecDeque::new()),
            ],
            queued_bytes: AtomicU64::new(0),
            notify: Notify::new(),
        }
    }

    fn push(&self, pending: Pending) {
        self.queued_bytes
            .fetch_add(pending.request.payload.len() as u64, Ordering::Relaxed);
        self.by_priority[pending.request.priority.index()]
            .lock()
            .push_back(pending);
        self.notify.notify_one();
    }

    fn queued(&self) -> usize {
        self.by_priority.iter().map(|q| q.lock().len()).sum()
    }

    fn is_full_batch(&self, config: &BatchConfig) -> bool {
        self.queued() >= config.max_batch_size
            || self.queued_bytes.load(Ordering::Relaxed) >= config.max_batch_bytes
    }

    /// Drain up to the configured limits, highest priority first.
    fn drain_batch(&self, config: &BatchConfig) -> Vec<Pending> {
        let mut batch = Vec::new();
        let mut bytes = 0u64;

        'outer: for priority in Priority::ALL {
            let mut queue = self.by_priority[priority.index()].lock();
            while let Some(front) = queue.front() {
                let size = front.request.payload.len() as u64;
                if !batch.is_empty()
                    && (batch.len() >= config.max_batch_size
                        || bytes + size > config.max_batch_bytes)
                {
                    break 'outer;
                }
                let pending = match queue.pop_front() {
                    Some(p) => p,
                    None => break,
                };
                bytes += size;
                self.queued_bytes.fetch_sub(size, Ordering::Relaxed);
                batch.push(pending);
                if batch.len() >= config.max_batch_size {
                    break 'outer;
                }
            }
        }
        batch
    }
}

/// Coalesces submitted requests into priority-ordered batches.
pub struct RequestBatcher {
    config: BatchConfig,
    queues: Arc<Queues>,
    counters: Arc<BatcherCounters>,
    processor: Arc<dyn BatchProcessor>,
    token: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl RequestBatcher {
    /// Create a batcher. No task is spawned here, so construction works
    /// outside a runtime; the drain task starts on the first submit.
    pub fn new(config: BatchConfig, processor: Arc<dyn BatchProcessor>) -> Self {
        Self {
            config,
            queues: Arc::new(Queues::new()),
            counters: Arc::new(BatcherCounters::default()),
            processor,
            token: CancellationToken::new(),
            worker: Mutex::new(None),
        }
    }

    fn ensure_worker(&self) {
        let mut worker = self.worker.lock();
        if worker.is_some() || self.token.is_cancelled() {
            return;
        }
        *worker = Some(tokio::spawn(Self::drain_loop(
            self.config.clone(),
            Arc::clone(&self.queues),
            Arc::clone(&self.counters),
            Arc::clone(&self.processor),
            self.token.clone(),
        )));
    }

    /// Submit a request and wait for its batch to complete. The timeout
    /// bounds only this caller's wait; the batch itself continues.
    pub async fn submit(
        &self,
        key: impl Into<String>,
        payload: Bytes,
        priority: Priority,
        timeout: Option<Duration>,
    ) -> BatchOutcome {
        if self.token.is_cancelled() {
            return BatchOutcome::Failed("batcher is shut down".to_string());
        }
        self.ensure_worker();

        let (tx, rx) = oneshot::channel();
        self.queues.push(Pending {
            request: BatchRequest {
                id: Uuid::new_v4(),
                key: key.into(),
                payload,
                priority,
            },
            done: tx,
        });

        let wait = timeout.unwrap_or(self.config.default_request_timeout);
        match tokio::time::timeout(wait, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => BatchOutcome::Failed("batch worker dropped the request".to_string()),
            Err(_) => {
                self.counters.requests_timed_out.fetch_add(1, Ordering::Relaxed);
                BatchOutcome::TimedOut
            }
        }
    }

    async fn drain_loop(
        config: BatchConfig,
        queues: Arc<Queues>,
        counters: Arc<BatcherCounters>,
        processor: Arc<dyn BatchProcessor>,
        token: CancellationToken,
    ) {
        loop {
            if queues.queued() == 0 {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = queues.notify.notified() => {}
                }
            }

            // Batch window: wait for the batch to fill, up to max_wait
            let deadline = tokio::time::Instant::now() + config.max_wait;
            while !queues.is_full_batch(&config) {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep_until(deadline) => break,
                    _ = queues.notify.notified() => {}
                }
                if token.is_cancelled() || tokio::time::Instant::now() >= deadline {
                    break;
                }
            }

            Self::flush(&config, &queues, &counters, processor.as_ref()).await;

            if token.is_cancelled() && queues.queued() == 0 {
                break;
            }
        }

        // Graceful drain of anything accepted before shutdown
        while queues.queued() > 0 {
            Self::flush(&config, &queues, &counters, processor.as_ref()).await;
        }
        debug!("batch drain task stopped");
    }

    async fn flush(
        config: &BatchConfig,
        queues: &Queues,
        counters: &BatcherCounters,
        processor: &dyn BatchProcessor,
    ) {
        let batch = queues.drain_batch(config);
        if batch.is_empty() {
            return;
        }

        counters.batches_formed.fetch_add(1, Ordering::Relaxed);
        counters
            .requests_batched
            .fetch_add(batch.len() as u64, Ordering::Relaxed);

        let requests: Vec<BatchRequest> = batch.iter().map(|p| clone_request(&p.request)).collect();
        let mut responses = processor.process(&requests).await;

        if responses.len() != batch.len() {
            warn!(
                expected = batch.len(),
                got = responses.len(),
                "batch processor returned wrong response count"
            );
            responses.resize_with(batch.len(), || {
                Err("batch processor returned no response".to_string())
            });
        }

        for (pending, response) in batch.into_iter().zip(responses) {
            let outcome = match response {
                Ok(data) => BatchOutcome::Completed(data),
                Err(reason) => BatchOutcome::Failed(reason),
            };
            // The caller may have timed out and dropped its receiver
            let _ = pending.done.send(outcome);
        }
    }

    /// Counter snapshot plus current queue depth.
    pub fn stats(&self) -> BatcherStats {
        let batches = self.counters.batches_formed.load(Ordering::Relaxed);
        let requests = self.counters.requests_batched.load(Ordering::Relaxed);
        BatcherStats {
            batches_formed: batches,
            requests_batched: requests,
            requests_timed_out: self.counters.requests_timed_out.load(Ordering::Relaxed),
            queued: self.queues.queued(),
            mean_batch_size: if batches == 0 {
                0.0
            } else {
                requests as f64 / batches as f64
            },
        }
    }

    /// Stop the drain task after flushing accepted requests.
    pub async fn shutdown(&self) {
        self.token.cancel();
        self.queues.notify.notify_one();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }
    }
}

fn clone_request(request: &BatchRequest) -> BatchRequest {
    BatchRequest {
        id: request.id,
        key: request.key.clone(),
        payload: request.payload.clone(),
        priority: request.priority,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Echoes each payload back, optionally after a delay.
    struct EchoProcessor {
        delay: Duration,
    }

    #[async_trait]
    impl BatchProcessor for EchoProcessor {
        async fn process(&self, requests: &[BatchRequest]) -> Vec<Result<Bytes, String>> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            requests.iter().map(|r| Ok(r.payload.clone())).collect()
        }
    }

    /// Records the priority order in which requests arrive.
    struct OrderRecorder {
        seen: Mutex<Vec<Priority>>,
    }

    #[async_trait]
    impl BatchProcessor for OrderRecorder {
        async fn process(&self, requests: &[BatchRequest]) -> Vec<Result<Bytes, String>> {
            let mut seen = self.seen.lock();
            seen.extend(requests.iter().map(|r| r.priority));
            requests.iter().map(|r| Ok(r.payload.clone())).collect()
        }
    }

    #[test]
    fn test_construction_needs_no_runtime() {
        let batcher = RequestBatcher::new(
            BatchConfig::default(),
            Arc::new(EchoProcessor {
                delay: Duration::ZERO,
            }),
        );
        assert_eq!(batcher.stats().queued, 0);
    }

    #[tokio::test]
    async fn test_submit_completes() {
        let batcher = RequestBatcher::new(
            BatchConfig::default(),
            Arc::new(EchoProcessor {
                delay: Duration::ZERO,
            }),
        );

        let outcome = batcher
            .submit("k", Bytes::from_static(b"payload"), Priority::Normal, None)
            .await;
        assert!(matches!(
            outcome,
            BatchOutcome::Completed(data) if data == Bytes::from_static(b"payload")
        ));

        batcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_per_request_timeout_is_a_value() {
        let batcher = RequestBatcher::new(
            BatchConfig::default(),
            Arc::new(EchoProcessor {
                delay: Duration::from_millis(200),
            }),
        );

        let outcome = batcher
            .submit(
                "slow",
                Bytes::from_static(b"x"),
                Priority::Normal,
                Some(Duration::from_millis(20)),
            )
            .await;
        assert!(matches!(outcome, BatchOutcome::TimedOut));
        assert_eq!(batcher.stats().requests_timed_out, 1);

        batcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_timeout_does_not_abort_peers() {
        let batcher = Arc::new(RequestBatcher::new(
            BatchConfig {
                max_wait: Duration::from_millis(30),
                ..Default::default()
            },
            Arc::new(EchoProcessor {
                delay: Duration::from_millis(60),
            }),
        ));

        let impatient = {
            let batcher = Arc::clone(&batcher);
            tokio::spawn(async move {
                batcher
                    .submit(
                        "a",
                        Bytes::from_static(b"a"),
                        Priority::Normal,
                        Some(Duration::from_millis(10)),
                    )
                    .await
            })
        };
        let patient = {
            let batcher = Arc::clone(&batcher);
            tokio::spawn(async move {
                batcher
                    .submit("b", Bytes::from_static(b"b"), Priority::Normal, None)
                    .await
            })
        };

        assert!(matches!(impatient.await.unwrap(), BatchOutcome::TimedOut));
        assert!(matches!(patient.await.unwrap(), BatchOutcome::Completed(_)));

        batcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_high_priority_drains_first() {
        let recorder = Arc::new(OrderRecorder {
            seen: Mutex::new(Vec::new()),
        });
        let batcher = Arc::new(RequestBatcher::new(
            BatchConfig {
                max_wait: Duration::from_millis(40),
                ..Default::default()
            },
            recorder.clone(),
        ));

        let mut handles = Vec::new();
        for priority in [Priority::Low, Priority::Normal, Priority::High] {
            let batcher = Arc::clone(&batcher);
            handles.push(tokio::spawn(async move {
                batcher
                    .submit("k", Bytes::from_static(b"x"), priority, None)
                    .await
            }));
        }
        for handle in handles {
            assert!(matches!(handle.await.unwrap(), BatchOutcome::Completed(_)));
        }

        let seen = recorder.seen.lock().clone();
        assert_eq!(seen, vec![Priority::High, Priority::Normal, Priority::Low]);

        batcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_size_trigger_flushes_before_window() {
        let batcher = Arc::new(RequestBatcher::new(
            BatchConfig {
                max_batch_size: 2,
                max_wait: Duration::from_secs(10),
                ..Default::default()
            },
            Arc::new(EchoProcessor {
                delay: Duration::ZERO,
            }),
        ));

        let a = {
            let batcher = Arc::clone(&batcher);
            tokio::spawn(async move {
                batcher
                    .submit("a", Bytes::from_static(b"1"), Priority::Normal, None)
                    .await
            })
        };
        let b = {
            let batcher = Arc::clone(&batcher);
            tokio::spawn(async move {
                batcher
                    .submit("b", Bytes::from_static(b"2"), Priority::Normal, None)
                    .await
            })
        };

        // Both resolve well inside the 10s window because the count trigger
        // fires at two entries
        let joined = tokio::time::timeout(Duration::from_secs(1), async {
            (a.await.unwrap(), b.await.unwrap())
        })
        .await
        .unwrap();
        assert!(matches!(joined.0, BatchOutcome::Completed(_)));
        assert!(matches!(joined.1, BatchOutcome::Completed(_)));

        assert_eq!(batcher.stats().batches_formed, 1);
        assert_eq!(batcher.stats().requests_batched, 2);

        batcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_flushes_pending() {
        let batcher = Arc::new(RequestBatcher::new(
            BatchConfig {
                max_wait: Duration::from_secs(10),
                max_batch_size: 100,
                ..Default::default()
            },
            Arc::new(EchoProcessor {
                delay: Duration::ZERO,
            }),
        ));

        let pending = {
            let batcher = Arc::clone(&batcher);
            tokio::spawn(async move {
                batcher
                    .submit("k", Bytes::from_static(b"x"), Priority::Normal, None)
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        batcher.shutdown().await;

        assert!(matches!(pending.await.unwrap(), BatchOutcome::Completed(_)));

        // Submissions after shutdown fail fast
        let outcome = batcher
            .submit("late", Bytes::from_static(b"x"), Priority::Normal, None)
            .await;
        assert!(matches!(outcome, BatchOutcome::Failed(_)));
    }
}
