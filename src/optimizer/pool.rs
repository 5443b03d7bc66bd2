//! Connection pooling for backend endpoints.
//!
//! Connections are pooled per (host, port) endpoint. An acquire reuses an
//! idle connection when one exists, opens a new one while the endpoint is
//! under its cap, and otherwise waits a bounded time for a release before
//! failing with [`Error::PoolExhausted`]. A background reaper closes
//! connections that sit idle too long or exceed the idle watermark.
//!
//! The pool manages connection lifecycle and identity; the transport
//! behind a handle belongs to the tier backend using it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Pool limits and reaping cadence.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Cap on live connections per endpoint
    pub max_connections: usize,
    /// Longest an acquire waits for a release before failing
    pub acquire_timeout: Duration,
    /// Idle connections older than this are reaped
    pub idle_timeout: Duration,
    /// Idle connections kept per endpoint; the surplus is reaped
    pub max_idle: usize,
    /// Reaper cadence
    pub reap_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            acquire_timeout: Duration::from_secs(2),
            idle_timeout: Duration::from_secs(60),
            max_idle: 5,
            reap_interval: Duration::from_secs(30),
        }
    }
}

/// A pooled connection handle.
#[derive(Debug, Clone)]
pub struct PooledConnection {
    pub id: Uuid,
    pub host: String,
    pub port: u16,
    created_at: Instant,
    last_used: Instant,
    uses: u64,
}

impl PooledConnection {
    fn new(host: &str, port: u16) -> Self {
        let now = Instant::now();
        Self {
            id: Uuid::new_v4(),
            host: host.to_string(),
            port,
            created_at: now,
            last_used: now,
            uses: 0,
        }
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn idle_for(&self) -> Duration {
        self.last_used.elapsed()
    }

    pub fn uses(&self) -> u64 {
        self.uses
    }
}

#[derive(Default)]
struct Slots {
    idle: VecDeque<PooledConnection>,
    in_use: usize,
}

struct Endpoint {
    slots: Mutex<Slots>,
    released: Notify,
}

impl Endpoint {
    fn new() -> Self {
        Self {
            slots: Mutex::new(Slots::default()),
            released: Notify::new(),
        }
    }
}

#[derive(Debug, Default)]
struct PoolCounters {
    created: AtomicU64,
    reused: AtomicU64,
    reaped: AtomicU64,
    exhausted: AtomicU64,
}

/// Snapshot of pool state and counters.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub endpoints: usize,
    pub idle: usize,
    pub in_use: usize,
    pub created: u64,
    pub reused: u64,
    pub reaped: u64,
    pub exhausted: u64,
}

/// Per-endpoint connection pool.
pub struct ConnectionPool {
    config: PoolConfig,
    endpoints: Arc<DashMap<(String, u16), Arc<Endpoint>>>,
    counters: Arc<PoolCounters>,
    token: CancellationToken,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionPool {
    /// Create a pool. No task is spawned here, so construction works
    /// outside a runtime; the idle reaper starts on the first acquire.
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            endpoints: Arc::new(DashMap::new()),
            counters: Arc::new(PoolCounters::default()),
            token: CancellationToken::new(),
            reaper: Mutex::new(None),
        }
    }

    fn ensure_reaper(&self) {
        let mut reaper = self.reaper.lock();
        if reaper.is_some() || self.token.is_cancelled() {
            return;
        }

        let endpoints = Arc::clone(&self.endpoints);
        let counters = Arc::clone(&self.counters);
        let token = self.token.clone();
        let idle_timeout = self.config.idle_timeout;
        let max_idle = self.config.max_idle;
        let interval = self.config.reap_interval;
        *reaper = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        Self::reap(&endpoints, &counters, idle_timeout, max_idle);
                    }
                }
            }
            debug!("pool reaper stopped");
        }));
    }

    fn endpoint(&self, host: &str, port: u16) -> Arc<Endpoint> {
        self.endpoints
            .entry((host.to_string(), port))
            .or_insert_with(|| Arc::new(Endpoint::new()))
            .clone()
    }

    /// Acquire a connection to the endpoint. Reuses an idle connection,
    /// opens a new one under the cap, or waits up to `acquire_timeout` for
    /// a release. Exhaustion is an error naming the endpoint and its cap.
    pub async fn acquire(&self, host: &str, port: u16) -> Result<PoolGuard> {
        self.ensure_reaper();
        let endpoint = self.endpoint(host, port);
        let deadline = Instant::now() + self.config.acquire_timeout;

        loop {
            {
                let mut slots = endpoint.slots.lock();
                if let Some(mut conn) = slots.idle.pop_front() {
                    conn.last_used = Instant::now();
                    conn.uses += 1;
                    slots.in_use += 1;
                    self.counters.reused.fetch_add(1, Ordering::Relaxed);
                    return Ok(PoolGuard {
                        connection: Some(conn),
                        endpoint: Arc::clone(&endpoint),
                    });
                }
                if slots.in_use + slots.idle.len() < self.config.max_connections {
                    let mut conn = PooledConnection::new(host, port);
                    conn.uses = 1;
                    slots.in_use += 1;
                    self.counters.created.fetch_add(1, Ordering::Relaxed);
                    debug!(host, port, connection = %conn.id, "opened pooled connection");
                    return Ok(PoolGuard {
                        connection: Some(conn),
                        endpoint: Arc::clone(&endpoint),
                    });
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            if tokio::time::timeout(remaining, endpoint.released.notified())
                .await
                .is_err()
            {
                break;
            }
        }

        self.counters.exhausted.fetch_add(1, Ordering::Relaxed);
        Err(Error::PoolExhausted {
            host: host.to_string(),
            port,
            max_connections: self.config.max_connections,
        })
    }

    fn reap(
        endpoints: &DashMap<(String, u16), Arc<Endpoint>>,
        counters: &PoolCounters,
        idle_timeout: Duration,
        max_idle: usize,
    ) {
        for entry in endpoints.iter() {
            let mut slots = entry.value().slots.lock();
            let before = slots.idle.len();

            slots.idle.retain(|conn| conn.idle_for() < idle_timeout);
            while slots.idle.len() > max_idle {
                // Oldest idle first
                slots.idle.pop_back();
            }

            let reaped = before - slots.idle.len();
            if reaped > 0 {
                counters.reaped.fetch_add(reaped as u64, Ordering::Relaxed);
                debug!(
                    host = %entry.key().0,
                    port = entry.key().1,
                    reaped,
                    "reaped idle connections"
                );
            }
        }
    }

    /// Run one reap pass immediately.
    pub fn reap_now(&self) {
        Self::reap(
            &self.endpoints,
            &self.counters,
            self.config.idle_timeout,
            self.config.max_idle,
        );
    }

    /// Snapshot of pool usage.
    pub fn stats(&self) -> PoolStats {
        let mut idle = 0;
        let mut in_use = 0;
        for entry in self.endpoints.iter() {
            let slots = entry.value().slots.lock();
            idle += slots.idle.len();
            in_use += slots.in_use;
        }
        PoolStats {
            endpoints: self.endpoints.len(),
            idle,
            in_use,
            created: self.counters.created.load(Ordering::Relaxed),
            reused: self.counters.reused.load(Ordering::Relaxed),
            reaped: self.counters.reaped.load(Ordering::Relaxed),
            exhausted: self.counters.exhausted.load(Ordering::Relaxed),
        }
    }

    /// Stop the reaper and drop all idle connections.
    pub async fn shutdown(&self) {
        self.token.cancel();
        let reaper = self.reaper.lock().take();
        if let Some(reaper) = reaper {
            let _ = reaper.await;
        }
        for entry in self.endpoints.iter() {
            entry.value().slots.lock().idle.clear();
        }
        info!("connection pool shut down");
    }
}

/// RAII guard over a pooled connection; dropping it returns the connection
/// to the pool.
pub struct PoolGuard {
    connection: Option<PooledConnection>,
    endpoint: Arc<Endpoint>,
}

impl PoolGuard {
    pub fn connection(&self) -> &PooledConnection {
        // Invariant: `connection` is only None after drop
        self.connection
            .as_ref()
            .unwrap_or_else(|| unreachable!("guard accessed after drop"))
    }

    /// Discard the connection instead of returning it, e.g. after a
    /// transport error.
    pub fn discard(mut self) {
        self.connection = None;
        let mut slots = self.endpoint.slots.lock();
        slots.in_use = slots.in_use.saturating_sub(1);
        drop(slots);
        self.endpoint.released.notify_one();
    }
}

impl std::fmt::Debug for PoolGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolGuard")
            .field("connection", &self.connection)
            .finish_non_exhaustive()
    }
}

impl Drop for PoolGuard {
    fn drop(&mut self) {
        if let Some(mut conn) = self.connection.take() {
            conn.last_used = Instant::now();
            let mut slots = self.endpoint.slots.lock();
            slots.in_use = slots.in_use.saturating_sub(1);
            slots.idle.push_front(conn);
            drop(slots);
            self.endpoint.released.notify_one();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn quick_config() -> PoolConfig {
        PoolConfig {
            max_connections: 2,
            acquire_timeout: Duration::from_millis(30),
            idle_timeout: Duration::from_millis(50),
            max_idle: 2,
            reap_interval: Duration::from_secs(300),
        }
    }

    #[test]
    fn test_construction_needs_no_runtime() {
        let pool = ConnectionPool::new(quick_config());
        let stats = pool.stats();
        assert_eq!(stats.endpoints, 0);
        assert_eq!(stats.created, 0);
    }

    #[tokio::test]
    async fn test_acquire_reuses_idle_connection() {
        let pool = ConnectionPool::new(quick_config());

        let first_id = {
            let guard = pool.acquire("cache-a", 6379).await.unwrap();
            guard.connection().id
        };
        let guard = pool.acquire("cache-a", 6379).await.unwrap();
        assert_eq!(guard.connection().id, first_id);
        assert_eq!(guard.connection().uses(), 2);

        let stats = pool.stats();
        assert_eq!(stats.created, 1);
        assert_eq!(stats.reused, 1);

        drop(guard);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_endpoints_are_partitioned() {
        let pool = ConnectionPool::new(quick_config());

        let a = pool.acquire("cache-a", 6379).await.unwrap();
        let b = pool.acquire("cache-b", 6379).await.unwrap();
        assert_ne!(a.connection().id, b.connection().id);
        assert_eq!(pool.stats().endpoints, 2);

        drop((a, b));
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_exhaustion_after_bounded_wait() {
        let pool = ConnectionPool::new(quick_config());

        let _a = pool.acquire("cache-a", 6379).await.unwrap();
        let _b = pool.acquire("cache-a", 6379).await.unwrap();

        let started = Instant::now();
        let err = pool.acquire("cache-a", 6379).await.unwrap_err();
        assert!(started.elapsed() >= Duration::from_millis(25));
        assert_matches!(
            err,
            Error::PoolExhausted {
                ref host,
                port: 6379,
                max_connections: 2,
            } if host == "cache-a"
        );
        assert_eq!(pool.stats().exhausted, 1);

        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_release_unblocks_waiter() {
        let pool = Arc::new(ConnectionPool::new(PoolConfig {
            max_connections: 1,
            acquire_timeout: Duration::from_millis(500),
            ..quick_config()
        }));

        let guard = pool.acquire("cache-a", 6379).await.unwrap();
        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.acquire("cache-a", 6379).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(guard);

        assert!(waiter.await.unwrap().is_ok());
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_reaper_drops_stale_idle() {
        let pool = ConnectionPool::new(quick_config());

        drop(pool.acquire("cache-a", 6379).await.unwrap());
        assert_eq!(pool.stats().idle, 1);

        tokio::time::sleep(Duration::from_millis(80)).await;
        pool.reap_now();

        let stats = pool.stats();
        assert_eq!(stats.idle, 0);
        assert_eq!(stats.reaped, 1);

        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_discard_does_not_return_connection() {
        let pool = ConnectionPool::new(quick_config());

        let guard = pool.acquire("cache-a", 6379).await.unwrap();
        let first_id = guard.connection().id;
        guard.discard();

        assert_eq!(pool.stats().idle, 0);

        // Next acquire opens a fresh connection
        let guard = pool.acquire("cache-a", 6379).await.unwrap();
        assert_ne!(guard.connection().id, first_id);

        drop(guard);
        pool.shutdown().await;
    }
}
