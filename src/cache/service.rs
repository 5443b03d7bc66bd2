//! Intelligent Cache Service
//!
//! Orchestrates get/set/delete across tiers: tier selection on write,
//! fastest-first search and promotion on read, tag-index maintenance on
//! every delete path, and the background TTL sweep.
//!
//! The service is an explicit object constructed once with injected
//! configuration; background tasks are owned by the instance and stopped
//! deterministically via [`IntelligentCache::stop`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::backend::{InMemoryBackend, TierBackend};
use super::entry::CacheEntry;
use super::events::{CacheEvent, EventBus};
use super::eviction::EvictionPolicy;
use super::invalidation::{KeyMatcher, MatchType, TagIndex};
use super::patterns::{CachePattern, CachePatternSet};
use super::selector::{PromotionPolicy, TierSelector};
use super::stats::{CacheMetrics, TierStats};
use super::tier::{Tier, TierLevel};
use crate::config::CacheOptions;
use crate::error::Result;
use crate::optimizer::compression::{CompressionAlgorithm, CompressionManager};

/// Read options.
#[derive(Debug, Clone)]
pub struct GetOptions {
    /// Tier search order; `None` means all enabled tiers, fastest first
    pub levels: Option<Vec<TierLevel>>,
    /// Whether the hit updates the entry's access stats
    pub update_access: bool,
    /// Whether a hot hit in a slower tier is promoted
    pub promote: bool,
}

impl Default for GetOptions {
    fn default() -> Self {
        Self {
            levels: None,
            update_access: true,
            promote: true,
        }
    }
}

/// Write options. Unset fields are resolved against matching pattern rules,
/// then tier defaults.
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    pub ttl: Option<Duration>,
    pub tags: Option<Vec<String>>,
    pub priority: Option<u8>,
    pub compression: Option<bool>,
    /// Explicit tier override; `None` lets the selector decide
    pub levels: Option<Vec<TierLevel>>,
}

/// One entry of a batched write.
#[derive(Debug, Clone)]
pub struct BatchSetEntry {
    pub key: String,
    pub value: Bytes,
    pub options: SetOptions,
}

/// Outcome of [`IntelligentCache::set_batch`]. Entries are applied
/// independently. There is **no atomicity across the batch**; some entries
/// may succeed while others fail.
#[derive(Debug, Default)]
pub struct BatchSetOutcome {
    /// Per-key success, in input order
    pub results: Vec<(String, bool)>,
    /// Details for entries that failed on every tier
    pub errors: Vec<String>,
}

struct BackgroundTasks {
    token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

/// The multi-level cache service.
pub struct IntelligentCache {
    options: CacheOptions,
    tiers: Vec<Tier>,
    tag_index: TagIndex,
    patterns: CachePatternSet,
    selector: TierSelector,
    promotion: PromotionPolicy,
    compression: CompressionManager,
    events: EventBus,
    promotions: AtomicU64,
    tasks: Mutex<Option<BackgroundTasks>>,
}

impl IntelligentCache {
    /// Create a cache with in-memory backends for the distributed and
    /// durable tiers.
    pub fn new(options: CacheOptions) -> Result<Self> {
        Self::with_backends(
            options,
            Arc::new(InMemoryBackend::new()),
            Arc::new(InMemoryBackend::new()),
        )
    }

    /// Create a cache with externally supplied tier backends.
    pub fn with_backends(
        options: CacheOptions,
        distributed: Arc<dyn TierBackend>,
        durable: Arc<dyn TierBackend>,
    ) -> Result<Self> {
        options.validate()?;

        let eviction = EvictionPolicy::default();
        let tiers = vec![
            Tier::memory(
                TierLevel::FastMemory,
                options.fast_memory.clone(),
                eviction.clone(),
            ),
            Tier::backed(
                TierLevel::Distributed,
                options.distributed.clone(),
                eviction.clone(),
                distributed,
            ),
            Tier::backed(TierLevel::Durable, options.durable.clone(), eviction, durable),
        ];

        Ok(Self {
            events: EventBus::new(options.event_capacity),
            options,
            tiers,
            tag_index: TagIndex::new(),
            patterns: CachePatternSet::new(),
            selector: TierSelector::default(),
            promotion: PromotionPolicy::default(),
            compression: CompressionManager::new(),
            promotions: AtomicU64::new(0),
            tasks: Mutex::new(None),
        })
    }

    /// Override the tier selector thresholds.
    pub fn with_selector(mut self, selector: TierSelector) -> Self {
        self.selector = selector;
        self
    }

    /// Override the promotion policy.
    pub fn with_promotion(mut self, promotion: PromotionPolicy) -> Self {
        self.promotion = promotion;
        self
    }

    fn tier(&self, level: TierLevel) -> &Tier {
        match level {
            TierLevel::FastMemory => &self.tiers[0],
            TierLevel::Distributed => &self.tiers[1],
            TierLevel::Durable => &self.tiers[2],
        }
    }

    /// Enabled levels, fastest first.
    pub fn enabled_levels(&self) -> Vec<TierLevel> {
        TierLevel::all()
            .into_iter()
            .filter(|&level| self.tier(level).enabled())
            .collect()
    }

    /// Subscribe to cache events. Delivery is best-effort; lagging
    /// subscribers drop the oldest events.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    pub(crate) fn events(&self) -> &EventBus {
        &self.events
    }

    // =========================================================================
    // Core operations
    // =========================================================================

    /// Read a value. Searches tiers in the caller-specified order (or all
    /// enabled tiers, fastest first), treating the first live copy as
    /// authoritative. A missing key is an empty result, never an error.
    pub async fn get(&self, key: &str, opts: GetOptions) -> Option<Bytes> {
        let searched_all = opts.levels.is_none();
        let order = opts
            .levels
            .clone()
            .unwrap_or_else(|| self.enabled_levels());
        let fastest = self.enabled_levels().first().copied();

        for level in order {
            let tier = self.tier(level);
            if !tier.enabled() {
                continue;
            }

            let entry = match tier.get(key, opts.update_access).await {
                Ok(found) => found,
                Err(e) => {
                    // Backend failure degrades to the remaining tiers
                    warn!(tier = %level, key, error = %e, "tier read failed, degrading");
                    continue;
                }
            };

            if let Some(entry) = entry {
                if opts.promote {
                    if let Some(fastest) = fastest {
                        if level != fastest
                            && self.promotion.should_promote(entry.access_count(), entry.size())
                        {
                            self.promote(key, &entry, fastest).await;
                        }
                    }
                }

                self.events.publish(CacheEvent::Hit {
                    key: key.to_string(),
                    level,
                    timestamp: Utc::now(),
                });

                return self.decode(key, &entry).await;
            }
        }

        if searched_all {
            // The key is live nowhere; drop any stale tag mappings.
            self.tag_index.remove_key(key);
        }
        self.events.publish(CacheEvent::Miss {
            key: key.to_string(),
            timestamp: Utc::now(),
        });
        None
    }

    /// Decompress a stored payload. A corrupt payload is purged and treated
    /// as a miss rather than surfacing an error to the reader.
    async fn decode(&self, key: &str, entry: &CacheEntry) -> Option<Bytes> {
        match entry.metadata.compression {
            CompressionAlgorithm::None => Some(entry.value().clone()),
            algorithm => match self.compression.decompress(entry.value(), algorithm) {
                Ok(data) => Some(data),
                Err(e) => {
                    warn!(key, error = %e, "stored payload failed to decompress, purging");
                    self.delete(key, None).await;
                    None
                }
            },
        }
    }

    /// Copy a hot entry into a faster tier.
    async fn promote(&self, key: &str, entry: &CacheEntry, to: TierLevel) {
        match self.tier(to).put(key, entry.clone()).await {
            Ok(outcome) => {
                if outcome.stored {
                    self.handle_evicted(to, outcome.evicted).await;
                    self.promotions.fetch_add(1, Ordering::Relaxed);
                    self.events.publish(CacheEvent::Promotion {
                        key: key.to_string(),
                        to,
                        timestamp: Utc::now(),
                    });
                }
            }
            Err(e) => warn!(key, tier = %to, error = %e, "promotion failed"),
        }
    }

    /// Write a value. Unset options resolve through pattern rules, then the
    /// first selected tier's default TTL. Writes go to every selected tier;
    /// the call succeeds if at least one tier stored the value. Per-tier
    /// failures are logged and tolerated, not raised.
    pub async fn set(&self, key: &str, value: Bytes, opts: SetOptions) -> bool {
        let rule = self.patterns.resolve(key);

        let rule_ttl = rule.as_ref().and_then(|r| r.ttl);
        let requested_ttl = opts.ttl.or(rule_ttl);

        let enabled = self.enabled_levels();
        if enabled.is_empty() {
            warn!(key, "no enabled tiers, set dropped");
            return false;
        }

        // Selection uses the requested TTL when given; the fast tier default
        // stands in for selection purposes otherwise.
        let selection_ttl = requested_ttl.unwrap_or(self.options.tier(enabled[0]).default_ttl);
        let levels = opts
            .levels
            .clone()
            .unwrap_or_else(|| self.selector.select(value.len() as u64, selection_ttl, &enabled));
        if levels.is_empty() {
            return false;
        }

        let ttl = requested_ttl.unwrap_or(self.options.tier(levels[0]).default_ttl);
        let tags = opts
            .tags
            .or_else(|| rule.as_ref().and_then(|r| r.tags.clone()))
            .unwrap_or_default();
        let priority = opts
            .priority
            .or(rule.as_ref().and_then(|r| r.priority))
            .unwrap_or(5);
        let compress = opts
            .compression
            .or(rule.as_ref().and_then(|r| r.compression))
            .unwrap_or(false);

        let (payload, algorithm) = if compress {
            self.compression.compress(&value)
        } else {
            (value, CompressionAlgorithm::None)
        };

        let entry = CacheEntry::new(payload, ttl)
            .with_tags(tags.clone())
            .with_priority(priority)
            .with_compression(algorithm);
        let size = entry.size();

        let mut stored_levels = Vec::new();
        for &level in &levels {
            let tier = self.tier(level);
            if !tier.enabled() {
                continue;
            }
            match tier.put(key, entry.clone()).await {
                Ok(outcome) => {
                    if outcome.stored {
                        stored_levels.push(level);
                    }
                    self.handle_evicted(level, outcome.evicted).await;
                }
                Err(e) => {
                    // Partial failure is tolerated: remaining tiers still
                    // serve the write.
                    warn!(key, tier = %level, error = %e, "tier write failed");
                }
            }
        }

        if stored_levels.is_empty() {
            return false;
        }

        // Entry writes are visible before the tag mapping is published, so
        // a concurrent tag invalidation never sees a mapping for an
        // unwritten key.
        self.tag_index.insert(key, &tags);

        self.events.publish(CacheEvent::Set {
            key: key.to_string(),
            levels: stored_levels,
            size_bytes: size,
            timestamp: Utc::now(),
        });
        true
    }

    /// Prune tag mappings for keys evicted from a tier, if they are no
    /// longer live anywhere, and publish the eviction.
    async fn handle_evicted(&self, level: TierLevel, evicted: Vec<String>) {
        if evicted.is_empty() {
            return;
        }
        for key in &evicted {
            if !self.exists_anywhere(key).await {
                self.tag_index.remove_key(key);
            }
        }
        self.events.publish(CacheEvent::Eviction {
            level,
            keys: evicted,
            timestamp: Utc::now(),
        });
    }

    async fn exists_anywhere(&self, key: &str) -> bool {
        for level in self.enabled_levels() {
            match self.tier(level).contains(key).await {
                Ok(true) => return true,
                Ok(false) => {}
                Err(e) => {
                    // An unreachable backend might still hold the key;
                    // keep the mapping rather than dangle a deletion.
                    warn!(key, tier = %level, error = %e, "existence check failed");
                    return true;
                }
            }
        }
        false
    }

    /// Delete a key from the given tiers (default: all). Returns whether any
    /// tier held it. Deleting an absent key is a no-op returning `false`.
    pub async fn delete(&self, key: &str, levels: Option<Vec<TierLevel>>) -> bool {
        let targets = levels.unwrap_or_else(|| self.enabled_levels());
        let mut deleted = false;

        for level in targets {
            let tier = self.tier(level);
            if !tier.enabled() {
                continue;
            }
            match tier.remove(key).await {
                Ok(true) => {
                    tier.counters().record_delete();
                    deleted = true;
                }
                Ok(false) => {}
                Err(e) => warn!(key, tier = %level, error = %e, "tier delete failed"),
            }
        }

        if deleted {
            if !self.exists_anywhere(key).await {
                self.tag_index.remove_key(key);
            }
            self.events.publish(CacheEvent::Delete {
                key: key.to_string(),
                timestamp: Utc::now(),
            });
        }
        deleted
    }

    /// Apply `set` to each entry independently. One entry's failure does not
    /// abort the rest; there is no atomicity across the batch.
    pub async fn set_batch(&self, entries: Vec<BatchSetEntry>) -> BatchSetOutcome {
        let mut outcome = BatchSetOutcome::default();
        for entry in entries {
            let ok = self.set(&entry.key, entry.value, entry.options).await;
            if !ok {
                outcome
                    .errors
                    .push(format!("set failed on all tiers for key '{}'", entry.key));
            }
            outcome.results.push((entry.key, ok));
        }
        outcome
    }

    /// Remove every key carrying any of the given tags. Returns the number
    /// of keys actually removed; keys indexed but already gone count as
    /// no-ops.
    pub async fn invalidate_by_tags(&self, tags: &[String]) -> u64 {
        let keys = self.tag_index.keys_for_tags(tags);
        let mut removed = 0u64;

        for key in keys {
            if self.remove_everywhere(&key).await {
                removed += 1;
            }
            self.tag_index.remove_key(&key);
        }

        if removed > 0 {
            self.events.publish(CacheEvent::Invalidation {
                removed,
                timestamp: Utc::now(),
            });
        }
        removed
    }

    /// Remove every key (across all tiers) matching the pattern. An invalid
    /// regex is rejected synchronously as a configuration error.
    pub async fn invalidate_by_pattern(
        &self,
        pattern: &str,
        match_type: MatchType,
    ) -> Result<u64> {
        let matcher = KeyMatcher::new(pattern, match_type)?;

        let mut candidates = std::collections::HashSet::new();
        for level in self.enabled_levels() {
            match self.tier(level).keys().await {
                Ok(keys) => candidates.extend(keys),
                Err(e) => warn!(tier = %level, error = %e, "key scan failed"),
            }
        }

        let mut removed = 0u64;
        for key in candidates {
            if matcher.matches(&key) && self.remove_everywhere(&key).await {
                self.tag_index.remove_key(&key);
                removed += 1;
            }
        }

        if removed > 0 {
            self.events.publish(CacheEvent::Invalidation {
                removed,
                timestamp: Utc::now(),
            });
        }
        Ok(removed)
    }

    /// Remove a key from all enabled tiers, counting it once.
    async fn remove_everywhere(&self, key: &str) -> bool {
        let mut removed = false;
        for level in self.enabled_levels() {
            let tier = self.tier(level);
            match tier.remove(key).await {
                Ok(true) => {
                    tier.counters().record_invalidation(1);
                    removed = true;
                }
                Ok(false) => {}
                Err(e) => warn!(key, tier = %level, error = %e, "invalidation delete failed"),
            }
        }
        removed
    }

    /// Drop all entries in the given tiers (default: all), resetting their
    /// statistics. Tag mappings for keys no longer live anywhere are pruned.
    pub async fn clear(&self, levels: Option<Vec<TierLevel>>) -> bool {
        let all = levels.is_none();
        let targets = levels.unwrap_or_else(|| self.enabled_levels());
        let mut ok = true;

        for level in targets {
            if let Err(e) = self.tier(level).clear().await {
                warn!(tier = %level, error = %e, "tier clear failed");
                ok = false;
            }
        }

        if all && ok {
            self.tag_index.clear();
        } else {
            for key in self.tag_index.indexed_keys() {
                if !self.exists_anywhere(&key).await {
                    self.tag_index.remove_key(&key);
                }
            }
        }
        ok
    }

    // =========================================================================
    // Pattern rule administration
    // =========================================================================

    /// Add (or replace) a pattern rule.
    pub fn add_pattern(&self, rule: CachePattern) {
        let pattern = rule.pattern().to_string();
        self.patterns.add(rule);
        self.events.publish(CacheEvent::PatternAdded {
            pattern,
            timestamp: Utc::now(),
        });
    }

    /// Remove the rule with the given pattern text.
    pub fn remove_pattern(&self, pattern: &str) -> bool {
        let removed = self.patterns.remove(pattern);
        if removed {
            self.events.publish(CacheEvent::PatternRemoved {
                pattern: pattern.to_string(),
                timestamp: Utc::now(),
            });
        }
        removed
    }

    /// All pattern rules in resolution order.
    pub fn patterns(&self) -> Vec<CachePattern> {
        self.patterns.list()
    }

    // =========================================================================
    // Statistics
    // =========================================================================

    /// Per-tier statistics snapshot.
    pub async fn stats(&self, level: TierLevel) -> Result<TierStats> {
        self.tier(level).stats(self.options.top_keys).await
    }

    /// Aggregate metrics across all enabled tiers.
    pub async fn metrics(&self) -> CacheMetrics {
        let mut per_tier = Vec::new();
        let mut hits = 0u64;
        let mut misses = 0u64;
        let mut entries = 0u64;
        let mut bytes = 0u64;
        let mut evictions = 0u64;
        let mut invalidations = 0u64;

        for level in self.enabled_levels() {
            let tier = self.tier(level);
            match tier.stats(self.options.top_keys).await {
                Ok(stats) => {
                    hits += stats.hits;
                    misses += stats.misses;
                    entries += stats.entries;
                    bytes += stats.size_bytes;
                    evictions += stats.evictions;
                    invalidations += stats.invalidations;
                    per_tier.push((level.to_string(), stats));
                }
                Err(e) => warn!(tier = %level, error = %e, "stats snapshot failed"),
            }
        }

        let total = hits + misses;
        CacheMetrics {
            overall_hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
            total_entries: entries,
            total_size_bytes: bytes,
            total_evictions: evictions,
            total_invalidations: invalidations,
            promotions: self.promotions.load(Ordering::Relaxed),
            per_tier,
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Start the background tasks: the periodic TTL sweep and, when
    /// monitoring is enabled, a periodic metrics log. Idempotent.
    pub fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock();
        if tasks.is_some() {
            return;
        }

        let token = CancellationToken::new();
        let mut handles = Vec::new();

        {
            let cache = Arc::clone(self);
            let token = token.clone();
            let interval = self.options.invalidation.cleanup_interval;
            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = ticker.tick() => cache.sweep().await,
                    }
                }
                debug!("TTL sweep task stopped");
            }));
        }

        if self.options.monitoring.enabled {
            let cache = Arc::clone(self);
            let token = token.clone();
            let interval = self.options.monitoring.metrics_interval;
            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = ticker.tick() => {
                            let metrics = cache.metrics().await;
                            debug!(
                                hit_rate = metrics.overall_hit_rate,
                                entries = metrics.total_entries,
                                bytes = metrics.total_size_bytes,
                                "cache metrics sample"
                            );
                        }
                    }
                }
                debug!("metrics task stopped");
            }));
        }

        *tasks = Some(BackgroundTasks { token, handles });
        info!("cache background tasks started");
    }

    /// Stop all background tasks and wait for them to finish.
    pub async fn stop(&self) {
        let tasks = self.tasks.lock().take();
        if let Some(tasks) = tasks {
            tasks.token.cancel();
            for handle in tasks.handles {
                let _ = handle.await;
            }
            info!("cache background tasks stopped");
        }
    }

    /// One TTL sweep pass: purge expired entries in every tier and prune
    /// tag mappings for keys no longer live anywhere.
    pub async fn sweep(&self) {
        for level in self.enabled_levels() {
            match self.tier(level).sweep_expired().await {
                Ok(purged) => {
                    for key in purged {
                        if !self.exists_anywhere(&key).await {
                            self.tag_index.remove_key(&key);
                        }
                    }
                }
                Err(e) => warn!(tier = %level, error = %e, "TTL sweep failed"),
            }
        }
    }
}
