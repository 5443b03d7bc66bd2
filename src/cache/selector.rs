//! Tier Selector
//!
//! Decides which tiers should hold a copy of a value, as a function of
//! payload size and resolved TTL: small and short-lived values stay in the
//! fast tier; larger or longer-lived values are additionally replicated to
//! the distributed tier; very long TTLs are also persisted to the durable
//! tier. Also carries the promotion policy applied on read hits.

use std::time::Duration;

use super::tier::TierLevel;

/// Size/TTL placement heuristics. The cutoffs are tunable, not invariants.
#[derive(Debug, Clone)]
pub struct TierSelector {
    /// Values at or below this size count as "small"
    pub small_value_bytes: u64,
    /// TTLs at or below this count as "short-lived"
    pub short_ttl: Duration,
    /// TTLs at or above this are persisted to the durable tier
    pub durable_ttl: Duration,
}

impl Default for TierSelector {
    fn default() -> Self {
        Self {
            small_value_bytes: 64 * 1024, // 64KB
            short_ttl: Duration::from_secs(300),
            durable_ttl: Duration::from_secs(3600),
        }
    }
}

impl TierSelector {
    /// Select target tiers for a value, restricted to `enabled` levels
    /// (fastest first). At least one enabled tier is always selected so a
    /// write never silently goes nowhere.
    pub fn select(&self, size_bytes: u64, ttl: Duration, enabled: &[TierLevel]) -> Vec<TierLevel> {
        let mut selected = Vec::new();

        if enabled.contains(&TierLevel::FastMemory) {
            selected.push(TierLevel::FastMemory);
        }

        let wants_distributed = size_bytes > self.small_value_bytes || ttl > self.short_ttl;
        if wants_distributed && enabled.contains(&TierLevel::Distributed) {
            selected.push(TierLevel::Distributed);
        }

        if ttl >= self.durable_ttl && enabled.contains(&TierLevel::Durable) {
            selected.push(TierLevel::Durable);
        }

        if selected.is_empty() {
            if let Some(first) = enabled.first() {
                selected.push(*first);
            }
        }

        selected
    }
}

/// Promotion policy: when a hit in a slower tier copies the entry into the
/// fastest tier. The access threshold is a heuristic default, exposed for
/// empirical tuning.
#[derive(Debug, Clone)]
pub struct PromotionPolicy {
    /// Accesses required before an entry is promoted
    pub threshold: u32,
    /// Entries above this size are never promoted into the fast tier
    pub max_promotable_bytes: u64,
}

impl Default for PromotionPolicy {
    fn default() -> Self {
        Self {
            threshold: 3,
            max_promotable_bytes: 1024 * 1024, // 1MB
        }
    }
}

impl PromotionPolicy {
    /// Whether an entry with the given usage should move to a faster tier.
    pub fn should_promote(&self, access_count: u32, size_bytes: u64) -> bool {
        access_count >= self.threshold && size_bytes <= self.max_promotable_bytes
    }
}
