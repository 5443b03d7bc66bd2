//! Eviction Engine
//!
//! Reclaims space in a capacity-bounded tier. Victims are selected by
//! ascending value score (least valuable first) until the incoming write
//! fits. Expired entries are always reclaimed before live ones.

use std::time::Duration;

use super::entry::CacheEntry;

/// Eviction policy.
///
/// The scoring constants are heuristics, not invariants; they are exposed as
/// plain fields so deployments can tune them empirically.
#[derive(Debug, Clone)]
pub struct EvictionPolicy {
    /// Idle time at which an entry's recency weight halves
    pub recency_half_life: Duration,
    /// How strongly entry priority (1..=10) scales the value score.
    /// 0.0 ignores priority entirely.
    pub priority_weight: f64,
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self {
            recency_half_life: Duration::from_secs(300),
            priority_weight: 0.5,
        }
    }
}

impl EvictionPolicy {
    /// Value score for an entry: `access_count × recency_weight`, optionally
    /// scaled by priority. Lower means more evictable.
    pub fn value_score(&self, entry: &CacheEntry) -> f64 {
        let half_life = self.recency_half_life.as_millis().max(1) as f64;
        let idle = entry.idle_millis() as f64;
        let recency_weight = half_life / (half_life + idle);
        let frequency = entry.access_count() as f64 + 1.0;

        let base = frequency * recency_weight;
        if self.priority_weight == 0.0 {
            base
        } else {
            // priority 5 is neutral
            let priority_factor = (entry.metadata.priority as f64 / 5.0).powf(self.priority_weight);
            base * priority_factor
        }
    }

    /// Select victims from a tier snapshot until at least `need_bytes` and
    /// `need_entries` are reclaimed. Returns `(key, size_bytes)` pairs.
    ///
    /// Expired entries go first; live entries follow in ascending value
    /// score, ties broken by oldest `last_accessed`.
    pub fn select_victims(
        &self,
        entries: &[(String, CacheEntry)],
        need_bytes: u64,
        need_entries: u64,
    ) -> Vec<(String, u64)> {
        if need_bytes == 0 && need_entries == 0 {
            return Vec::new();
        }

        let mut scored: Vec<(&str, f64, u64, u64, bool)> = entries
            .iter()
            .map(|(key, entry)| {
                (
                    key.as_str(),
                    self.value_score(entry),
                    entry.last_accessed(),
                    entry.size(),
                    entry.is_expired(),
                )
            })
            .collect();

        scored.sort_by(|a, b| {
            // expired first, then ascending score, then oldest access
            b.4.cmp(&a.4)
                .then(a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
                .then(a.2.cmp(&b.2))
        });

        let mut victims = Vec::new();
        let mut freed_bytes = 0u64;
        let mut freed_entries = 0u64;

        for (key, _, _, size, _) in scored {
            if freed_bytes >= need_bytes && freed_entries >= need_entries {
                break;
            }
            victims.push((key.to_string(), size));
            freed_bytes += size;
            freed_entries += 1;
        }

        victims
    }
}
