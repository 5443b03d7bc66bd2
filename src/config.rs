//! Cache construction options
//!
//! Plain option structures supplied at construction time. No file format or
//! wire protocol is mandated; this is an in-process library boundary.

use std::time::Duration;

use crate::cache::tier::TierLevel;

/// Configuration for a single cache tier.
#[derive(Debug, Clone)]
pub struct TierOptions {
    /// Whether this tier participates in reads and writes
    pub enabled: bool,
    /// Maximum number of entries
    pub max_entries: u64,
    /// Maximum total payload bytes
    pub max_size_bytes: u64,
    /// TTL applied when neither the caller nor a pattern rule supplies one
    pub default_ttl: Duration,
}

impl TierOptions {
    /// Defaults for the fast in-process tier
    pub fn fast_memory() -> Self {
        Self {
            enabled: true,
            max_entries: 100_000,
            max_size_bytes: 256 * 1024 * 1024, // 256MB
            default_ttl: Duration::from_secs(300),
        }
    }

    /// Defaults for the distributed tier
    pub fn distributed() -> Self {
        Self {
            enabled: true,
            max_entries: 1_000_000,
            max_size_bytes: 4 * 1024 * 1024 * 1024, // 4GB
            default_ttl: Duration::from_secs(1800),
        }
    }

    /// Defaults for the durable tier
    pub fn durable() -> Self {
        Self {
            enabled: true,
            max_entries: 10_000_000,
            max_size_bytes: 64 * 1024 * 1024 * 1024, // 64GB
            default_ttl: Duration::from_secs(86_400),
        }
    }

    /// Default options for a given level
    pub fn for_level(level: TierLevel) -> Self {
        match level {
            TierLevel::FastMemory => Self::fast_memory(),
            TierLevel::Distributed => Self::distributed(),
            TierLevel::Durable => Self::durable(),
        }
    }
}

/// Invalidation engine options.
#[derive(Debug, Clone)]
pub struct InvalidationOptions {
    /// Interval between background TTL sweeps
    pub cleanup_interval: Duration,
}

impl Default for InvalidationOptions {
    fn default() -> Self {
        Self {
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

/// Monitoring options.
#[derive(Debug, Clone)]
pub struct MonitoringOptions {
    /// Whether the analyzer's continuous sampling runs
    pub enabled: bool,
    /// Interval between statistics samples
    pub metrics_interval: Duration,
}

impl Default for MonitoringOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            metrics_interval: Duration::from_secs(30),
        }
    }
}

/// Top-level cache options supplied at construction.
#[derive(Debug, Clone)]
pub struct CacheOptions {
    /// Fast in-process tier
    pub fast_memory: TierOptions,
    /// Distributed tier
    pub distributed: TierOptions,
    /// Durable tier
    pub durable: TierOptions,
    /// Invalidation engine options
    pub invalidation: InvalidationOptions,
    /// Monitoring options
    pub monitoring: MonitoringOptions,
    /// Capacity of the bounded event channel; lagging subscribers drop
    /// the oldest events rather than blocking cache operations
    pub event_capacity: usize,
    /// How many hot keys a stats snapshot reports
    pub top_keys: usize,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            fast_memory: TierOptions::fast_memory(),
            distributed: TierOptions::distributed(),
            durable: TierOptions::durable(),
            invalidation: InvalidationOptions::default(),
            monitoring: MonitoringOptions::default(),
            event_capacity: 1024,
            top_keys: 10,
        }
    }
}

impl CacheOptions {
    /// Get the options for a given tier level
    pub fn tier(&self, level: TierLevel) -> &TierOptions {
        match level {
            TierLevel::FastMemory => &self.fast_memory,
            TierLevel::Distributed => &self.distributed,
            TierLevel::Durable => &self.durable,
        }
    }

    /// Validate option consistency
    pub fn validate(&self) -> crate::error::Result<()> {
        for level in TierLevel::all() {
            let opts = self.tier(level);
            if opts.enabled && (opts.max_entries == 0 || opts.max_size_bytes == 0) {
                return Err(crate::error::Error::Config(format!(
                    "tier {} enabled with zero capacity",
                    level
                )));
            }
        }
        if self.event_capacity == 0 {
            return Err(crate::error::Error::Config(
                "event_capacity must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
