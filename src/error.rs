//! Error types for the meshcache subsystem

use std::time::Duration;

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the caching subsystem.
///
/// Absent keys, tags and patterns are *not* errors; lookups return empty
/// results. This enum covers the conditions that must surface to callers:
/// invalid configuration, pool exhaustion, timeouts and backend failures.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid key pattern (e.g. malformed regex)
    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// A distributed/durable tier backend failed
    #[error("Backend unavailable for tier {tier}: {reason}")]
    BackendUnavailable { tier: String, reason: String },

    /// Connection pool has no free slot for the partition
    #[error("Connection pool exhausted for {host}:{port} (max {max_connections})")]
    PoolExhausted {
        host: String,
        port: u16,
        max_connections: usize,
    },

    /// An operation exceeded its deadline
    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    /// A benchmark was aborted before completion
    #[error("Benchmark '{name}' aborted: {reason}")]
    BenchmarkAborted { name: String, reason: String },

    /// Named benchmark result not found for comparison
    #[error("Benchmark result not found: {0}")]
    BenchmarkNotFound(String),

    /// Compression failed
    #[error("Compression with {algorithm} failed: {reason}")]
    CompressionFailed { algorithm: String, reason: String },

    /// Decompression failed
    #[error("Decompression with {algorithm} failed: {reason}")]
    DecompressionFailed { algorithm: String, reason: String },
}

impl Error {
    /// Whether a caller may reasonably retry the failed operation.
    ///
    /// Capacity and timeout conditions are transient; configuration and
    /// pattern errors are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::PoolExhausted { .. } | Error::Timeout { .. } | Error::BackendUnavailable { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::PoolExhausted {
            host: "db.internal".to_string(),
            port: 5432,
            max_connections: 10,
        };
        assert_eq!(
            err.to_string(),
            "Connection pool exhausted for db.internal:5432 (max 10)"
        );
    }

    #[test]
    fn test_retryable_classification() {
        assert!(Error::Timeout {
            operation: "batch".into(),
            after: Duration::from_secs(1),
        }
        .is_retryable());

        assert!(!Error::Config("bad ttl".into()).is_retryable());
        assert!(!Error::InvalidPattern {
            pattern: "[".into(),
            reason: "unclosed class".into(),
        }
        .is_retryable());
    }
}
