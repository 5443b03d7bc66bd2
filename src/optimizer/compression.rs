//! Payload compression with automatic fallback.
//!
//! Compression is gated twice: payloads below the configured minimum size
//! are stored as-is, and only text-like content types are considered
//! compressible. A compressed form that fails to beat the original is
//! discarded in favor of the original bytes.

use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// =============================================================================
// Compression Algorithm
// =============================================================================

/// Supported compression algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    /// No compression
    None,
    /// LZ4 - fast compression
    Lz4,
}

impl CompressionAlgorithm {
    pub fn name(&self) -> &'static str {
        match self {
            CompressionAlgorithm::None => "none",
            CompressionAlgorithm::Lz4 => "lz4",
        }
    }

    /// All algorithms this build supports.
    pub fn available_algorithms() -> Vec<Self> {
        vec![Self::None, Self::Lz4]
    }
}

impl Default for CompressionAlgorithm {
    fn default() -> Self {
        CompressionAlgorithm::None
    }
}

impl std::fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for CompressionAlgorithm {
    type Err = Error;

    /// An unknown algorithm name is a configuration error, rejected
    /// synchronously rather than at first use.
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(CompressionAlgorithm::None),
            "lz4" => Ok(CompressionAlgorithm::Lz4),
            other => Err(Error::Config(format!(
                "unsupported compression algorithm '{other}' (supported: none, lz4)"
            ))),
        }
    }
}

// =============================================================================
// Compression Configuration
// =============================================================================

/// Configuration for compression.
#[derive(Debug, Clone)]
pub struct CompressionConfig {
    /// Algorithm used when the caller does not name one
    pub default_algorithm: CompressionAlgorithm,
    /// Payloads smaller than this are stored uncompressed
    pub min_size_bytes: u64,
    /// Compression level (algorithm-specific)
    pub level: i32,
    /// Whether to fall back to uncompressed on failure
    pub fallback_on_failure: bool,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            default_algorithm: CompressionAlgorithm::Lz4,
            min_size_bytes: 1024,
            level: 4,
            fallback_on_failure: true,
        }
    }
}

/// Whether a content type is worth compressing. Text-like payloads
/// compress well; already-encoded media does not.
pub fn is_compressible_content_type(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim()
        .to_ascii_lowercase();

    essence.starts_with("text/")
        || essence == "application/json"
        || essence == "application/xml"
        || essence == "application/javascript"
        || essence == "application/x-yaml"
        || essence.ends_with("+json")
        || essence.ends_with("+xml")
        || essence == "image/svg+xml"
}

// =============================================================================
// Compressor Trait
// =============================================================================

/// Trait for compression implementations.
pub trait Compressor: Send + Sync {
    fn algorithm(&self) -> CompressionAlgorithm;

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// Pass-through compressor (no compression).
pub struct NoopCompressor;

impl Compressor for NoopCompressor {
    fn algorithm(&self) -> CompressionAlgorithm {
        CompressionAlgorithm::None
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }
}

/// LZ4 compressor (fast compression).
pub struct Lz4Compressor {
    level: i32,
}

impl Lz4Compressor {
    pub fn new() -> Self {
        Self { level: 4 }
    }

    pub fn with_level(level: i32) -> Self {
        Self { level }
    }
}

impl Default for Lz4Compressor {
    fn default() -> Self {
        Self::new()
    }
}

impl Compressor for Lz4Compressor {
    fn algorithm(&self) -> CompressionAlgorithm {
        CompressionAlgorithm::Lz4
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        lz4::block::compress(
            data,
            Some(lz4::block::CompressionMode::HIGHCOMPRESSION(self.level)),
            true,
        )
        .map_err(|e| Error::CompressionFailed {
            algorithm: "lz4".into(),
            reason: e.to_string(),
        })
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        lz4::block::decompress(data, None).map_err(|e| Error::DecompressionFailed {
            algorithm: "lz4".into(),
            reason: e.to_string(),
        })
    }
}

// =============================================================================
// Compression Manager
// =============================================================================

/// Outcome of a compression attempt, including the achieved ratio.
#[derive(Debug, Clone, Serialize)]
pub struct CompressionOutcome {
    pub algorithm: CompressionAlgorithm,
    pub original_bytes: u64,
    pub stored_bytes: u64,
    /// stored/original; 1.0 means no gain
    pub ratio: f64,
}

/// Manager for compression operations with size and content-type gating.
pub struct CompressionManager {
    config: CompressionConfig,
    noop: NoopCompressor,
    lz4: Lz4Compressor,
}

impl CompressionManager {
    pub fn new() -> Self {
        Self::with_config(CompressionConfig::default())
    }

    pub fn with_config(config: CompressionConfig) -> Self {
        Self {
            lz4: Lz4Compressor::with_level(config.level),
            noop: NoopCompressor,
            config,
        }
    }

    fn compressor(&self, algorithm: CompressionAlgorithm) -> &dyn Compressor {
        match algorithm {
            CompressionAlgorithm::None => &self.noop,
            CompressionAlgorithm::Lz4 => &self.lz4,
        }
    }

    /// Whether a payload of this size and content type passes both gates.
    pub fn should_compress(&self, size: u64, content_type: Option<&str>) -> bool {
        if size < self.config.min_size_bytes {
            return false;
        }
        match content_type {
            Some(ct) => is_compressible_content_type(ct),
            None => true,
        }
    }

    /// Compress data using the default algorithm.
    ///
    /// Returns (stored_data, algorithm_used). Small payloads are skipped, a
    /// compressed form that is not smaller is discarded, and a failed
    /// compression falls back to the original bytes.
    pub fn compress(&self, data: &[u8]) -> (Bytes, CompressionAlgorithm) {
        if (data.len() as u64) < self.config.min_size_bytes {
            return (Bytes::copy_from_slice(data), CompressionAlgorithm::None);
        }

        let compressor = self.compressor(self.config.default_algorithm);
        match compressor.compress(data) {
            Ok(compressed) if compressed.len() < data.len() => {
                (Bytes::from(compressed), self.config.default_algorithm)
            }
            Ok(_) => (Bytes::copy_from_slice(data), CompressionAlgorithm::None),
            Err(e) => {
                tracing::warn!(error = %e, "compression failed, storing uncompressed");
                (Bytes::copy_from_slice(data), CompressionAlgorithm::None)
            }
        }
    }

    /// Compress with a caller-specified algorithm, reporting the achieved
    /// ratio. Without fallback enabled, a failure surfaces as an error.
    pub fn compress_with(
        &self,
        data: &[u8],
        algorithm: CompressionAlgorithm,
    ) -> Result<(Bytes, CompressionOutcome)> {
        let original = data.len() as u64;
        if algorithm == CompressionAlgorithm::None {
            return Ok((
                Bytes::copy_from_slice(data),
                CompressionOutcome {
                    algorithm: CompressionAlgorithm::None,
                    original_bytes: original,
                    stored_bytes: original,
                    ratio: 1.0,
                },
            ));
        }

        let compressor = self.compressor(algorithm);
        match compressor.compress(data) {
            Ok(compressed) if compressed.len() < data.len() => {
                let stored = compressed.len() as u64;
                Ok((
                    Bytes::from(compressed),
                    CompressionOutcome {
                        algorithm,
                        original_bytes: original,
                        stored_bytes: stored,
                        ratio: if original == 0 {
                            1.0
                        } else {
                            stored as f64 / original as f64
                        },
                    },
                ))
            }
            Ok(_) => Ok((
                Bytes::copy_from_slice(data),
                CompressionOutcome {
                    algorithm: CompressionAlgorithm::None,
                    original_bytes: original,
                    stored_bytes: original,
                    ratio: 1.0,
                },
            )),
            Err(e) if self.config.fallback_on_failure => {
                tracing::warn!(%algorithm, error = %e, "compression failed, storing uncompressed");
                Ok((
                    Bytes::copy_from_slice(data),
                    CompressionOutcome {
                        algorithm: CompressionAlgorithm::None,
                        original_bytes: original,
                        stored_bytes: original,
                        ratio: 1.0,
                    },
                ))
            }
            Err(e) => Err(e),
        }
    }

    /// Decompress data stored under the given algorithm.
    pub fn decompress(&self, data: &[u8], algorithm: CompressionAlgorithm) -> Result<Bytes> {
        let decompressed = self.compressor(algorithm).decompress(data)?;
        Ok(Bytes::from(decompressed))
    }

    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }
}

impl Default for CompressionManager {
    fn default() -> Self {
        Self::new()
    }
}
