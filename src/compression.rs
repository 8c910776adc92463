// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Payload compression for the Redis tier.
//!
//! Uses zstd with magic-bytes detection, so compressed and plain payloads
//! can live side by side under the same key namespace: readers never need to
//! know how an entry was written.
//!
//! # Feature Flag
//!
//! Compression requires the `compression` feature (on by default):
//!
//! ```toml
//! [dependencies]
//! tiered-cache = { version = "0.1", default-features = false }
//! ```
//!
//! Without it every payload is written plain and [`is_compressed`] is always
//! `false`.
//!
//! # Why Redis Only?
//!
//! The memory tier holds decoded values; compressing there would cost CPU on
//! every hit for no network saving. Redis payloads cross the wire and count
//! against `maxmemory`, and JSON envelopes compress well (60-90%).
//!
//! # Example
//!
//! ```rust
//! # #[cfg(feature = "compression")]
//! # {
//! use tiered_cache::compression::{decompress_bytes, PayloadCompressor};
//!
//! let compressor = PayloadCompressor::new(3, 64);
//! let json = serde_json::to_vec(&vec!["repetitive"; 100]).unwrap();
//!
//! let (stored, stats) = compressor.compress(json.clone()).unwrap();
//! assert!(stats.is_some());
//! assert_eq!(decompress_bytes(&stored).unwrap(), json);
//!
//! // Below the threshold: stored as-is
//! let (stored, stats) = compressor.compress(b"{}".to_vec()).unwrap();
//! assert!(stats.is_none());
//! assert_eq!(stored, b"{}");
//! # }
//! ```

use std::borrow::Cow;

/// Zstd magic bytes (little-endian): 0xFD2FB528
#[cfg(feature = "compression")]
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

/// Default compression level (3 is a good balance of speed/ratio)
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// Payloads smaller than this are not worth compressing.
pub const DEFAULT_MIN_SIZE_BYTES: usize = 1024;

/// Largest payload a compressed frame may expand to when read back.
pub const DEFAULT_MAX_DECOMPRESSED_BYTES: usize = 64 * 1024 * 1024;

/// Compression error types
#[derive(Debug, thiserror::Error)]
pub enum CompressionError {
    /// Failed to compress data
    #[error("compression failed: {0}")]
    CompressFailed(String),

    /// Failed to decompress data
    #[error("decompression failed: {0}")]
    DecompressFailed(String),
}

/// Check if data is zstd-compressed by checking magic bytes.
#[cfg(feature = "compression")]
#[inline]
#[must_use]
pub fn is_compressed(data: &[u8]) -> bool {
    data.len() >= 4 && data[..4] == ZSTD_MAGIC
}

/// Check if data is compressed (always false without feature).
#[cfg(not(feature = "compression"))]
#[inline]
#[must_use]
pub fn is_compressed(_data: &[u8]) -> bool {
    false
}

/// Compress bytes with a zstd level (1-22).
///
/// - Level 1-3: Fast, good for request paths
/// - Level 10-15: Balanced
/// - Level 19-22: Maximum compression, slow
#[cfg(feature = "compression")]
pub fn compress_bytes_with_level(data: &[u8], level: i32) -> Result<Vec<u8>, CompressionError> {
    zstd::encode_all(data, level).map_err(|e| CompressionError::CompressFailed(e.to_string()))
}

/// Decompress bytes, borrowing the input when it was stored plain.
///
/// Output is capped at [`DEFAULT_MAX_DECOMPRESSED_BYTES`].
pub fn decompress_bytes(data: &[u8]) -> Result<Cow<'_, [u8]>, CompressionError> {
    decompress_bytes_bounded(data, DEFAULT_MAX_DECOMPRESSED_BYTES)
}

/// Decompress bytes, failing if the output would exceed `max_bytes`.
///
/// Redis is shared, so a frame read back may come from any writer.
#[cfg(feature = "compression")]
pub fn decompress_bytes_bounded(data: &[u8], max_bytes: usize) -> Result<Cow<'_, [u8]>, CompressionError> {
    use std::io::Read;

    if !is_compressed(data) {
        return Ok(Cow::Borrowed(data));
    }
    let decoder =
        zstd::stream::read::Decoder::new(data).map_err(|e| CompressionError::DecompressFailed(e.to_string()))?;
    let mut out = Vec::new();
    decoder
        .take(max_bytes as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|e| CompressionError::DecompressFailed(e.to_string()))?;
    if out.len() > max_bytes {
        return Err(CompressionError::DecompressFailed(format!(
            "payload expands beyond {max_bytes} bytes"
        )));
    }
    Ok(Cow::Owned(out))
}

/// Without the feature nothing is ever compressed, so this is the identity.
#[cfg(not(feature = "compression"))]
pub fn decompress_bytes_bounded(data: &[u8], _max_bytes: usize) -> Result<Cow<'_, [u8]>, CompressionError> {
    Ok(Cow::Borrowed(data))
}

/// Compression statistics for a single operation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompressionStats {
    /// Original size in bytes
    pub original_bytes: usize,
    /// Compressed size in bytes
    pub compressed_bytes: usize,
    /// Compression ratio (original / compressed)
    pub ratio: f64,
    /// Space saved as percentage (0.0 - 1.0)
    pub savings: f64,
}

impl CompressionStats {
    /// Calculate stats from original and compressed sizes.
    #[must_use]
    pub fn new(original_bytes: usize, compressed_bytes: usize) -> Self {
        let ratio = if compressed_bytes > 0 {
            original_bytes as f64 / compressed_bytes as f64
        } else {
            0.0
        };
        let savings = if original_bytes > 0 {
            1.0 - (compressed_bytes as f64 / original_bytes as f64)
        } else {
            0.0
        };
        Self {
            original_bytes,
            compressed_bytes,
            ratio,
            savings,
        }
    }
}

/// Threshold-aware compressor for remote-tier payloads.
#[derive(Debug, Clone, Copy)]
pub struct PayloadCompressor {
    level: i32,
    min_size_bytes: usize,
    max_decompressed_bytes: usize,
}

impl Default for PayloadCompressor {
    fn default() -> Self {
        Self::new(DEFAULT_COMPRESSION_LEVEL, DEFAULT_MIN_SIZE_BYTES)
    }
}

impl PayloadCompressor {
    #[must_use]
    pub fn new(level: i32, min_size_bytes: usize) -> Self {
        Self {
            level,
            min_size_bytes,
            max_decompressed_bytes: DEFAULT_MAX_DECOMPRESSED_BYTES,
        }
    }

    /// Cap on the size a stored frame may expand to.
    #[must_use]
    pub fn with_max_decompressed_bytes(mut self, max_bytes: usize) -> Self {
        self.max_decompressed_bytes = max_bytes;
        self
    }

    #[must_use]
    pub fn level(&self) -> i32 {
        self.level
    }

    #[must_use]
    pub fn min_size_bytes(&self) -> usize {
        self.min_size_bytes
    }

    #[must_use]
    pub fn max_decompressed_bytes(&self) -> usize {
        self.max_decompressed_bytes
    }

    /// Decode a stored payload within this compressor's size cap.
    pub fn decompress<'a>(&self, data: &'a [u8]) -> Result<Cow<'a, [u8]>, CompressionError> {
        decompress_bytes_bounded(data, self.max_decompressed_bytes)
    }

    /// Compress `data` if it reaches the size threshold.
    ///
    /// Returns the bytes to store and, when compression happened, its stats.
    /// Output that would not be smaller than the input is discarded.
    #[cfg(feature = "compression")]
    pub fn compress(
        &self,
        data: Vec<u8>,
    ) -> Result<(Vec<u8>, Option<CompressionStats>), CompressionError> {
        if data.len() < self.min_size_bytes {
            return Ok((data, None));
        }
        let compressed = compress_bytes_with_level(&data, self.level)?;
        if compressed.len() >= data.len() {
            return Ok((data, None));
        }
        let stats = CompressionStats::new(data.len(), compressed.len());
        Ok((compressed, Some(stats)))
    }

    /// Without the feature payloads are always stored plain.
    #[cfg(not(feature = "compression"))]
    pub fn compress(
        &self,
        data: Vec<u8>,
    ) -> Result<(Vec<u8>, Option<CompressionStats>), CompressionError> {
        Ok((data, None))
    }
}
