// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Payload codec shared by both tiers.
//!
//! Values are serialized to JSON, then compressed with zstd when the
//! serialized form exceeds a size threshold. A one-byte marker in front of
//! every payload tells the decoder which path was taken:
//!
//! ```text
//! ┌────────┬──────────────────────────────┐
//! │ 0x00   │ raw JSON bytes               │
//! ├────────┼──────────────────────────────┤
//! │ 0x01   │ zstd frame of the JSON bytes │
//! └────────┴──────────────────────────────┘
//! ```
//!
//! # Feature Flag
//!
//! Compression requires the `compression` feature (on by default). Without
//! it every payload is written raw, and a compressed payload from another
//! instance decodes to [`CodecError::Decompress`], which callers treat as a
//! miss.
//!
//! # Example
//!
//! ```
//! use catalog_cache::codec::Codec;
//! use serde_json::json;
//!
//! let codec = Codec::default();
//! let value = json!({"sku": "A-100", "price": 1299});
//! let bytes = codec.encode(&value).unwrap();
//! let back: serde_json::Value = codec.decode(&bytes).unwrap();
//! assert_eq!(value, back);
//! ```

use serde::{de::DeserializeOwned, Serialize};

/// Marker for an uncompressed JSON payload.
pub const MARKER_RAW: u8 = 0x00;

/// Marker for a zstd-compressed JSON payload.
pub const MARKER_ZSTD: u8 = 0x01;

/// Default size threshold (serialized bytes) above which payloads are compressed.
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 1024;

/// Default zstd level (3 is a good balance of speed/ratio)
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// Codec failures. Always treated as a cache miss by the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("serialization failed: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("deserialization failed: {0}")]
    Deserialize(#[source] serde_json::Error),

    #[error("compression failed: {0}")]
    Compress(String),

    #[error("decompression failed: {0}")]
    Decompress(String),

    #[error("empty payload")]
    Empty,

    #[error("unknown payload marker 0x{0:02x}")]
    UnknownMarker(u8),
}

/// Serializes values to marked, optionally compressed payloads.
#[derive(Debug, Clone, Copy)]
pub struct Codec {
    threshold: usize,
    level: i32,
}

impl Default for Codec {
    fn default() -> Self {
        Self::new(DEFAULT_COMPRESSION_THRESHOLD, DEFAULT_COMPRESSION_LEVEL)
    }
}

impl Codec {
    #[must_use]
    pub fn new(threshold: usize, level: i32) -> Self {
        Self { threshold, level }
    }

    #[must_use]
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Whether a serialized payload of this size gets compressed.
    #[inline]
    #[must_use]
    pub fn should_compress(&self, serialized: &[u8]) -> bool {
        cfg!(feature = "compression") && serialized.len() > self.threshold
    }

    /// Serialize `value` and wrap it in a marked payload.
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        let json = serde_json::to_vec(value).map_err(CodecError::Serialize)?;

        if self.should_compress(&json) {
            let compressed = compress(&json, self.level)?;
            crate::metrics::record_compression(json.len(), compressed.len());
            let mut out = Vec::with_capacity(compressed.len() + 1);
            out.push(MARKER_ZSTD);
            out.extend_from_slice(&compressed);
            Ok(out)
        } else {
            let mut out = Vec::with_capacity(json.len() + 1);
            out.push(MARKER_RAW);
            out.extend_from_slice(&json);
            Ok(out)
        }
    }

    /// Inspect the marker, decompress if needed, then deserialize.
    pub fn decode<T: DeserializeOwned>(&self, payload: &[u8]) -> Result<T, CodecError> {
        let (&marker, body) = payload.split_first().ok_or(CodecError::Empty)?;
        match marker {
            MARKER_RAW => serde_json::from_slice(body).map_err(CodecError::Deserialize),
            MARKER_ZSTD => {
                let json = decompress(body)?;
                serde_json::from_slice(&json).map_err(CodecError::Deserialize)
            }
            other => Err(CodecError::UnknownMarker(other)),
        }
    }
}

/// Check whether a payload carries the compressed marker.
#[inline]
#[must_use]
pub fn is_compressed(payload: &[u8]) -> bool {
    payload.first() == Some(&MARKER_ZSTD)
}

#[cfg(feature = "compression")]
fn compress(data: &[u8], level: i32) -> Result<Vec<u8>, CodecError> {
    zstd::encode_all(data, level).map_err(|e| CodecError::Compress(e.to_string()))
}

#[cfg(not(feature = "compression"))]
fn compress(_data: &[u8], _level: i32) -> Result<Vec<u8>, CodecError> {
    Err(CodecError::Compress("compression feature disabled".into()))
}

#[cfg(feature = "compression")]
fn decompress(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    zstd::decode_all(data).map_err(|e| CodecError::Decompress(e.to_string()))
}

#[cfg(not(feature = "compression"))]
fn decompress(_data: &[u8]) -> Result<Vec<u8>, CodecError> {
    Err(CodecError::Decompress("compression feature disabled".into()))
}
