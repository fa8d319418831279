// SPDX-License-Identifier: MIT
//! Payload encoding: gzip + base64 around a packed container
//!
//! The payload is plain text so it can sit inside a non-executed document tag.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use thiserror::Error;

/// Default gzip level used by the packer
pub const DEFAULT_GZIP_LEVEL: u32 = 6;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PayloadError {
    #[error("Base64 decoding failed: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Decompression error: {0}")]
    Decompression(String),

    #[error("Gzip support is not available in this build (enable the `compression` feature)")]
    Unsupported,
}

/// Gzip-compress `container` and base64-encode the result
pub fn encode_payload(container: &[u8], level: u32) -> Result<String, PayloadError> {
    let compressed = gzip(container, level)?;
    Ok(STANDARD.encode(compressed))
}

/// Base64-decode and gunzip a payload into one contiguous buffer.
///
/// ASCII whitespace is ignored, since embedded payloads are often wrapped.
pub fn decode_payload(payload: &str) -> Result<Vec<u8>, PayloadError> {
    let compressed = if payload.bytes().any(|b| b.is_ascii_whitespace()) {
        let compact: Vec<u8> = payload
            .bytes()
            .filter(|b| !b.is_ascii_whitespace())
            .collect();
        STANDARD.decode(compact)?
    } else {
        STANDARD.decode(payload)?
    };
    gunzip(&compressed)
}

/// Gzip with the given level
///
/// The gzip header written by flate2 carries no timestamp, so equal input
/// and level always produce equal output.
#[cfg(feature = "compression")]
pub fn gzip(data: &[u8], level: u32) -> Result<Vec<u8>, PayloadError> {
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    // Columnar numeric data usually compresses to well under half its size
    let estimated_size = (data.len() / 2).max(256);
    let mut encoder = GzEncoder::new(
        Vec::with_capacity(estimated_size),
        Compression::new(level.min(9)),
    );

    encoder
        .write_all(data)
        .map_err(|e| PayloadError::Compression(format!("Write failed: {}", e)))?;

    encoder
        .finish()
        .map_err(|e| PayloadError::Compression(format!("Finish failed: {}", e)))
}

#[cfg(not(feature = "compression"))]
pub fn gzip(_data: &[u8], _level: u32) -> Result<Vec<u8>, PayloadError> {
    Err(PayloadError::Unsupported)
}

/// Streaming gunzip; multi-member streams are concatenated
#[cfg(feature = "compression")]
pub fn gunzip(data: &[u8]) -> Result<Vec<u8>, PayloadError> {
    use flate2::read::MultiGzDecoder;
    use std::io::Read;

    let estimated_size = data.len().saturating_mul(3).max(1024);
    let mut decompressed = Vec::with_capacity(estimated_size);

    let mut decoder = MultiGzDecoder::new(data);
    decoder
        .read_to_end(&mut decompressed)
        .map_err(|e| PayloadError::Decompression(e.to_string()))?;

    // Only shrink if we significantly over-allocated
    if decompressed.capacity() > decompressed.len().saturating_mul(2) {
        decompressed.shrink_to_fit();
    }

    Ok(decompressed)
}

#[cfg(not(feature = "compression"))]
pub fn gunzip(_data: &[u8]) -> Result<Vec<u8>, PayloadError> {
    Err(PayloadError::Unsupported)
}

#[cfg(all(test, feature = "compression"))]
mod tests {
    use super::*;

    #[test]
    fn test_payload_round_trip() {
        let data: Vec<u8> = (0..4096u32).flat_map(|i| (i % 17).to_le_bytes()).collect();
        let payload = encode_payload(&data, DEFAULT_GZIP_LEVEL).unwrap();
        assert!(payload.is_ascii());
        assert_eq!(decode_payload(&payload).unwrap(), data);
    }

    #[test]
    fn test_payload_is_deterministic() {
        let data = b"{\"version\":1}".repeat(100);
        assert_eq!(
            encode_payload(&data, 9).unwrap(),
            encode_payload(&data, 9).unwrap()
        );
    }

    #[test]
    fn test_decode_ignores_whitespace() {
        let payload = encode_payload(b"hello columns", 6).unwrap();
        let (head, tail) = payload.split_at(payload.len() / 2);
        let wrapped = format!("\n  {}\n{}  \n", head, tail);
        assert_eq!(decode_payload(&wrapped).unwrap(), b"hello columns");
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            decode_payload("not base64 !!!"),
            Err(PayloadError::Base64(_))
        ));
        let not_gzip = STANDARD.encode(b"plain bytes");
        assert!(matches!(
            decode_payload(&not_gzip),
            Err(PayloadError::Decompression(_))
        ));
    }
}
