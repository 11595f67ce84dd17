//! Gzip transform applied to session token payloads.

use flate2::bufread::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};
use thiserror::Error;

/// Upper bound on the expanded size of a decompressed payload (256 KiB).
///
/// Session claims are a few kilobytes at most; anything larger is treated as
/// a decompression bomb.
pub const DEFAULT_MAX_DECOMPRESSED_SIZE: u64 = 256 * 1024;

/// Errors produced by the compression transform.
#[derive(Debug, Error)]
pub enum CompressionError {
    #[error("failed to compress payload: {0}")]
    Compress(#[source] std::io::Error),

    #[error("failed to decompress payload: {0}")]
    Decompress(#[source] std::io::Error),

    #[error("compressed payload is empty")]
    Empty,

    #[error("{0} trailing bytes after gzip stream")]
    TrailingData(usize),

    #[error("decompressed payload exceeds {limit} bytes")]
    TooLarge { limit: u64 },
}

/// Gzip-compress `data`.
///
/// Accepts any input, including an empty slice.
pub fn compress(data: &[u8]) -> Result<Vec<u8>, CompressionError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).map_err(CompressionError::Compress)?;
    encoder.finish().map_err(CompressionError::Compress)
}

/// Decompress a gzip stream produced by [`compress`].
///
/// The gzip trailer (CRC-32 and length) is verified, so truncated or
/// corrupted input is rejected rather than returning partial data.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, CompressionError> {
    decompress_with_limit(data, DEFAULT_MAX_DECOMPRESSED_SIZE)
}

/// Decompress with an explicit cap on the expanded size.
pub fn decompress_with_limit(data: &[u8], limit: u64) -> Result<Vec<u8>, CompressionError> {
    if data.is_empty() {
        return Err(CompressionError::Empty);
    }

    let mut out = Vec::new();
    let mut decoder = GzDecoder::new(data);
    // Read one byte past the limit so an exact-size payload is still accepted.
    (&mut decoder)
        .take(limit.saturating_add(1))
        .read_to_end(&mut out)
        .map_err(CompressionError::Decompress)?;

    if out.len() as u64 > limit {
        return Err(CompressionError::TooLarge { limit });
    }

    // Only the first gzip member is decoded; anything after it is rejected.
    let rest = decoder.into_inner();
    if !rest.is_empty() {
        return Err(CompressionError::TrailingData(rest.len()));
    }

    Ok(out)
}
