//! Compression utilities for PDF streams

use crate::error::{PdfError, Result};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// Output chunk size used while inflating.
pub const INFLATE_CHUNK_SIZE: usize = 4096;

/// Highest accepted compression level.
pub const MAX_COMPRESSION_LEVEL: u8 = 9;

/// Compress data using Flate/Zlib compression at `level` (0-9)
pub fn compress(data: &[u8], level: u8) -> Result<Vec<u8>> {
    if level > MAX_COMPRESSION_LEVEL {
        return Err(PdfError::InvalidCompressionLevel(level));
    }
    let mut encoder = ZlibEncoder::new(
        Vec::with_capacity(data.len() / 2 + 16),
        Compression::new(level as u32),
    );
    encoder
        .write_all(data)
        .map_err(|e| PdfError::CompressionError(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| PdfError::CompressionError(e.to_string()))
}

/// Decompress Flate/Zlib data, appending to `out` one chunk at a time
pub fn decompress_into(data: &[u8], out: &mut Vec<u8>) -> Result<()> {
    let mut decoder = ZlibDecoder::new(data);
    let mut chunk = [0u8; INFLATE_CHUNK_SIZE];
    loop {
        let read = decoder
            .read(&mut chunk)
            .map_err(|e| PdfError::DecodeError(format!("inflate failed: {e}")))?;
        if read == 0 {
            break;
        }
        out.extend_from_slice(&chunk[..read]);
    }
    Ok(())
}

/// Decompress Flate/Zlib data
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut decompressed = Vec::new();
    decompress_into(data, &mut decompressed)?;
    Ok(decompressed)
}
