//! Compression applied to a formatted object before upload.

use std::io::{Read, Write};

use serde::Deserialize;

use crate::error::{SluiceError, SluiceResult};

const ZSTD_LEVEL: i32 = 3;

/// Compression codec applied after formatting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionType {
    /// Objects are stored as formatted.
    #[default]
    None,
    /// gzip, `.gz`.
    Gzip,
    /// Framed snappy, `.snappy`.
    Snappy,
    /// zstd, `.zst`.
    Zstd,
}

impl CompressionType {
    /// Extension appended to object names, including the leading dot.
    pub const fn extension(&self) -> &'static str {
        match self {
            CompressionType::None => "",
            CompressionType::Gzip => ".gz",
            CompressionType::Snappy => ".snappy",
            CompressionType::Zstd => ".zst",
        }
    }
}

/// Compress data based on the compression type.
pub(crate) fn compress(compression_type: CompressionType, data: &[u8]) -> SluiceResult<Vec<u8>> {
    match compression_type {
        CompressionType::None => Ok(data.to_vec()),
        CompressionType::Gzip => {
            use flate2::Compression;
            use flate2::write::GzEncoder;

            // GzEncoder leaves mtime at zero, so identical input yields identical output.
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(data).map_err(|e| {
                SluiceError::Encoding(format!("Failed to compress object with gzip: {e}"))
            })?;
            encoder
                .finish()
                .map_err(|e| SluiceError::Encoding(format!("Failed to finish gzip compression: {e}")))
        }
        CompressionType::Snappy => {
            let mut encoder = snap::write::FrameEncoder::new(Vec::new());
            encoder.write_all(data).map_err(|e| {
                SluiceError::Encoding(format!("Failed to compress object with snappy: {e}"))
            })?;
            encoder.into_inner().map_err(|e| {
                SluiceError::Encoding(format!("Failed to finish snappy compression: {e}"))
            })
        }
        CompressionType::Zstd => zstd::stream::encode_all(data, ZSTD_LEVEL)
            .map_err(|e| SluiceError::Encoding(format!("Failed to compress object with zstd: {e}"))),
    }
}

/// Decompress data based on the compression type.
pub(crate) fn decompress(compression_type: CompressionType, data: &[u8]) -> SluiceResult<Vec<u8>> {
    let mut decompressed = vec![];

    match compression_type {
        CompressionType::None => return Ok(data.to_vec()),
        CompressionType::Gzip => {
            flate2::read::GzDecoder::new(data).read_to_end(&mut decompressed)?;
        }
        CompressionType::Snappy => {
            snap::read::FrameDecoder::new(data).read_to_end(&mut decompressed)?;
        }
        CompressionType::Zstd => {
            decompressed = zstd::stream::decode_all(data)?;
        }
    }

    Ok(decompressed)
}
