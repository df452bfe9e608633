//! Compression root: gzip, brotli, or identity.
//!
//! Compresses payload bytes on write and decompresses on read. Feeding the
//! read path a stream the write path did not produce fails with `Corrupt`
//! instead of silently handing corrupted bytes downstream.

use std::io::{Read as _, Write as _};

use acorn_core::{AcornError, Result};

use super::{Root, RootContext};

/// Default pipeline position: before encryption (200).
pub const COMPRESSION_SEQUENCE: i32 = 100;

/// Supported compression algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionAlgorithm {
    /// DEFLATE with gzip framing (`flate2`).
    #[default]
    Gzip,
    /// Brotli, quality 5.
    Brotli,
    /// Pass-through, for measuring pipeline overhead or disabling
    /// compression without reshuffling sequences.
    Identity,
}

impl CompressionAlgorithm {
    fn signature(self) -> &'static str {
        match self {
            Self::Gzip => "gzip",
            Self::Brotli => "brotli",
            Self::Identity => "identity",
        }
    }
}

/// Byte-compression root.
pub struct CompressionRoot {
    algorithm: CompressionAlgorithm,
    sequence: i32,
}

impl Default for CompressionRoot {
    fn default() -> Self {
        Self::new(CompressionAlgorithm::default())
    }
}

impl CompressionRoot {
    /// Compression root at the default sequence (100).
    #[must_use]
    pub fn new(algorithm: CompressionAlgorithm) -> Self {
        Self {
            algorithm,
            sequence: COMPRESSION_SEQUENCE,
        }
    }

    /// Overrides the pipeline position.
    #[must_use]
    pub fn with_sequence(mut self, sequence: i32) -> Self {
        self.sequence = sequence;
        self
    }

    /// The configured algorithm.
    #[must_use]
    pub fn algorithm(&self) -> CompressionAlgorithm {
        self.algorithm
    }
}

fn gzip_compress(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut encoder =
        flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(bytes)?;
    Ok(encoder.finish()?)
}

fn gzip_decompress(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    flate2::read::GzDecoder::new(bytes)
        .read_to_end(&mut out)
        .map_err(|e| AcornError::Corrupt(format!("gzip stream: {e}")))?;
    Ok(out)
}

fn brotli_compress(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    {
        let mut writer = brotli::CompressorWriter::new(&mut out, 4096, 5, 22);
        writer.write_all(bytes)?;
        writer.flush()?;
    }
    Ok(out)
}

fn brotli_decompress(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    brotli::Decompressor::new(bytes, 4096)
        .read_to_end(&mut out)
        .map_err(|e| AcornError::Corrupt(format!("brotli stream: {e}")))?;
    Ok(out)
}

impl Root for CompressionRoot {
    fn name(&self) -> &str {
        "compression"
    }

    fn sequence(&self) -> i32 {
        self.sequence
    }

    fn on_write(&self, bytes: &[u8], ctx: &mut RootContext) -> Result<Vec<u8>> {
        let out = match self.algorithm {
            CompressionAlgorithm::Gzip => gzip_compress(bytes)?,
            CompressionAlgorithm::Brotli => brotli_compress(bytes)?,
            CompressionAlgorithm::Identity => bytes.to_vec(),
        };
        ctx.sign(self.algorithm.signature());
        Ok(out)
    }

    fn on_read(&self, bytes: &[u8], ctx: &mut RootContext) -> Result<Vec<u8>> {
        ctx.sign(self.algorithm.signature());
        match self.algorithm {
            CompressionAlgorithm::Gzip => gzip_decompress(bytes),
            CompressionAlgorithm::Brotli => brotli_decompress(bytes),
            CompressionAlgorithm::Identity => Ok(bytes.to_vec()),
        }
    }
}
