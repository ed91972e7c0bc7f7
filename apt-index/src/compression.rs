//! Compression formats for emitted index files.

use crate::error::AptIndexError;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// Compression applied to an index file variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Compression {
    /// No compression.
    None,
    /// Gzip compression (`.gz`).
    Gzip,
    /// Bzip2 compression (`.bz2`).
    Bzip2,
}

impl Compression {
    /// File-name extension, including the leading dot for compressed formats.
    pub fn extension(&self) -> &'static str {
        match self {
            Compression::None => "",
            Compression::Gzip => ".gz",
            Compression::Bzip2 => ".bz2",
        }
    }

    /// All supported formats.
    pub fn all() -> &'static [Compression] {
        &[Compression::None, Compression::Gzip, Compression::Bzip2]
    }

    /// Compress a byte buffer.
    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            Compression::None => Ok(data.to_vec()),
            Compression::Gzip => {
                let mut encoder =
                    flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
                encoder.write_all(data)?;
                encoder
                    .finish()
                    .map_err(|e| AptIndexError::compression(format!("gzip: {}", e)))
            }
            Compression::Bzip2 => {
                let mut encoder =
                    bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
                encoder.write_all(data)?;
                encoder
                    .finish()
                    .map_err(|e| AptIndexError::compression(format!("bzip2: {}", e)))
            }
        }
    }

    /// Decompress a byte buffer.
    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            Compression::None => Ok(data.to_vec()),
            Compression::Gzip => {
                let mut decoder = flate2::read::GzDecoder::new(data);
                let mut out = Vec::new();
                decoder
                    .read_to_end(&mut out)
                    .map_err(|e| AptIndexError::compression(format!("gzip: {}", e)))?;
                Ok(out)
            }
            Compression::Bzip2 => {
                let mut decoder = bzip2::read::BzDecoder::new(data);
                let mut out = Vec::new();
                decoder
                    .read_to_end(&mut out)
                    .map_err(|e| AptIndexError::compression(format!("bzip2: {}", e)))?;
                Ok(out)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extensions() {
        assert_eq!(Compression::None.extension(), "");
        assert_eq!(Compression::Gzip.extension(), ".gz");
        assert_eq!(Compression::Bzip2.extension(), ".bz2");
    }

    #[test]
    fn test_round_trips() {
        let data = b"Package: demo\nVersion: 1.0\nArchitecture: amd64\n";
        for compression in Compression::all() {
            let compressed = compression.compress(data).unwrap();
            let restored = compression.decompress(&compressed).unwrap();
            assert_eq!(restored, data);
            if *compression == Compression::None {
                assert_eq!(compressed, data);
            } else {
                assert_ne!(compressed, data);
            }
        }
    }

    #[test]
    fn test_decompress_garbage_fails() {
        assert!(Compression::Gzip.decompress(b"not gzip data").is_err());
        assert!(Compression::Bzip2.decompress(b"not bzip2 data").is_err());
    }
}
