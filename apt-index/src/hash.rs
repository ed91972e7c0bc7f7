//! Checksum support for index files.
//!
//! A `Release` manifest lists every index file under three checksum sections
//! (MD5Sum, SHA1, SHA256). All three digests are computed in a single pass
//! over the data.

use crate::Result;
use serde::{Deserialize, Serialize};
use sha2::Digest;
use std::fmt;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Checksum algorithms listed in a `Release` manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChecksumKind {
    /// MD5, listed under `MD5Sum`.
    Md5,
    /// SHA-1, listed under `SHA1`.
    Sha1,
    /// SHA-256, listed under `SHA256`.
    Sha256,
}

impl ChecksumKind {
    /// Section name used for this algorithm in a `Release` file.
    pub fn manifest_label(&self) -> &'static str {
        match self {
            ChecksumKind::Md5 => "MD5Sum",
            ChecksumKind::Sha1 => "SHA1",
            ChecksumKind::Sha256 => "SHA256",
        }
    }

    /// All algorithms, in the order their sections appear in a manifest.
    pub fn all() -> &'static [ChecksumKind] {
        &[ChecksumKind::Md5, ChecksumKind::Sha1, ChecksumKind::Sha256]
    }
}

impl fmt::Display for ChecksumKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.manifest_label())
    }
}

/// Hex digests of one file, one per supported algorithm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Digests {
    /// MD5 digest.
    pub md5: String,
    /// SHA-1 digest.
    pub sha1: String,
    /// SHA-256 digest.
    pub sha256: String,
}

impl Digests {
    /// Look up the digest for one algorithm.
    pub fn get(&self, kind: ChecksumKind) -> &str {
        match kind {
            ChecksumKind::Md5 => &self.md5,
            ChecksumKind::Sha1 => &self.sha1,
            ChecksumKind::Sha256 => &self.sha256,
        }
    }
}

/// Computes all manifest digests while data is written through it.
pub struct DigestWriter {
    md5: md5::Context,
    sha1: sha1::Sha1,
    sha256: sha2::Sha256,
    size: u64,
}

impl DigestWriter {
    /// Create a writer with all hashers reset.
    pub fn new() -> Self {
        Self {
            md5: md5::Context::new(),
            sha1: sha1::Sha1::new(),
            sha256: sha2::Sha256::new(),
            size: 0,
        }
    }

    /// Feed a chunk of data to every hasher.
    pub fn consume(&mut self, data: &[u8]) {
        self.size += data.len() as u64;
        self.md5.consume(data);
        self.sha1.update(data);
        self.sha256.update(data);
    }

    /// Number of bytes consumed so far.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Finish hashing and return the total size with the hex digests.
    pub fn finish(self) -> (u64, Digests) {
        let digests = Digests {
            md5: format!("{:x}", self.md5.compute()),
            sha1: hex::encode(self.sha1.finalize()),
            sha256: hex::encode(self.sha256.finalize()),
        };
        (self.size, digests)
    }
}

impl Default for DigestWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl Write for DigestWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.consume(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Digest a file's contents.
pub fn digest_file(path: &Path) -> Result<(u64, Digests)> {
    let mut writer = DigestWriter::new();
    let mut file = File::open(path)?;
    std::io::copy(&mut file, &mut writer)?;
    Ok(writer.finish())
}

/// Digest an in-memory byte slice.
pub fn digest_bytes(data: &[u8]) -> (u64, Digests) {
    let mut writer = DigestWriter::new();
    writer.consume(data);
    writer.finish()
}
