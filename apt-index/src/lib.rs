//! # APT Index Library
//!
//! A Rust library for generating the index files of a binary APT repository:
//! `Packages` files (parsed and emitted as control paragraphs) and the
//! `Release` manifest with its checksum sections, plus the compression and
//! hashing support both need.
//!
//! ## Example
//!
//! ```rust
//! use apt_index::{Compression, PackageIndex, Release};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut index = PackageIndex::parse(
//!     "Package: demo\nVersion: 1.0\nArchitecture: amd64\n",
//! )?;
//! index.sort();
//!
//! let compressed = Compression::Gzip.compress(index.to_string().as_bytes())?;
//! assert!(!compressed.is_empty());
//!
//! let mut release = Release::new();
//! release.origin = Some("example".to_string());
//! release.components = vec!["main".to_string()];
//! # Ok(())
//! # }
//! ```

pub mod compression;
pub mod error;
pub mod hash;
pub mod packages;
pub mod release;

pub use compression::Compression;
pub use error::{AptIndexError, Result};
pub use hash::{digest_bytes, digest_file, ChecksumKind, Digests};
pub use packages::{BinaryPackage, PackageIndex, Paragraph};
pub use release::{IndexFileEntry, Release};

/// Compression formats written for each emitted `Packages` file.
pub const DEFAULT_COMPRESSIONS: &[Compression] = &[Compression::None, Compression::Gzip];
