//! The `Release` manifest summarizing a distribution tree.
//!
//! A manifest lists repository metadata (origin, suite, architectures) and a
//! checksum section per algorithm covering every index file below the
//! distribution directory.

use crate::hash::{digest_file, ChecksumKind, Digests};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// One file listed in the manifest's checksum sections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexFileEntry {
    /// Path relative to the directory holding the `Release` file.
    pub path: String,
    /// Size in bytes.
    pub size: u64,
    /// Digests of the file contents.
    pub digests: Digests,
}

/// A `Release` manifest for one distribution directory.
#[derive(Debug, Clone)]
pub struct Release {
    /// Origin of the repository.
    pub origin: Option<String>,
    /// Human-readable label.
    pub label: Option<String>,
    /// Suite name (e.g. the release series).
    pub suite: Option<String>,
    /// Codename of the distribution.
    pub codename: Option<String>,
    /// Architectures served by this distribution.
    pub architectures: Vec<String>,
    /// Components served by this distribution.
    pub components: Vec<String>,
    /// Generation timestamp.
    pub date: DateTime<Utc>,
    /// Index files covered by the checksum sections.
    pub files: Vec<IndexFileEntry>,
}

impl Release {
    /// Create an empty manifest dated now.
    pub fn new() -> Self {
        Self {
            origin: None,
            label: None,
            suite: None,
            codename: None,
            architectures: Vec::new(),
            components: Vec::new(),
            date: Utc::now(),
            files: Vec::new(),
        }
    }

    /// Hash every index file under `dist_dir`, replacing the file list.
    ///
    /// Index files are `Packages` and its compressed variants, found at any
    /// depth below the distribution directory.
    pub fn scan_index_files(&mut self, dist_dir: &Path) -> Result<()> {
        let mut files = Vec::new();
        collect_index_files(dist_dir, dist_dir, &mut files)?;
        files.sort_by(|a, b| a.path.cmp(&b.path));
        self.files = files;
        Ok(())
    }

    /// Write the manifest to `dist_dir/Release` and return its path.
    pub fn write_to(&self, dist_dir: &Path) -> Result<PathBuf> {
        let path = dist_dir.join("Release");
        fs::write(&path, self.to_string())?;
        Ok(path)
    }
}

impl Default for Release {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Release {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(origin) = &self.origin {
            writeln!(f, "Origin: {}", origin)?;
        }
        if let Some(label) = &self.label {
            writeln!(f, "Label: {}", label)?;
        }
        if let Some(suite) = &self.suite {
            writeln!(f, "Suite: {}", suite)?;
        }
        if let Some(codename) = &self.codename {
            writeln!(f, "Codename: {}", codename)?;
        }
        if !self.architectures.is_empty() {
            writeln!(f, "Architectures: {}", self.architectures.join(" "))?;
        }
        if !self.components.is_empty() {
            writeln!(f, "Components: {}", self.components.join(" "))?;
        }
        writeln!(f, "Date: {}", self.date.format("%a, %d %b %Y %H:%M:%S %z"))?;
        for kind in ChecksumKind::all() {
            if self.files.is_empty() {
                break;
            }
            writeln!(f, "{}:", kind.manifest_label())?;
            for file in &self.files {
                writeln!(f, " {} {} {}", file.digests.get(*kind), file.size, file.path)?;
            }
        }
        Ok(())
    }
}

fn collect_index_files(root: &Path, dir: &Path, files: &mut Vec<IndexFileEntry>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_index_files(root, &path, files)?;
        } else if is_index_file(&path) {
            let (size, digests) = digest_file(&path)?;
            let relative = path.strip_prefix(root).unwrap_or(&path);
            files.push(IndexFileEntry {
                path: relative.to_string_lossy().into_owned(),
                size,
                digests,
            });
        }
    }
    Ok(())
}

fn is_index_file(path: &Path) -> bool {
    match path.file_name().and_then(|name| name.to_str()) {
        Some(name) => name == "Packages" || name.starts_with("Packages."),
        None => false,
    }
}
