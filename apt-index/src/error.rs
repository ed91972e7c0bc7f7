//! Error types for the apt-index crate.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while building or parsing index files.
#[derive(Debug, Error)]
pub enum AptIndexError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A control paragraph could not be parsed.
    #[error("Invalid paragraph: {0}")]
    InvalidParagraph(String),

    /// A paragraph is missing a field every entry must carry.
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// Compression or decompression failed.
    #[error("Compression error: {0}")]
    Compression(String),

    /// A file expected under the distribution tree was not found.
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),
}

impl AptIndexError {
    /// Create an invalid-paragraph error.
    pub fn invalid_paragraph<S: Into<String>>(msg: S) -> Self {
        Self::InvalidParagraph(msg.into())
    }

    /// Create a missing-field error.
    pub fn missing_field<S: Into<String>>(field: S) -> Self {
        Self::MissingField(field.into())
    }

    /// Create a compression error.
    pub fn compression<S: Into<String>>(msg: S) -> Self {
        Self::Compression(msg.into())
    }
}

/// Result type alias for apt-index operations.
pub type Result<T> = std::result::Result<T, AptIndexError>;
