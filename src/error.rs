//! Shared error types for repository rebuild jobs.

use std::path::PathBuf;

use crate::sign::SignError;

/// Common error type for repository rebuild operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Errors from the APT index layer
    #[error("Index error: {0}")]
    Index(#[from] apt_index::AptIndexError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A version string that does not fit the release grammar
    #[error("Invalid version {version:?}: {reason}")]
    InvalidVersion { version: String, reason: String },

    /// The local staging directory could not be created
    #[error("Could not create staging directory {}: {source}", .path.display())]
    Staging {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A candidate package could not be linked into the staging tree
    #[error("Could not link {} into the repository: {source}", .package.display())]
    Link {
        package: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Transfer errors between the staging tree and the object store
    #[error("Sync error: {0}")]
    Sync(String),

    /// A pull or push for one remote failed
    #[error("Syncing {remote}: {source}")]
    Remote {
        remote: String,
        #[source]
        source: Box<Error>,
    },

    /// Signing errors from the notary client
    #[error("Signing {}: {source}", .path.display())]
    Signing {
        path: PathBuf,
        #[source]
        source: SignError,
    },

    /// An external command could not be started
    #[error("Could not run {command}: {source}")]
    CommandLaunch {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// An external command exited unsuccessfully
    #[error("{command} exited with {status}: {output}")]
    CommandFailed {
        command: String,
        status: String,
        output: String,
    },

    /// A per-remote pipeline exceeded the job deadline
    #[error("Rebuilding {remote} timed out after {seconds}s")]
    Timeout { remote: String, seconds: u64 },

    /// Several accumulated errors reported together
    #[error("{}", render_all(.0))]
    Multiple(Vec<Error>),
}

impl Error {
    /// Create a configuration error from any printable message.
    pub fn config(msg: impl ToString) -> Self {
        Self::Config(msg.to_string())
    }

    /// Create a sync error from any printable message.
    pub fn sync(msg: impl ToString) -> Self {
        Self::Sync(msg.to_string())
    }

    /// Collapse a batch of errors into one, if there are any.
    pub fn merge(mut errors: Vec<Error>) -> Option<Error> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Error::Multiple(errors)),
        }
    }
}

fn render_all(errors: &[Error]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, Error>;

/// Collects errors from loops and fan-out work so one failure does not
/// hide the others.
#[derive(Debug, Default)]
pub struct ErrorCatcher {
    errors: Vec<Error>,
}

impl ErrorCatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, error: Error) {
        self.errors.push(error);
    }

    pub fn add_result(&mut self, result: Result<()>) {
        if let Err(error) = result {
            self.errors.push(error);
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Consume the catcher, failing with the merged error when any were
    /// recorded.
    pub fn resolve(self) -> Result<()> {
        match Error::merge(self.errors) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// The collected errors, for callers that record rather than fail.
    pub fn into_errors(self) -> Vec<Error> {
        self.errors
    }
}
