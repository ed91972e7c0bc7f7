//! Transfer layer between the local staging tree and the object store.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Access policy applied to pushed objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ObjectPermissions {
    #[default]
    Private,
    PublicRead,
}

/// Settings for a bucket connection.
#[derive(Debug, Clone)]
pub struct BucketOptions {
    /// Bucket the repositories are served from.
    pub bucket: String,
    /// Region the bucket lives in.
    pub region: String,
    /// Credential profile to bill the transfer to.
    pub profile: Option<String>,
    /// Log transfers without performing them.
    pub dry_run: bool,
    /// Log every file touched.
    pub verbose: bool,
    /// Attempts per transfer before giving up.
    pub max_retries: u32,
    /// Access policy for pushed objects.
    pub permissions: ObjectPermissions,
}

impl Default for BucketOptions {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            region: "us-east-1".to_string(),
            profile: None,
            dry_run: false,
            verbose: false,
            max_retries: 10,
            permissions: ObjectPermissions::PublicRead,
        }
    }
}

/// Pulls and pushes directory trees between local staging directories
/// and remote prefixes of a bucket.
#[async_trait]
pub trait SyncBucket: Send + Sync {
    /// Mirror a remote prefix into a local directory. A prefix that does
    /// not exist yet is not an error.
    async fn pull(&self, local: &Path, remote: &str) -> Result<()>;
    /// Mirror a local directory to a remote prefix.
    async fn push(&self, local: &Path, remote: &str) -> Result<()>;
}

/// Bucket backend serving a directory tree on the local filesystem, used
/// for tests and offline mirrors. Remote prefixes live under
/// `root/{bucket}/`.
pub struct LocalSyncBucket {
    root: PathBuf,
    options: BucketOptions,
}

impl LocalSyncBucket {
    pub fn new(root: PathBuf, options: BucketOptions) -> Self {
        Self { root, options }
    }

    fn remote_dir(&self, remote: &str) -> PathBuf {
        self.root.join(&self.options.bucket).join(remote)
    }

    async fn transfer(&self, source: &Path, dest: &Path, direction: &str) -> Result<()> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match copy_tree(source, dest, self.options.verbose) {
                Ok(count) => {
                    debug!(
                        "{}ed {} files from {} to {}",
                        direction,
                        count,
                        source.display(),
                        dest.display()
                    );
                    return Ok(());
                }
                Err(err) if attempts < self.options.max_retries => {
                    warn!(
                        "{} from {} failed (attempt {}): {}",
                        direction,
                        source.display(),
                        attempts,
                        err
                    );
                    tokio::time::sleep(Duration::from_millis(100 * u64::from(attempts))).await;
                }
                Err(err) => {
                    return Err(Error::sync(format!(
                        "{} from {} to {} failed after {} attempts: {}",
                        direction,
                        source.display(),
                        dest.display(),
                        attempts,
                        err
                    )));
                }
            }
        }
    }
}

#[async_trait]
impl SyncBucket for LocalSyncBucket {
    async fn pull(&self, local: &Path, remote: &str) -> Result<()> {
        let source = self.remote_dir(remote);
        if self.options.dry_run {
            info!(
                "dry run: skipping pull of {} into {}",
                remote,
                local.display()
            );
            return Ok(());
        }
        if !source.is_dir() {
            debug!("remote prefix {} does not exist yet", remote);
            return Ok(());
        }
        self.transfer(&source, local, "pull").await
    }

    async fn push(&self, local: &Path, remote: &str) -> Result<()> {
        let dest = self.remote_dir(remote);
        if self.options.dry_run {
            info!(
                "dry run: skipping push of {} to {}",
                local.display(),
                remote
            );
            return Ok(());
        }
        self.transfer(local, &dest, "push").await
    }
}

/// Copy a directory tree, returning the number of files written.
fn copy_tree(source: &Path, dest: &Path, verbose: bool) -> io::Result<usize> {
    std::fs::create_dir_all(dest)?;
    let mut copied = 0;
    for entry in std::fs::read_dir(source)? {
        let entry = entry?;
        let target = dest.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copied += copy_tree(&entry.path(), &target, verbose)?;
        } else {
            if verbose {
                debug!("copying {} to {}", entry.path().display(), target.display());
            }
            std::fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }
    Ok(copied)
}

/// Open the bucket for a storage location: plain paths and `file://`
/// URLs get the local backend, anything else is left to the
/// deployment's own sync client.
pub fn open_bucket(location: &str, options: BucketOptions) -> Result<Arc<dyn SyncBucket>> {
    if let Some(path) = location.strip_prefix("file://") {
        return Ok(Arc::new(LocalSyncBucket::new(PathBuf::from(path), options)));
    }
    if !location.contains("://") {
        return Ok(Arc::new(LocalSyncBucket::new(
            PathBuf::from(location),
            options,
        )));
    }
    Err(Error::sync(format!(
        "unsupported storage location {:?}",
        location
    )))
}
