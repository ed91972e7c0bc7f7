pub mod config;
mod deb;
pub mod error;
pub mod job;
pub mod logging;
pub mod release;
mod rpm;
pub mod sign;
pub mod sync;

pub use config::{RepoFormat, RepositoryConfig, RepositoryDefinition, ToolConfig};
pub use error::{Error, ErrorCatcher, Result};
pub use job::{collect_packages, Dependency, Job, JobType, RebuildJob};
pub use release::ReleaseVersion;
pub use sign::{SignError, Signer, SigningOptions};
pub use sync::{open_bucket, BucketOptions, LocalSyncBucket, ObjectPermissions, SyncBucket};
