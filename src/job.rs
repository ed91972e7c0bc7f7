//! The repository rebuild job and its execution pipeline.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::config::{RepoFormat, RepositoryConfig, RepositoryDefinition};
use crate::deb::DebBuilder;
use crate::error::{Error, ErrorCatcher, Result};
use crate::release::ReleaseVersion;
use crate::rpm::RpmBuilder;
use crate::sign::{SignError, Signer, SigningOptions};
use crate::sync::SyncBucket;

/// Identity of a job implementation, for queue bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobType {
    pub name: &'static str,
    pub version: u32,
}

/// When a job should run relative to prior state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Dependency {
    /// Run unconditionally.
    #[default]
    AlwaysRun,
    /// Skip when the given marker path already exists.
    SkipIfPresent(PathBuf),
}

/// A runnable unit of background work.
#[async_trait]
pub trait Job: Send + Sync {
    fn id(&self) -> &str;
    fn job_type(&self) -> JobType;
    fn dependency(&self) -> Dependency;
    /// Replace the dependency. Implementations may restrict which kinds
    /// they accept.
    fn set_dependency(&self, dependency: Dependency);
    /// Execute the job, recording rather than returning errors.
    async fn run(&self, deadline: Option<Duration>);
    fn completed(&self) -> bool;
    fn has_errors(&self) -> bool;
    /// All recorded errors merged into one message.
    fn error(&self) -> Option<String>;
}

static JOB_COUNTER: AtomicU64 = AtomicU64::new(0);

const REBUILD_JOB_TYPE: JobType = JobType {
    name: "rebuild-repo",
    version: 1,
};

/// Errors and tool output recorded while a job runs, shared by the
/// per-remote tasks.
#[derive(Debug, Default)]
pub(crate) struct JobState {
    output: Mutex<HashMap<String, String>>,
    errors: Mutex<Vec<Error>>,
}

impl JobState {
    pub(crate) fn record_output(&self, key: &Path, output: &str) {
        self.output
            .lock()
            .unwrap()
            .insert(key.display().to_string(), output.trim().to_string());
    }

    pub(crate) fn add_error(&self, error: Error) {
        warn!("recording job error: {}", error);
        self.errors.lock().unwrap().push(error);
    }

    pub(crate) fn has_errors(&self) -> bool {
        !self.errors.lock().unwrap().is_empty()
    }

    pub(crate) fn merged(&self) -> Option<String> {
        let errors = self.errors.lock().unwrap();
        if errors.is_empty() {
            None
        } else {
            Some(
                errors
                    .iter()
                    .map(|e| e.to_string())
                    .collect::<Vec<_>>()
                    .join("; "),
            )
        }
    }

    pub(crate) fn error_messages(&self) -> Vec<String> {
        self.errors
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.to_string())
            .collect()
    }

    pub(crate) fn output_snapshot(&self) -> HashMap<String, String> {
        self.output.lock().unwrap().clone()
    }
}

/// Everything the format builders need to stage and sign packages.
pub(crate) struct JobContext {
    pub(crate) conf: RepositoryConfig,
    pub(crate) distro: RepositoryDefinition,
    pub(crate) release: ReleaseVersion,
    /// Repository directory name for the build architecture.
    pub(crate) arch: String,
    pub(crate) package_paths: Vec<PathBuf>,
    pub(crate) signer: Signer,
    pub(crate) state: Arc<JobState>,
}

impl JobContext {
    /// Hard-link the candidate packages into `dest`, returning the newly
    /// staged files. Files already present are left alone so reruns are
    /// safe. For development builds the embedded version is replaced
    /// with the series name and stale copies under either name are
    /// dropped first, keeping one rolling nightly per series.
    pub(crate) async fn link_packages(&self, dest: &Path) -> (Vec<PathBuf>, ErrorCatcher) {
        let mut catcher = ErrorCatcher::new();
        let mut new_files = Vec::new();
        if let Err(err) = tokio::fs::create_dir_all(dest).await {
            catcher.add(Error::Staging {
                path: dest.to_path_buf(),
                source: err,
            });
            return (new_files, catcher);
        }
        let suffix = self.distro.format.package_suffix();
        for package in &self.package_paths {
            if self.distro.format == RepoFormat::Deb
                && !package.to_string_lossy().ends_with(suffix)
            {
                debug!(
                    "skipping {}, not a {} package",
                    package.display(),
                    self.distro.format
                );
                continue;
            }
            let Some(name) = package.file_name().and_then(|n| n.to_str()) else {
                catcher.add(Error::Link {
                    package: package.clone(),
                    source: io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "package path has no file name",
                    ),
                });
                continue;
            };
            let mut mirror = dest.join(name);
            if self.release.is_development_build() {
                if mirror.exists() {
                    remove_stale(&mirror).await;
                }
                if name.contains(self.release.as_str()) {
                    let renamed = name.replacen(self.release.as_str(), self.release.series(), 1);
                    mirror = dest.join(renamed);
                    if mirror.exists() {
                        remove_stale(&mirror).await;
                    }
                }
            }
            if mirror.exists() {
                debug!("{} is already staged", mirror.display());
                continue;
            }
            match tokio::fs::hard_link(package, &mirror).await {
                Ok(()) => {
                    debug!("linked {} into {}", package.display(), dest.display());
                    new_files.push(mirror);
                }
                Err(err) => catcher.add(Error::Link {
                    package: package.clone(),
                    source: err,
                }),
            }
        }
        (new_files, catcher)
    }

    /// Sign one file, retaining the notary client output in the job log
    /// whether or not the client succeeded.
    pub(crate) async fn sign_and_record(
        &self,
        path: PathBuf,
        archive_extension: &str,
        overwrite: bool,
    ) -> Result<()> {
        match self
            .signer
            .sign_file(&path, archive_extension, overwrite)
            .await
        {
            Ok(output) => {
                self.state.record_output(&path, &output);
                Ok(())
            }
            Err(err) => {
                if let SignError::ClientFailed { output, .. } = &err {
                    self.state.record_output(&path, output);
                }
                Err(Error::Signing { path, source: err })
            }
        }
    }
}

async fn remove_stale(path: &Path) {
    if let Err(err) = tokio::fs::remove_file(path).await {
        warn!("could not remove stale package {}: {}", path.display(), err);
    }
}

/// Format-specific staging and metadata regeneration.
#[async_trait]
pub(crate) trait PackageBuilder: Send + Sync {
    /// Stage the candidate packages under `local/{location}` and return
    /// the changed directory.
    async fn inject_packages(&self, local: &Path, location: &str) -> Result<PathBuf>;
    /// Regenerate repository metadata for a changed directory and sign
    /// it.
    async fn rebuild_repo(&self, changed: &Path) -> Result<()>;
    /// The subtree to republish afterwards: the whole distribution
    /// directory for DEB, the changed directory itself for RPM.
    fn sync_source(&self, changed: &Path) -> PathBuf;
}

/// Select the format builder for a definition.
fn builder_for(ctx: Arc<JobContext>) -> Arc<dyn PackageBuilder> {
    match ctx.distro.format {
        RepoFormat::Deb => Arc::new(DebBuilder::new(ctx)),
        RepoFormat::Rpm => Arc::new(RpmBuilder::new(ctx)),
    }
}

/// Rebuilds every remote repository of one distro definition with a new
/// batch of packages, then republishes them.
pub struct RebuildJob {
    id: String,
    dependency: Mutex<Dependency>,
    completed: AtomicBool,
    state: Arc<JobState>,
    setup: Option<(Arc<JobContext>, Arc<dyn PackageBuilder>)>,
    bucket: Arc<dyn SyncBucket>,
    working_dirs: Mutex<Vec<PathBuf>>,
}

impl std::fmt::Debug for RebuildJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RebuildJob")
            .field("id", &self.id)
            .field("dependency", &self.dependency)
            .field("completed", &self.completed)
            .field("state", &self.state)
            .field("working_dirs", &self.working_dirs)
            .finish_non_exhaustive()
    }
}

impl RebuildJob {
    /// Create a job for one distro definition. `distro` may be absent
    /// when the caller could not resolve one; the job then records the
    /// problem when run.
    pub fn new(
        conf: RepositoryConfig,
        distro: Option<RepositoryDefinition>,
        version: &str,
        arch: &str,
        packages: Vec<PathBuf>,
        signing: SigningOptions,
        bucket: Arc<dyn SyncBucket>,
    ) -> Result<Self> {
        let release = ReleaseVersion::parse(version)?;
        let name = distro
            .as_ref()
            .map(|d| d.name.clone())
            .unwrap_or_else(|| "unknown".to_string());
        let id = format!(
            "rebuild-{}-repo-{}",
            name,
            JOB_COUNTER.fetch_add(1, Ordering::SeqCst) + 1
        );
        let state = Arc::new(JobState::default());
        let setup = distro.map(|distro| {
            let signer = Signer::new(signing, distro.format, release.clone());
            let ctx = Arc::new(JobContext {
                arch: distro.arch_for(arch),
                conf,
                distro,
                release,
                package_paths: packages,
                signer,
                state: state.clone(),
            });
            let builder = builder_for(ctx.clone());
            (ctx, builder)
        });
        Ok(Self {
            id,
            dependency: Mutex::new(Dependency::AlwaysRun),
            completed: AtomicBool::new(false),
            state,
            setup,
            bucket,
            working_dirs: Mutex::new(Vec::new()),
        })
    }

    /// Directories the job staged repositories under, for post-run
    /// cleanup.
    pub fn working_dirs(&self) -> Vec<PathBuf> {
        self.working_dirs.lock().unwrap().clone()
    }

    /// Output captured from the external tools, keyed by the path they
    /// operated on.
    pub fn output(&self) -> HashMap<String, String> {
        self.state.output_snapshot()
    }

    /// Messages of all recorded errors, in the order they happened.
    pub fn errors(&self) -> Vec<String> {
        self.state.error_messages()
    }
}

#[async_trait]
impl Job for RebuildJob {
    fn id(&self) -> &str {
        &self.id
    }

    fn job_type(&self) -> JobType {
        REBUILD_JOB_TYPE
    }

    fn dependency(&self) -> Dependency {
        self.dependency.lock().unwrap().clone()
    }

    fn set_dependency(&self, dependency: Dependency) {
        match dependency {
            Dependency::AlwaysRun => {
                *self.dependency.lock().unwrap() = Dependency::AlwaysRun;
            }
            other => warn!(
                "{} only accepts the always-run dependency, ignoring {:?}",
                self.id, other
            ),
        }
    }

    async fn run(&self, deadline: Option<Duration>) {
        let _complete = CompletionGuard(&self.completed);

        let Some((ctx, builder)) = self.setup.clone() else {
            self.state.add_error(Error::config(format!(
                "no repository definition configured for {}",
                self.id
            )));
            return;
        };

        let limit = deadline.unwrap_or_else(|| default_deadline(&ctx.release));
        info!(
            "{}: rebuilding {} repositories for {} {} within {:?}",
            self.id,
            ctx.distro.repos.len(),
            ctx.distro.name,
            ctx.release,
            limit
        );

        let mut handles = Vec::new();
        for remote in ctx.distro.repos.clone() {
            let ctx = ctx.clone();
            let builder = builder.clone();
            let bucket = self.bucket.clone();
            let task_remote = remote.clone();
            handles.push((
                remote,
                tokio::spawn(async move {
                    tokio::time::timeout(limit, process_remote(ctx, builder, bucket, task_remote))
                        .await
                }),
            ));
        }

        for (remote, handle) in handles {
            match handle.await {
                Ok(Ok(Some(local))) => self.working_dirs.lock().unwrap().push(local),
                Ok(Ok(None)) => {}
                Ok(Err(_)) => {
                    self.state.add_error(Error::Timeout {
                        remote: remote.clone(),
                        seconds: limit.as_secs(),
                    });
                    let local = ctx.conf.workspace.join(&remote);
                    if local.exists() {
                        self.working_dirs.lock().unwrap().push(local);
                    }
                }
                Err(err) => {
                    self.state.add_error(Error::sync(format!(
                        "rebuild task for {} failed: {}",
                        remote, err
                    )));
                }
            }
        }

        match self.state.merged() {
            Some(message) => error!(
                "{}: completed rebuilding {} {} with errors: {}",
                self.id, ctx.distro.name, ctx.release, message
            ),
            None => info!(
                "{}: completed rebuilding {} {}",
                self.id, ctx.distro.name, ctx.release
            ),
        }
    }

    fn completed(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }

    fn has_errors(&self) -> bool {
        self.state.has_errors()
    }

    fn error(&self) -> Option<String> {
        self.state.merged()
    }
}

/// Marks the job complete when dropped, covering every exit path out of
/// `run`.
struct CompletionGuard<'a>(&'a AtomicBool);

impl Drop for CompletionGuard<'_> {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Deadline applied when the caller does not give one. Development
/// repositories cannot drop old builds yet, so their rebuilds sweep more
/// packages and get a longer window.
fn default_deadline(release: &ReleaseVersion) -> Duration {
    if release.is_development_build() || release.is_development_series() {
        Duration::from_secs(60 * 60)
    } else {
        Duration::from_secs(30 * 60)
    }
}

/// Pull one remote repository, stage the new packages, rebuild the
/// metadata, and push the changed subtree back. Problems are recorded on
/// the job state; the staging directory is returned once it exists so
/// the caller can report it for cleanup.
async fn process_remote(
    ctx: Arc<JobContext>,
    builder: Arc<dyn PackageBuilder>,
    bucket: Arc<dyn SyncBucket>,
    remote: String,
) -> Option<PathBuf> {
    let local = ctx.conf.workspace.join(&remote);
    if let Err(err) = tokio::fs::create_dir_all(&local).await {
        ctx.state.add_error(Error::Staging {
            path: local,
            source: err,
        });
        return None;
    }

    let location = ctx.release.package_location();
    let remote_location = join_remote(&remote, Path::new(&location));
    debug!("pulling {} into {}", remote_location, local.display());
    if let Err(err) = bucket.pull(&local.join(&location), &remote_location).await {
        ctx.state.add_error(Error::Remote {
            remote: remote_location,
            source: Box::new(err),
        });
        return Some(local);
    }

    info!("staging new packages for {}", remote);
    let changed = match builder.inject_packages(&local, &location).await {
        Ok(changed) => changed,
        Err(err) => {
            ctx.state.add_error(err);
            return Some(local);
        }
    };

    info!("rebuilding repository metadata in {}", changed.display());
    if let Err(err) = builder.rebuild_repo(&changed).await {
        ctx.state.add_error(err);
        return Some(local);
    }

    let source = builder.sync_source(&changed);
    let relative = match source.strip_prefix(&local) {
        Ok(relative) => relative,
        Err(_) => {
            ctx.state.add_error(Error::config(format!(
                "changed directory {} is outside the staging tree {}",
                source.display(),
                local.display()
            )));
            return Some(local);
        }
    };
    let remote_prefix = join_remote(&remote, relative);

    info!("pushing {} to {}", source.display(), remote_prefix);
    if let Err(err) = bucket.push(&source, &remote_prefix).await {
        ctx.state.add_error(Error::Remote {
            remote: remote_prefix,
            source: Box::new(err),
        });
        return Some(local);
    }

    info!("finished rebuilding {}", remote);
    Some(local)
}

fn join_remote(remote: &str, relative: &Path) -> String {
    Path::new(remote).join(relative).to_string_lossy().into_owned()
}

/// Collect the package files with the given suffix from a directory,
/// sorted by name. A directory with no matching packages is an error.
pub fn collect_packages(dir: &Path, suffix: &str) -> Result<Vec<PathBuf>> {
    let mut packages = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_file() && path.to_string_lossy().ends_with(suffix) {
            packages.push(path);
        }
    }
    if packages.is_empty() {
        return Err(Error::config(format!(
            "no {} packages found in {}",
            suffix,
            dir.display()
        )));
    }
    packages.sort();
    Ok(packages)
}
