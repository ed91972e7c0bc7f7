//! RPM repository staging and metadata regeneration.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::future::join_all;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::job::{JobContext, PackageBuilder};

/// Stages RPM packages under the architecture's `RPMS` directory, signs
/// them, and regenerates the yum metadata with `createrepo`.
pub(crate) struct RpmBuilder {
    ctx: Arc<JobContext>,
    /// One regeneration at a time per directory; different directories
    /// may rebuild concurrently.
    rebuild_locks: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl RpmBuilder {
    pub(crate) fn new(ctx: Arc<JobContext>) -> Self {
        Self {
            ctx,
            rebuild_locks: Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, dir: &Path) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.rebuild_locks.lock().unwrap();
        locks.entry(dir.to_path_buf()).or_default().clone()
    }
}

#[async_trait]
impl PackageBuilder for RpmBuilder {
    async fn inject_packages(&self, local: &Path, location: &str) -> Result<PathBuf> {
        let ctx = &self.ctx;
        let changed = local.join(location).join(&ctx.arch);
        let (new_files, mut catcher) = ctx.link_packages(&changed.join("RPMS")).await;
        debug!(
            "staged {} new packages in {}",
            new_files.len(),
            changed.display()
        );

        // every new package is signed before the metadata is regenerated
        let signings = new_files
            .into_iter()
            .map(|path| ctx.sign_and_record(path, "", true));
        for result in join_all(signings).await {
            catcher.add_result(result);
        }
        catcher.resolve()?;
        Ok(changed)
    }

    async fn rebuild_repo(&self, changed: &Path) -> Result<()> {
        let lock = self.lock_for(changed);
        let _guard = lock.lock().await;

        let tool = self.ctx.conf.tools.createrepo_path();
        debug!("running {} -d -s sha {}", tool.display(), changed.display());
        let output = Command::new(&tool)
            .arg("-d")
            .arg("-s")
            .arg("sha")
            .arg(changed)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| Error::CommandLaunch {
                command: tool.display().to_string(),
                source: err,
            })?;
        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        self.ctx.state.record_output(changed, combined.trim());
        if !output.status.success() {
            return Err(Error::CommandFailed {
                command: tool.display().to_string(),
                status: output.status.to_string(),
                output: combined.trim().to_string(),
            });
        }
        info!("rebuilt rpm metadata in {}", changed.display());

        let repomd = changed.join("repodata").join("repomd.xml");
        self.ctx.sign_and_record(repomd, "asc", false).await
    }

    fn sync_source(&self, changed: &Path) -> PathBuf {
        changed.to_path_buf()
    }
}
