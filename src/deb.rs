//! DEB repository staging and index regeneration.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use apt_index::{PackageIndex, Release, DEFAULT_COMPRESSIONS};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::job::{JobContext, PackageBuilder};

/// Stages DEB packages into the component directory and regenerates the
/// APT indices around them.
pub(crate) struct DebBuilder {
    ctx: Arc<JobContext>,
}

impl DebBuilder {
    pub(crate) fn new(ctx: Arc<JobContext>) -> Self {
        Self { ctx }
    }

    /// Run `dpkg-scanpackages` over one architecture directory, relative
    /// to the distribution directory, and return the Packages body.
    async fn scan_packages(&self, dist_dir: &Path, arch_dir: &Path) -> Result<String> {
        let tool = self.ctx.conf.tools.scanpackages_path();
        let relative = arch_dir.strip_prefix(dist_dir).unwrap_or(arch_dir);
        debug!(
            "running {} --multiversion {} in {}",
            tool.display(),
            relative.display(),
            dist_dir.display()
        );
        let output = Command::new(&tool)
            .arg("--multiversion")
            .arg(relative)
            .current_dir(dist_dir)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| Error::CommandLaunch {
                command: tool.display().to_string(),
                source: err,
            })?;
        let stderr = String::from_utf8_lossy(&output.stderr);
        self.ctx.state.record_output(arch_dir, stderr.trim());
        if !output.status.success() {
            return Err(Error::CommandFailed {
                command: tool.display().to_string(),
                status: output.status.to_string(),
                output: stderr.trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Regenerate `Packages` and its compressed copies for one
    /// architecture directory.
    async fn rebuild_arch_indices(&self, dist_dir: &Path, arch_dir: &Path) -> Result<()> {
        let body = self.scan_packages(dist_dir, arch_dir).await?;
        let mut index = PackageIndex::parse(&body)?;
        index.sort();
        let rendered = index.to_string();
        for compression in DEFAULT_COMPRESSIONS {
            let path = arch_dir.join(format!("Packages{}", compression.extension()));
            let data = compression.compress(rendered.as_bytes())?;
            tokio::fs::write(&path, data).await?;
        }
        info!(
            "wrote indices for {} packages in {}",
            index.len(),
            arch_dir.display()
        );
        Ok(())
    }

    /// Write a fresh `Release` manifest over the distribution directory.
    async fn write_release(&self, dist_dir: &Path) -> Result<PathBuf> {
        let ctx = &self.ctx;
        let mut release = Release::new();
        release.origin = Some(ctx.distro.name.clone());
        release.label = Some(ctx.distro.name.clone());
        release.suite = Some(ctx.release.package_location());
        release.codename = ctx.distro.codename.clone();
        release.architectures = if ctx.distro.architectures.is_empty() {
            vec![ctx.arch.clone()]
        } else {
            ctx.distro.architectures.clone()
        };
        release.components = vec![ctx.distro.component.clone()];
        release.scan_index_files(dist_dir)?;
        let path = release.write_to(dist_dir)?;
        info!("wrote release manifest {}", path.display());
        Ok(path)
    }
}

#[async_trait]
impl PackageBuilder for DebBuilder {
    async fn inject_packages(&self, local: &Path, location: &str) -> Result<PathBuf> {
        let ctx = &self.ctx;
        let component_dir = local.join(location).join(&ctx.distro.component);
        let arch_dir = component_dir.join(format!("binary-{}", ctx.arch));
        let (new_files, catcher) = ctx.link_packages(&arch_dir).await;
        debug!(
            "staged {} new packages in {}",
            new_files.len(),
            arch_dir.display()
        );
        catcher.resolve()?;
        Ok(component_dir)
    }

    async fn rebuild_repo(&self, changed: &Path) -> Result<()> {
        let dist_dir = changed.parent().ok_or_else(|| {
            Error::config(format!(
                "component directory {} has no parent",
                changed.display()
            ))
        })?;

        // every architecture directory gets fresh indices, not only the
        // one that changed
        let mut arch_dirs = Vec::new();
        let mut entries = tokio::fs::read_dir(changed).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if entry.file_type().await?.is_dir() && name.to_string_lossy().starts_with("binary-") {
                arch_dirs.push(entry.path());
            }
        }
        arch_dirs.sort();
        if arch_dirs.is_empty() {
            return Err(Error::config(format!(
                "no architecture directories under {}",
                changed.display()
            )));
        }
        for arch_dir in &arch_dirs {
            self.rebuild_arch_indices(dist_dir, arch_dir).await?;
        }

        let release_path = self.write_release(dist_dir).await?;
        self.ctx.sign_and_record(release_path, "gpg", false).await
    }

    fn sync_source(&self, changed: &Path) -> PathBuf {
        changed.parent().unwrap_or(changed).to_path_buf()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RepoFormat, RepositoryConfig, RepositoryDefinition};
    use crate::job::JobState;
    use crate::release::ReleaseVersion;
    use crate::sign::{Signer, SigningOptions};
    use std::collections::HashMap;

    fn context_full(
        conf: RepositoryConfig,
        signing: SigningOptions,
        packages: Vec<PathBuf>,
    ) -> Arc<JobContext> {
        let distro = RepositoryDefinition {
            name: "ubuntu2004".to_string(),
            edition: "org".to_string(),
            format: RepoFormat::Deb,
            bucket: "repo-bucket".to_string(),
            region: "us-east-1".to_string(),
            repos: vec!["repo/apt/ubuntu".to_string()],
            component: "multiverse".to_string(),
            architectures: vec!["amd64".to_string()],
            codename: Some("focal".to_string()),
            arch_aliases: HashMap::new(),
        };
        let release = ReleaseVersion::parse("4.2.1").unwrap();
        Arc::new(JobContext {
            arch: "amd64".to_string(),
            signer: Signer::new(signing, RepoFormat::Deb, release.clone()),
            conf,
            distro,
            release,
            package_paths: packages,
            state: Arc::new(JobState::default()),
        })
    }

    fn context(packages: Vec<PathBuf>) -> Arc<JobContext> {
        context_full(
            RepositoryConfig::default(),
            SigningOptions::default(),
            packages,
        )
    }

    fn stub_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    #[tokio::test]
    async fn test_inject_stages_into_component_arch_dir() {
        let dir = tempfile::tempdir().unwrap();
        let package = dir.path().join("server_4.2.1_amd64.deb");
        std::fs::write(&package, "deb").unwrap();

        let builder = DebBuilder::new(context(vec![package]));
        let local = dir.path().join("staging");
        let changed = builder.inject_packages(&local, "4.2").await.unwrap();
        assert_eq!(changed, local.join("4.2/multiverse"));
        assert!(changed.join("binary-amd64/server_4.2.1_amd64.deb").exists());
    }

    #[test]
    fn test_sync_source_is_distribution_dir() {
        let builder = DebBuilder::new(context(vec![]));
        assert_eq!(
            builder.sync_source(Path::new("/work/repo/4.2/multiverse")),
            PathBuf::from("/work/repo/4.2")
        );
    }

    #[tokio::test]
    async fn test_rebuild_requires_architecture_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let changed = dir.path().join("4.2/multiverse");
        std::fs::create_dir_all(&changed).unwrap();
        let builder = DebBuilder::new(context(vec![]));
        let err = builder.rebuild_repo(&changed).await.unwrap_err();
        assert!(err.to_string().contains("no architecture directories"));
    }

    #[tokio::test]
    async fn test_rebuild_writes_indices_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let scanner = stub_script(
            dir.path(),
            "dpkg-scanpackages",
            "#!/bin/sh\nprintf 'Package: server\\nVersion: 4.2.1\\nArchitecture: amd64\\nFilename: %s/server_4.2.1_amd64.deb\\nSize: 3\\n' \"$2\"\n",
        );
        let notary = stub_script(dir.path(), "notary-client.py", "#!/bin/sh\necho done\n");

        let mut conf = RepositoryConfig::default();
        conf.tools.dpkg_scanpackages = Some(scanner);
        let signing = SigningOptions {
            client: notary,
            url: Some(url::Url::parse("https://notary.example.com").unwrap()),
            token: Some("sekrit".to_string()),
            ..Default::default()
        };

        let changed = dir.path().join("staging/4.2/multiverse");
        std::fs::create_dir_all(changed.join("binary-amd64")).unwrap();
        std::fs::write(changed.join("binary-amd64/server_4.2.1_amd64.deb"), "deb").unwrap();

        let ctx = context_full(conf, signing, vec![]);
        let builder = DebBuilder::new(ctx.clone());
        builder.rebuild_repo(&changed).await.unwrap();

        let packages = std::fs::read_to_string(changed.join("binary-amd64/Packages")).unwrap();
        assert!(packages.contains("Package: server"));
        assert!(packages.contains("Filename: multiverse/binary-amd64/server_4.2.1_amd64.deb"));
        assert!(changed.join("binary-amd64/Packages.gz").exists());

        let dist_dir = changed.parent().unwrap();
        let manifest = std::fs::read_to_string(dist_dir.join("Release")).unwrap();
        assert!(manifest.contains("Origin: ubuntu2004"));
        assert!(manifest.contains("Suite: 4.2"));
        assert!(manifest.contains("Codename: focal"));
        assert!(manifest.contains("Components: multiverse"));
        assert!(manifest.contains("multiverse/binary-amd64/Packages"));

        let output = ctx.state.output_snapshot();
        assert!(output
            .keys()
            .any(|key| key.ends_with("Release")), "notary output should be recorded");
    }
}
