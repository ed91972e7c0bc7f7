//! Configuration for repository rebuild jobs.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};

/// Repository layout understood by a definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoFormat {
    Deb,
    Rpm,
}

impl RepoFormat {
    /// File suffix of packages belonging to this format.
    pub fn package_suffix(&self) -> &'static str {
        match self {
            RepoFormat::Deb => ".deb",
            RepoFormat::Rpm => ".rpm",
        }
    }
}

impl std::fmt::Display for RepoFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RepoFormat::Deb => write!(f, "deb"),
            RepoFormat::Rpm => write!(f, "rpm"),
        }
    }
}

impl FromStr for RepoFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "deb" => Ok(RepoFormat::Deb),
            "rpm" => Ok(RepoFormat::Rpm),
            other => Err(Error::config(format!(
                "unsupported repository format {:?}",
                other
            ))),
        }
    }
}

/// One rebuildable repository: a distro and edition pair mapped to the
/// bucket and remote paths that serve it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryDefinition {
    /// Distro name, such as `ubuntu2004` or `rhel80`.
    pub name: String,
    /// Edition the repository serves, such as `org` or `enterprise`.
    pub edition: String,
    /// Package and metadata format of the repository.
    #[serde(rename = "type")]
    pub format: RepoFormat,
    /// Object store bucket the repository is served from.
    pub bucket: String,
    /// Region the bucket lives in.
    #[serde(default = "default_region")]
    pub region: String,
    /// Remote repository roots to rebuild, relative to the bucket.
    pub repos: Vec<String>,
    /// Component new DEB packages are filed under.
    #[serde(default = "default_component")]
    pub component: String,
    /// Architectures the repository carries.
    #[serde(default)]
    pub architectures: Vec<String>,
    /// Distribution codename recorded in DEB release manifests.
    #[serde(default)]
    pub codename: Option<String>,
    /// Maps build architectures to the directory names the repository
    /// uses, such as `x86_64` to `amd64`.
    #[serde(default)]
    pub arch_aliases: HashMap<String, String>,
}

impl RepositoryDefinition {
    /// Resolve the repository directory name for a build architecture.
    pub fn arch_for(&self, arch: &str) -> String {
        match self.arch_aliases.get(arch) {
            Some(alias) => alias.clone(),
            None => arch.to_string(),
        }
    }
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_component() -> String {
    "main".to_string()
}

/// Paths to the external tools the rebuild shells out to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolConfig {
    /// Notary signing client, `notary-client.py` on PATH by default.
    #[serde(default)]
    pub notary_client: Option<PathBuf>,
    /// DEB index scanner, `dpkg-scanpackages` on PATH by default.
    #[serde(default)]
    pub dpkg_scanpackages: Option<PathBuf>,
    /// RPM metadata generator, `createrepo` on PATH by default.
    #[serde(default)]
    pub createrepo: Option<PathBuf>,
}

impl ToolConfig {
    pub fn notary_client_path(&self) -> PathBuf {
        self.notary_client
            .clone()
            .unwrap_or_else(|| PathBuf::from("notary-client.py"))
    }

    pub fn scanpackages_path(&self) -> PathBuf {
        self.dpkg_scanpackages
            .clone()
            .unwrap_or_else(|| PathBuf::from("dpkg-scanpackages"))
    }

    pub fn createrepo_path(&self) -> PathBuf {
        self.createrepo
            .clone()
            .unwrap_or_else(|| PathBuf::from("createrepo"))
    }
}

/// Top level configuration for rebuild jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Directory repositories are staged under while rebuilding.
    #[serde(default = "default_workspace")]
    pub workspace: PathBuf,
    /// Root location of the object store, either a plain path or a
    /// `file://` URL.
    #[serde(default)]
    pub storage_location: Option<String>,
    /// Base URL of the notary signing service.
    #[serde(default)]
    pub notary_url: Option<Url>,
    /// Log transfers without performing them.
    #[serde(default)]
    pub dry_run: bool,
    /// Log every file the sync layer touches.
    #[serde(default)]
    pub verbose: bool,
    #[serde(default)]
    pub tools: ToolConfig,
    /// Repositories this deployment can rebuild.
    #[serde(default)]
    pub definitions: Vec<RepositoryDefinition>,
}

fn default_workspace() -> PathBuf {
    PathBuf::from(".")
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            workspace: default_workspace(),
            storage_location: None,
            notary_url: None,
            dry_run: false,
            verbose: false,
            tools: ToolConfig::default(),
            definitions: Vec::new(),
        }
    }
}

impl RepositoryConfig {
    /// Load and validate a configuration file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration as formatted JSON.
    pub fn to_file(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Check every definition for the fields a rebuild cannot run
    /// without.
    pub fn validate(&self) -> Result<()> {
        for definition in &self.definitions {
            if definition.name.is_empty() {
                return Err(Error::config("definition with an empty name"));
            }
            if definition.bucket.is_empty() {
                return Err(Error::config(format!(
                    "definition {:?} has no bucket",
                    definition.name
                )));
            }
            if definition.repos.is_empty() {
                return Err(Error::config(format!(
                    "definition {:?} has no repos to rebuild",
                    definition.name
                )));
            }
        }
        Ok(())
    }

    /// Find the definition for a distro name and edition.
    pub fn definition(&self, name: &str, edition: &str) -> Option<&RepositoryDefinition> {
        self.definitions
            .iter()
            .find(|d| d.name == name && d.edition == edition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RepositoryConfig {
        RepositoryConfig {
            definitions: vec![
                RepositoryDefinition {
                    name: "ubuntu2004".to_string(),
                    edition: "org".to_string(),
                    format: RepoFormat::Deb,
                    bucket: "repo.example.com".to_string(),
                    region: default_region(),
                    repos: vec!["apt/ubuntu".to_string()],
                    component: "multiverse".to_string(),
                    architectures: vec!["amd64".to_string(), "arm64".to_string()],
                    codename: Some("focal".to_string()),
                    arch_aliases: HashMap::from([("x86_64".to_string(), "amd64".to_string())]),
                },
                RepositoryDefinition {
                    name: "rhel80".to_string(),
                    edition: "enterprise".to_string(),
                    format: RepoFormat::Rpm,
                    bucket: "repo.example.com".to_string(),
                    region: default_region(),
                    repos: vec!["yum/redhat/8".to_string()],
                    component: default_component(),
                    architectures: vec!["x86_64".to_string()],
                    codename: None,
                    arch_aliases: HashMap::new(),
                },
            ],
            ..Default::default()
        }
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("repopress.json");
        let config = sample();
        config.to_file(&path).unwrap();
        let loaded = RepositoryConfig::from_file(&path).unwrap();
        assert_eq!(loaded.definitions.len(), 2);
        assert_eq!(loaded.definitions[0].format, RepoFormat::Deb);
        assert_eq!(loaded.definitions[0].component, "multiverse");
        assert_eq!(loaded.definitions[1].codename, None);
    }

    #[test]
    fn test_definition_lookup() {
        let config = sample();
        assert!(config.definition("ubuntu2004", "org").is_some());
        assert!(config.definition("ubuntu2004", "enterprise").is_none());
        assert!(config.definition("debian81", "org").is_none());
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("deb".parse::<RepoFormat>().unwrap(), RepoFormat::Deb);
        assert_eq!("rpm".parse::<RepoFormat>().unwrap(), RepoFormat::Rpm);
        assert!("tarball".parse::<RepoFormat>().is_err());
        let err = serde_json::from_str::<RepoFormat>("\"apk\"").unwrap_err();
        assert!(err.to_string().contains("unknown variant"));
    }

    #[test]
    fn test_arch_alias() {
        let config = sample();
        let deb = config.definition("ubuntu2004", "org").unwrap();
        assert_eq!(deb.arch_for("x86_64"), "amd64");
        assert_eq!(deb.arch_for("s390x"), "s390x");
    }

    #[test]
    fn test_validate_rejects_empty_repos() {
        let mut config = sample();
        config.definitions[1].repos.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_defaults_applied() {
        let parsed: RepositoryConfig = serde_json::from_str(
            r#"{"definitions": [{"name": "debian12", "edition": "org", "type": "deb", "bucket": "b", "repos": ["apt/debian"]}]}"#,
        )
        .unwrap();
        assert_eq!(parsed.workspace, PathBuf::from("."));
        assert_eq!(parsed.definitions[0].region, "us-east-1");
        assert_eq!(parsed.definitions[0].component, "main");
        assert!(!parsed.dry_run);
        assert!(parsed.tools.notary_client.is_none());
        assert_eq!(
            parsed.tools.scanpackages_path(),
            PathBuf::from("dpkg-scanpackages")
        );
    }
}
