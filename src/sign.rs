//! Package signing through the notary service client.

use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::RepoFormat;
use crate::release::ReleaseVersion;

/// Environment variable holding the standard signing token.
pub const NOTARY_TOKEN_VAR: &str = "NOTARY_TOKEN";
/// Environment variable holding the token for the legacy DEB key.
pub const NOTARY_LEGACY_TOKEN_VAR: &str = "NOTARY_TOKEN_DEB_LEGACY";
/// Environment variable overriding the signing key name.
pub const NOTARY_KEY_NAME_VAR: &str = "NOTARY_KEY_NAME";

/// DEB series still signed with the legacy key.
const LEGACY_DEB_SERIES: &[&str] = &["3.0", "2.6"];
const LEGACY_DEB_KEY: &str = "richard";

/// Signing credentials and client location, captured once at startup.
#[derive(Debug, Clone, Default)]
pub struct SigningOptions {
    /// Path to the notary client script.
    pub client: PathBuf,
    /// Base URL of the notary service.
    pub url: Option<Url>,
    /// Key name override, taking precedence over the derived name.
    pub key_name: Option<String>,
    /// Auth token for the standard keys.
    pub token: Option<String>,
    /// Auth token for the legacy DEB key.
    pub legacy_token: Option<String>,
}

impl SigningOptions {
    /// Capture signing settings from the environment, treating empty
    /// variables as unset.
    pub fn from_env(client: PathBuf, url: Option<Url>) -> Self {
        Self {
            client,
            url,
            key_name: env_nonempty(NOTARY_KEY_NAME_VAR),
            token: env_nonempty(NOTARY_TOKEN_VAR),
            legacy_token: env_nonempty(NOTARY_LEGACY_TOKEN_VAR),
        }
    }
}

fn env_nonempty(name: &str) -> Option<String> {
    match std::env::var(name) {
        Ok(value) if !value.is_empty() => Some(value),
        _ => None,
    }
}

/// Errors from the signing client.
#[derive(Debug, thiserror::Error)]
pub enum SignError {
    /// The auth token for the selected key is not configured
    #[error("signing key {key:?} requires the {variable} environment variable")]
    MissingToken { variable: &'static str, key: String },

    /// No notary service URL is configured
    #[error("no notary service URL configured")]
    MissingUrl,

    /// The target path has no file name
    #[error("cannot sign {}: not a file path", .0.display())]
    InvalidTarget(PathBuf),

    /// The client process could not be started
    #[error("could not run the notary client: {0}")]
    Launch(#[from] std::io::Error),

    /// The client exited unsuccessfully
    #[error("notary client exited with {status}: {output}")]
    ClientFailed { status: String, output: String },
}

/// Signs staged files by shelling out to the notary client, with the key
/// chosen from the repository format and release series.
#[derive(Debug)]
pub struct Signer {
    options: SigningOptions,
    format: RepoFormat,
    release: ReleaseVersion,
}

impl Signer {
    pub fn new(options: SigningOptions, format: RepoFormat, release: ReleaseVersion) -> Self {
        Self {
            options,
            format,
            release,
        }
    }

    /// The key name and token for this repository, preferring the
    /// explicit override, then the legacy DEB key for series that still
    /// use it, then the key named after the stable series.
    fn select_key(&self) -> Result<(String, String), SignError> {
        if let Some(name) = &self.options.key_name {
            let token =
                self.options
                    .token
                    .clone()
                    .ok_or_else(|| SignError::MissingToken {
                        variable: NOTARY_TOKEN_VAR,
                        key: name.clone(),
                    })?;
            return Ok((name.clone(), token));
        }
        if self.format == RepoFormat::Deb && LEGACY_DEB_SERIES.contains(&self.release.series()) {
            let token =
                self.options
                    .legacy_token
                    .clone()
                    .ok_or_else(|| SignError::MissingToken {
                        variable: NOTARY_LEGACY_TOKEN_VAR,
                        key: LEGACY_DEB_KEY.to_string(),
                    })?;
            return Ok((LEGACY_DEB_KEY.to_string(), token));
        }
        let name = format!("server-{}", self.release.stable_series());
        let token = self
            .options
            .token
            .clone()
            .ok_or_else(|| SignError::MissingToken {
                variable: NOTARY_TOKEN_VAR,
                key: name.clone(),
            })?;
        Ok((name, token))
    }

    /// Sign one file in place or alongside it.
    ///
    /// With `overwrite` the client replaces the file with the signed
    /// copy, as RPM packages need. Otherwise it writes a detached
    /// signature next to the file with `archive_extension` appended,
    /// removing any stale signature from an earlier run first. Returns
    /// the client's combined output.
    pub async fn sign_file(
        &self,
        path: &Path,
        archive_extension: &str,
        overwrite: bool,
    ) -> Result<String, SignError> {
        let (key_name, token) = self.select_key()?;
        let url = self.options.url.as_ref().ok_or(SignError::MissingUrl)?;
        let file_name = path
            .file_name()
            .ok_or_else(|| SignError::InvalidTarget(path.to_path_buf()))?;
        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        if archive_extension.starts_with('.') {
            warn!(
                "archive extension {:?} has a leading dot, which is usually a mistake",
                archive_extension
            );
        }
        if overwrite && !archive_extension.is_empty() {
            warn!(
                "signing {} with overwrite set and an archive extension",
                path.display()
            );
        }

        if !overwrite {
            // a detached signature from an earlier rebuild would otherwise
            // be pushed alongside the fresh one
            let mut stale = path.as_os_str().to_os_string();
            stale.push(".");
            stale.push(archive_extension);
            let stale = PathBuf::from(stale);
            match tokio::fs::remove_file(&stale).await {
                Ok(()) => debug!("removed stale signature {}", stale.display()),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => warn!(
                    "could not remove stale signature {}: {}",
                    stale.display(),
                    err
                ),
            }
        }

        let args = client_args(&key_name, &token, url, archive_extension, overwrite);
        let mut command = Command::new(&self.options.client);
        command
            .args(&args)
            .arg(file_name)
            .current_dir(parent)
            .kill_on_drop(true);

        info!(
            "running {} {} {}",
            self.options.client.display(),
            redact(&args.join(" "), &token),
            file_name.to_string_lossy()
        );

        let output = command.output().await?;
        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        let combined = combined.trim().to_string();

        if !output.status.success() {
            warn!("notary client failed for {}: {}", path.display(), combined);
            return Err(SignError::ClientFailed {
                status: output.status.to_string(),
                output: combined,
            });
        }

        info!("signed {}", path.display());
        Ok(combined)
    }
}

/// Argument list for the notary client, without the target file.
fn client_args(
    key_name: &str,
    token: &str,
    url: &Url,
    archive_extension: &str,
    overwrite: bool,
) -> Vec<String> {
    let mut args = vec![
        "--key-name".to_string(),
        key_name.to_string(),
        "--auth-token".to_string(),
        token.to_string(),
        "--comment".to_string(),
        "repopress package signing".to_string(),
        "--notary-url".to_string(),
        url.to_string(),
        "--archive-file-ext".to_string(),
        archive_extension.to_string(),
        "--outputs".to_string(),
        "sig".to_string(),
    ];
    if overwrite {
        // sign in place rather than leaving a detached signature
        args.push("--package-file-suffix".to_string());
        args.push(String::new());
    }
    args
}

fn redact(line: &str, token: &str) -> String {
    line.replace(token, "XXXXX")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn options(token: Option<&str>, legacy: Option<&str>, key: Option<&str>) -> SigningOptions {
        SigningOptions {
            client: PathBuf::from("notary-client.py"),
            url: Some(Url::parse("https://notary.example.com").unwrap()),
            key_name: key.map(String::from),
            token: token.map(String::from),
            legacy_token: legacy.map(String::from),
        }
    }

    fn signer(format: RepoFormat, version: &str, options: SigningOptions) -> Signer {
        Signer::new(options, format, ReleaseVersion::parse(version).unwrap())
    }

    #[test]
    fn test_key_for_stable_series() {
        let signer = signer(RepoFormat::Rpm, "4.2.3", options(Some("tok"), None, None));
        assert_eq!(
            signer.select_key().unwrap(),
            ("server-4.2".to_string(), "tok".to_string())
        );
    }

    #[test]
    fn test_key_for_development_series() {
        let signer = signer(RepoFormat::Deb, "4.3.1", options(Some("tok"), None, None));
        assert_eq!(signer.select_key().unwrap().0, "server-4.2");
    }

    #[test]
    fn test_legacy_deb_key() {
        let signer = signer(
            RepoFormat::Deb,
            "3.0.12",
            options(Some("tok"), Some("legacy"), None),
        );
        assert_eq!(
            signer.select_key().unwrap(),
            ("richard".to_string(), "legacy".to_string())
        );
        // RPM repositories of the same series use the standard key
        let signer = self::signer(
            RepoFormat::Rpm,
            "3.0.12",
            options(Some("tok"), Some("legacy"), None),
        );
        assert_eq!(signer.select_key().unwrap().0, "server-3.0");
    }

    #[test]
    fn test_key_name_override() {
        let signer = signer(
            RepoFormat::Deb,
            "3.0.1",
            options(Some("tok"), None, Some("release-key")),
        );
        assert_eq!(
            signer.select_key().unwrap(),
            ("release-key".to_string(), "tok".to_string())
        );
    }

    #[test]
    fn test_missing_token_names_variable() {
        let signer = signer(RepoFormat::Rpm, "4.2.0", options(None, None, None));
        let err = signer.select_key().unwrap_err();
        assert!(err.to_string().contains(NOTARY_TOKEN_VAR));

        let signer = self::signer(RepoFormat::Deb, "2.6.9", options(Some("tok"), None, None));
        let err = signer.select_key().unwrap_err();
        assert!(err.to_string().contains(NOTARY_LEGACY_TOKEN_VAR));
    }

    #[tokio::test]
    async fn test_missing_token_leaves_stale_signature_alone() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("Release");
        std::fs::write(&target, "release").unwrap();
        let stale = dir.path().join("Release.gpg");
        std::fs::write(&stale, "stale").unwrap();

        let signer = signer(RepoFormat::Deb, "4.2.0", options(None, None, None));
        let err = signer.sign_file(&target, "gpg", false).await.unwrap_err();
        assert!(matches!(err, SignError::MissingToken { .. }));
        assert!(stale.exists());
    }

    fn stub_client(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("notary-client.py");
        std::fs::write(&path, body).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    #[tokio::test]
    async fn test_sign_file_runs_client_in_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let client = stub_client(
            dir.path(),
            "#!/bin/sh\nfor arg in \"$@\"; do target=\"$arg\"; done\necho \"signed $target in $(basename \"$PWD\")\"\n",
        );
        let target_dir = dir.path().join("dists");
        std::fs::create_dir_all(&target_dir).unwrap();
        let target = target_dir.join("Release");
        std::fs::write(&target, "release").unwrap();
        let stale = target_dir.join("Release.gpg");
        std::fs::write(&stale, "stale").unwrap();

        let mut opts = options(Some("sekrit"), None, None);
        opts.client = client;
        let signer = signer(RepoFormat::Deb, "4.2.0", opts);
        let output = signer.sign_file(&target, "gpg", false).await.unwrap();
        assert_eq!(output, "signed Release in dists");
        assert!(!stale.exists(), "stale detached signature should be removed");
    }

    #[tokio::test]
    async fn test_sign_file_reports_client_failure() {
        let dir = tempfile::tempdir().unwrap();
        let client = stub_client(dir.path(), "#!/bin/sh\necho \"key not found\" >&2\nexit 3\n");
        let target = dir.path().join("pkg.rpm");
        std::fs::write(&target, "rpm").unwrap();

        let mut opts = options(Some("sekrit"), None, None);
        opts.client = client;
        let signer = signer(RepoFormat::Rpm, "4.2.0", opts);
        let err = signer.sign_file(&target, "", true).await.unwrap_err();
        match err {
            SignError::ClientFailed { output, .. } => assert!(output.contains("key not found")),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_client_args_grammar() {
        let url = Url::parse("https://notary.example.com/").unwrap();
        let args = client_args("server-4.2", "sekrit", &url, "gpg", false);
        assert_eq!(
            args,
            vec![
                "--key-name",
                "server-4.2",
                "--auth-token",
                "sekrit",
                "--comment",
                "repopress package signing",
                "--notary-url",
                "https://notary.example.com/",
                "--archive-file-ext",
                "gpg",
                "--outputs",
                "sig",
            ]
            .into_iter()
            .map(String::from)
            .collect::<Vec<_>>()
        );
        let args = client_args("server-4.2", "sekrit", &url, "", true);
        assert_eq!(args[args.len() - 2], "--package-file-suffix");
        assert_eq!(args[args.len() - 1], "");
    }

    #[test]
    fn test_redact_hides_token() {
        let line = "--auth-token sekrit --outputs sig";
        assert_eq!(redact(line, "sekrit"), "--auth-token XXXXX --outputs sig");
    }

    #[test]
    fn test_from_env_ignores_empty() {
        std::env::set_var(NOTARY_KEY_NAME_VAR, "");
        std::env::set_var(NOTARY_TOKEN_VAR, "tok");
        std::env::remove_var(NOTARY_LEGACY_TOKEN_VAR);
        let opts = SigningOptions::from_env(PathBuf::from("client"), None);
        assert_eq!(opts.key_name, None);
        assert_eq!(opts.token.as_deref(), Some("tok"));
        assert_eq!(opts.legacy_token, None);
        std::env::remove_var(NOTARY_TOKEN_VAR);
        std::env::remove_var(NOTARY_KEY_NAME_VAR);
    }
}
