//! Release version parsing and classification.

use lazy_regex::regex_captures;

use crate::error::{Error, Result};

/// A release version in `major.minor.patch[-suffix]` form, classified by
/// its position in the release cycle.
///
/// The series is the `major.minor` pair. Odd minor numbers are development
/// series, even ones are stable. An `rcN` suffix marks a release candidate
/// and any other suffix marks a development build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseVersion {
    source: String,
    series: String,
    major: u32,
    minor: u32,
    patch: u32,
    suffix: Option<String>,
}

impl ReleaseVersion {
    /// Parse a version string, rejecting anything outside the release
    /// grammar.
    pub fn parse(version: &str) -> Result<Self> {
        let (_, major, minor, patch, dash, suffix) =
            regex_captures!(r"^(\d+)\.(\d+)\.(\d+)(-(.*))?$", version).ok_or_else(|| {
                Error::InvalidVersion {
                    version: version.to_string(),
                    reason: "expected major.minor.patch with an optional -suffix".to_string(),
                }
            })?;
        let parse_part = |part: &str| {
            part.parse::<u32>().map_err(|err| Error::InvalidVersion {
                version: version.to_string(),
                reason: err.to_string(),
            })
        };
        let major = parse_part(major)?;
        let minor = parse_part(minor)?;
        let patch = parse_part(patch)?;
        Ok(Self {
            source: version.to_string(),
            series: format!("{}.{}", major, minor),
            major,
            minor,
            patch,
            suffix: if dash.is_empty() {
                None
            } else {
                Some(suffix.to_string())
            },
        })
    }

    /// The version exactly as given.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// The `major.minor` release series.
    pub fn series(&self) -> &str {
        &self.series
    }

    pub fn major(&self) -> u32 {
        self.major
    }

    pub fn minor(&self) -> u32 {
        self.minor
    }

    pub fn patch(&self) -> u32 {
        self.patch
    }

    /// True for versions with an `rcN` suffix.
    pub fn is_release_candidate(&self) -> bool {
        match &self.suffix {
            Some(suffix) => is_rc_suffix(suffix),
            None => false,
        }
    }

    /// True for suffixed builds that are not release candidates, such as
    /// nightlies tagged with a timestamp and git hash.
    pub fn is_development_build(&self) -> bool {
        match &self.suffix {
            Some(suffix) => !is_rc_suffix(suffix),
            None => false,
        }
    }

    /// True when the minor number marks a development series.
    pub fn is_development_series(&self) -> bool {
        self.minor % 2 == 1
    }

    pub fn is_stable_series(&self) -> bool {
        !self.is_development_series()
    }

    /// The stable series this release belongs to: the series itself when
    /// stable, otherwise the previous even series.
    pub fn stable_series(&self) -> String {
        if self.is_development_series() {
            format!("{}.{}", self.major, self.minor - 1)
        } else {
            self.series.clone()
        }
    }

    /// The repository subpath packages of this release stage into:
    /// development builds go to `development`, release candidates to
    /// `testing`, and finished releases to their series directory.
    pub fn package_location(&self) -> String {
        if self.is_development_build() {
            "development".to_string()
        } else if self.is_release_candidate() {
            "testing".to_string()
        } else {
            self.series.clone()
        }
    }
}

fn is_rc_suffix(suffix: &str) -> bool {
    match suffix.strip_prefix("rc") {
        Some(digits) => !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()),
        None => false,
    }
}

impl std::fmt::Display for ReleaseVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}
