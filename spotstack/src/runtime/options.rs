//! Configuration for spotstack.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use spotstack_shared::constants::{dirs as const_dirs, env as const_env, timing};
use spotstack_shared::errors::{SpotstackError, SpotstackResult};

/// Base directory name used when `$SPOTSTACK_HOME` is unset.
const SPOTSTACK_DIR: &str = ".spotstack";

/// Runtime options.
///
/// Every field has a default, so a JSON config file only needs the keys it
/// overrides.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpotstackOptions {
    /// Holds the database and logs.
    pub home_dir: PathBuf,

    /// Parent of the per-package working directories.
    /// Defaults to `<home_dir>/repo`.
    pub repo_dir: Option<PathBuf>,

    /// Package archive URL; `%s` is replaced by the package id.
    pub package_download_url_template: String,

    /// Tool that uploads and registers an image bundle, printing `emi="<id>"`.
    pub publish_script: PathBuf,

    pub nova_manage: PathBuf,

    /// Prefix privileged tools (mount, umount, losetup, dd) with `sudo`.
    pub use_sudo: bool,

    /// Upper bound on waiting for a package another run is building.
    #[serde(with = "secs")]
    pub download_time_limit: Duration,

    /// Re-read interval while waiting on a package build.
    #[serde(with = "secs")]
    pub poll_interval: Duration,

    /// EC2 endpoint and keys for euca2ools. When unset the tools read their
    /// usual environment variables.
    pub cloud: Option<CloudOptions>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudOptions {
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
}

impl Default for SpotstackOptions {
    fn default() -> Self {
        let home_dir = std::env::var(const_env::HOME)
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
                path.push(SPOTSTACK_DIR);
                path
            });

        Self {
            home_dir,
            repo_dir: None,
            package_download_url_template: "http://localhost/packages/%s/package.xvm2".to_string(),
            publish_script: PathBuf::from("uec-publish-tarball"),
            nova_manage: PathBuf::from("nova-manage"),
            use_sudo: true,
            download_time_limit: Duration::from_secs(timing::DOWNLOAD_TIME_LIMIT_SECS),
            poll_interval: Duration::from_secs(timing::POLL_INTERVAL_SECS),
            cloud: None,
        }
    }
}

impl SpotstackOptions {
    /// Load options from a JSON file, filling in defaults.
    pub fn from_file(path: &Path) -> SpotstackResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            SpotstackError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            SpotstackError::Config(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    /// Options rooted at `home_dir`, everything else default.
    pub fn with_home(home_dir: impl Into<PathBuf>) -> Self {
        Self {
            home_dir: home_dir.into(),
            ..Default::default()
        }
    }

    pub fn repo_dir(&self) -> PathBuf {
        self.repo_dir
            .clone()
            .unwrap_or_else(|| self.home_dir.join(const_dirs::REPO_DIR))
    }

    /// Download URL for one package.
    pub fn package_url(&self, package_id: &str) -> String {
        self.package_download_url_template.replace("%s", package_id)
    }

    pub fn sanitize(&self) -> SpotstackResult<()> {
        if !self.home_dir.is_absolute() {
            return Err(SpotstackError::Config(format!(
                "home_dir must be absolute path, got: {}",
                self.home_dir.display()
            )));
        }
        if let Some(ref repo) = self.repo_dir
            && !repo.is_absolute()
        {
            return Err(SpotstackError::Config(format!(
                "repo_dir must be absolute path, got: {}",
                repo.display()
            )));
        }
        if !self.package_download_url_template.contains("%s") {
            return Err(SpotstackError::Config(format!(
                "package_download_url_template must contain %s, got: {}",
                self.package_download_url_template
            )));
        }
        if self.poll_interval.is_zero() {
            return Err(SpotstackError::Config("poll_interval must be non-zero".into()));
        }
        if self.download_time_limit < self.poll_interval {
            return Err(SpotstackError::Config(
                "download_time_limit must not be shorter than poll_interval".into(),
            ));
        }
        Ok(())
    }
}

/// Durations as whole seconds in config files.
mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
