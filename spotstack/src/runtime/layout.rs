use std::path::{Path, PathBuf};

use spotstack_shared::constants::{dirs, files};
use spotstack_shared::errors::{SpotstackError, SpotstackResult};

// ============================================================================
// FILESYSTEM LAYOUT (home directory)
// ============================================================================

#[derive(Clone, Debug)]
pub struct FilesystemLayout {
    home_dir: PathBuf,
    repo_dir: PathBuf,
}

impl FilesystemLayout {
    pub fn new(home_dir: PathBuf, repo_dir: PathBuf) -> Self {
        Self { home_dir, repo_dir }
    }

    pub fn home_dir(&self) -> &Path {
        &self.home_dir
    }

    pub fn repo_dir(&self) -> &Path {
        &self.repo_dir
    }

    pub fn db_dir(&self) -> PathBuf {
        self.home_dir.join(dirs::DB_DIR)
    }

    pub fn db_path(&self) -> PathBuf {
        self.db_dir().join(files::DATABASE)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.home_dir.join(dirs::LOGS_DIR)
    }

    /// Working directory for one package build: `<repo_dir>/<package_id>`.
    pub fn package_layout(&self, package_id: &str) -> SpotstackResult<PackageLayout> {
        if package_id.is_empty()
            || package_id.contains(['/', '\\'])
            || package_id == "."
            || package_id == ".."
        {
            return Err(SpotstackError::InvalidState(format!(
                "package id is not usable as a directory name: {:?}",
                package_id
            )));
        }
        Ok(PackageLayout {
            package_id: package_id.to_string(),
            work_dir: self.repo_dir.join(package_id),
        })
    }

    /// Create home, db, logs and repo directories.
    pub fn prepare(&self) -> SpotstackResult<()> {
        for dir in [
            self.home_dir.clone(),
            self.db_dir(),
            self.logs_dir(),
            self.repo_dir.clone(),
        ] {
            std::fs::create_dir_all(&dir).map_err(|e| {
                SpotstackError::Storage(format!("failed to create {}: {}", dir.display(), e))
            })?;
        }
        Ok(())
    }
}

// ============================================================================
// PACKAGE LAYOUT (per-package working directory)
// ============================================================================

/// File names inside a package working directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackageLayout {
    package_id: String,
    work_dir: PathBuf,
}

impl PackageLayout {
    pub fn package_id(&self) -> &str {
        &self.package_id
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn archive_path(&self) -> PathBuf {
        self.work_dir.join(files::PACKAGE_ARCHIVE)
    }

    pub fn mount_dir(&self) -> PathBuf {
        self.work_dir.join(dirs::MOUNT_DIR)
    }

    pub fn raw_rootfs_path(&self) -> PathBuf {
        self.work_dir.join(files::RAW_ROOTFS)
    }

    pub fn initrd_name(&self) -> String {
        files::initrd(&self.package_id)
    }

    pub fn vmlinuz_name(&self) -> String {
        files::vmlinuz(&self.package_id)
    }

    pub fn image_name(&self) -> String {
        files::image(&self.package_id)
    }

    pub fn bundle_name(&self) -> String {
        files::bundle(&self.package_id)
    }

    pub fn initrd_path(&self) -> PathBuf {
        self.work_dir.join(self.initrd_name())
    }

    pub fn vmlinuz_path(&self) -> PathBuf {
        self.work_dir.join(self.vmlinuz_name())
    }

    pub fn image_path(&self) -> PathBuf {
        self.work_dir.join(self.image_name())
    }

    pub fn bundle_path(&self) -> PathBuf {
        self.work_dir.join(self.bundle_name())
    }

    pub fn prepare(&self) -> SpotstackResult<()> {
        std::fs::create_dir_all(&self.work_dir).map_err(|e| {
            SpotstackError::Storage(format!(
                "failed to create {}: {}",
                self.work_dir.display(),
                e
            ))
        })
    }
}
