//! Constants shared by the core and the CLI.

/// Filesystem names under the spotstack home and package working directories.
pub mod dirs {
    /// Log directory under the home dir.
    pub const LOGS_DIR: &str = "logs";

    /// Database directory under the home dir.
    pub const DB_DIR: &str = "db";

    /// Package working directories live under this dir when `repo_dir` is unset.
    pub const REPO_DIR: &str = "repo";

    /// Loop-mount point inside a package working directory.
    pub const MOUNT_DIR: &str = "mnt";
}

/// Files produced while building a package image.
pub mod files {
    /// Downloaded package archive.
    pub const PACKAGE_ARCHIVE: &str = "package.xvm2";

    /// Raw copy of the root filesystem before conversion.
    pub const RAW_ROOTFS: &str = "temp.img";

    /// SQLite database file name.
    pub const DATABASE: &str = "spotstack.db";

    /// Log file prefix (rotated daily).
    pub const LOG_FILE: &str = "spotstack.log";

    pub fn initrd(package_id: &str) -> String {
        format!("{}-initrd", package_id)
    }

    pub fn vmlinuz(package_id: &str) -> String {
        format!("{}-vmlinuz", package_id)
    }

    pub fn image(package_id: &str) -> String {
        format!("{}.img", package_id)
    }

    pub fn bundle(package_id: &str) -> String {
        format!("{}.tar.gz", package_id)
    }
}

/// Timing defaults for package resolution.
pub mod timing {
    /// Upper bound for waiting on a peer's package build (30 minutes).
    pub const DOWNLOAD_TIME_LIMIT_SECS: u64 = 30 * 60;

    /// Interval between re-reads of a package being built by a peer.
    pub const POLL_INTERVAL_SECS: u64 = 5;
}

/// Disk layout constants.
pub mod disk {
    /// Sector size used to turn a partition start sector into a byte offset.
    pub const SECTOR_SIZE: u64 = 512;

    /// Suffix of the compressed disk member inside a package archive.
    pub const COMPRESSED_DISK_SUFFIX: &str = ".gz";

    /// Target image format for the cloud image store.
    pub const TARGET_FORMAT: &str = "qcow2";
}

/// Environment variables.
pub mod env {
    /// Overrides the default home directory.
    pub const HOME: &str = "SPOTSTACK_HOME";
}

/// Length of the package id prefix handed to the publish tool.
pub const PUBLISH_PREFIX_LEN: usize = 7;

/// Message written to a task on successful provisioning.
pub fn provision_ok_message(vm_id: &str) -> String {
    format!("Provision {} OK", vm_id)
}
