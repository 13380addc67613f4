//! Type definitions for the image build pipeline.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::db::PackageStore;
use crate::models::{Arch, Package};
use crate::runtime::layout::PackageLayout;
use crate::runtime::options::SpotstackOptions;
use crate::util::{SharedToolRunner, ToolCommand};

use super::state::BuildState;

/// Unmount command for a loop-mounted disk.
pub(crate) fn umount_command(mount_dir: &Path) -> ToolCommand {
    ToolCommand::new("umount")
        .arg(mount_dir.display().to_string())
        .privileged()
}

/// RAII guard for a loop mount made during a build.
///
/// Armed by the mount step and disarmed by the unmount step. The build
/// runner unmounts explicitly on failure; if the guard is dropped while
/// still armed (panic, cancelled run) it schedules the unmount on the
/// current tokio runtime.
pub struct MountGuard {
    runner: SharedToolRunner,
    mount_dir: Option<PathBuf>,
}

impl MountGuard {
    pub fn new(runner: SharedToolRunner) -> Self {
        Self {
            runner,
            mount_dir: None,
        }
    }

    pub fn arm(&mut self, mount_dir: PathBuf) {
        self.mount_dir = Some(mount_dir);
    }

    pub fn is_armed(&self) -> bool {
        self.mount_dir.is_some()
    }

    /// Stop tracking the mount, returning the mount point if one was held.
    pub fn disarm(&mut self) -> Option<PathBuf> {
        self.mount_dir.take()
    }
}

impl Drop for MountGuard {
    fn drop(&mut self) {
        let Some(mount_dir) = self.mount_dir.take() else {
            return;
        };

        tracing::warn!(
            mount_dir = %mount_dir.display(),
            "Image build left a disk mounted, unmounting"
        );

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(
                mount_dir = %mount_dir.display(),
                "No async runtime available, disk stays mounted"
            );
            return;
        };

        let runner = Arc::clone(&self.runner);
        handle.spawn(async move {
            let cmd = umount_command(&mount_dir);
            match runner.run(cmd.clone()).await.and_then(|o| o.ensure_success(&cmd)) {
                Ok(_) => tracing::debug!(mount_dir = %mount_dir.display(), "Disk unmounted"),
                Err(e) => tracing::warn!(
                    mount_dir = %mount_dir.display(),
                    error = %e,
                    "Failed to unmount during cleanup"
                ),
            }
        });
    }
}

/// Shared image build context.
///
/// Inputs are fixed at construction; outputs are filled in by tasks for
/// the tasks after them.
pub struct BuildContext {
    pub package_id: String,
    pub arch: Arch,
    pub layout: PackageLayout,
    pub options: Arc<SpotstackOptions>,
    pub runner: SharedToolRunner,
    pub packages: PackageStore,
    pub http: reqwest::Client,
    pub state: BuildState,
    pub guard: MountGuard,
    /// Decompressed disk image (Extract).
    pub disk_path: Option<PathBuf>,
    /// Byte offset of the first partition (LocateOffset).
    pub partition_offset: Option<u64>,
    /// Published cloud image id (Publish).
    pub image_id: Option<String>,
    /// Registered package row (Register).
    pub package: Option<Package>,
}

impl BuildContext {
    pub fn new(
        package_id: &str,
        arch: Arch,
        layout: PackageLayout,
        options: Arc<SpotstackOptions>,
        runner: SharedToolRunner,
        packages: PackageStore,
        http: reqwest::Client,
    ) -> Self {
        let guard = MountGuard::new(Arc::clone(&runner));
        Self {
            package_id: package_id.to_string(),
            arch,
            layout,
            options,
            runner,
            packages,
            http,
            state: BuildState::default(),
            guard,
            disk_path: None,
            partition_offset: None,
            image_id: None,
            package: None,
        }
    }
}
