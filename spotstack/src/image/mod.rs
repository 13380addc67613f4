//! Package image build.
//!
//! ## Architecture
//!
//! A package archive becomes a published cloud image through ten strictly
//! sequential steps:
//!
//! ```text
//!   1. Download       (package.xvm2 into <repo>/<id>/)
//!   2. Extract        (first *.gz member, gunzipped in place)
//!   3. LocateOffset   (first MBR partition × 512)
//!   4. Mount          (loop mount at <work>/mnt)        ─┐
//!   5. BootFiles      (initrd.*, vmlinuz* → <id>-*)      │ MountGuard armed
//!   6. RootFs         (losetup -a → dd of=temp.img)      │
//!   7. Convert        (qemu-img raw → qcow2 <id>.img)    │
//!   8. Unmount        (umount, drop decompressed disk) ─┘
//!   9. Publish        (<id>.tar.gz → publish tool → emi="...")
//!  10. Register       (package row → ready with nova_id)
//! ```
//!
//! Any failure aborts the remaining steps. [`BuildState`] records where it
//! stopped; the [`MountGuard`] makes sure a failed build does not leave
//! the disk mounted.

mod partition;
mod state;
mod tasks;
mod types;

pub use partition::{PartitionEntry, parse_mbr, partition_offset};
pub use state::{BuildState, BuildStep};
pub use types::{BuildContext, MountGuard};

use std::sync::Arc;

use spotstack_shared::errors::{SpotstackError, SpotstackResult};
use tokio::sync::Mutex;

use crate::db::PackageStore;
use crate::models::{Arch, Package};
use crate::pipeline::{BoxedTask, ExecutionPlan, PipelineBuilder, PipelineExecutor};
use crate::runtime::layout::FilesystemLayout;
use crate::runtime::options::SpotstackOptions;
use crate::util::SharedToolRunner;

use tasks::{
    BootFilesTask, BuildCtx, ConvertTask, DownloadTask, ExtractTask, LocateOffsetTask, MountTask,
    PublishTask, RegisterTask, RootFsTask, UnmountTask,
};

// ============================================================================
// EXECUTION PLAN
// ============================================================================

fn get_execution_plan() -> ExecutionPlan<BuildCtx> {
    let tasks: Vec<BoxedTask<BuildCtx>> = vec![
        Box::new(DownloadTask),
        Box::new(ExtractTask),
        Box::new(LocateOffsetTask),
        Box::new(MountTask),
        Box::new(BootFilesTask),
        Box::new(RootFsTask),
        Box::new(ConvertTask),
        Box::new(UnmountTask),
        Box::new(PublishTask),
        Box::new(RegisterTask),
    ];
    ExecutionPlan::new(tasks)
}

/// Outcome of a finished build.
#[derive(Debug)]
pub struct BuildOutcome {
    pub state: BuildState,
    pub result: SpotstackResult<Package>,
}

/// Builds and publishes package images.
#[derive(Clone)]
pub struct ImageBuilder {
    options: Arc<SpotstackOptions>,
    layout: FilesystemLayout,
    runner: SharedToolRunner,
    packages: PackageStore,
    http: reqwest::Client,
}

impl ImageBuilder {
    pub fn new(
        options: Arc<SpotstackOptions>,
        layout: FilesystemLayout,
        runner: SharedToolRunner,
        packages: PackageStore,
    ) -> Self {
        Self {
            options,
            layout,
            runner,
            packages,
            http: reqwest::Client::new(),
        }
    }

    /// Run all build steps for `package_id` and return the registered
    /// package.
    pub async fn build(&self, package_id: &str, arch: Arch) -> SpotstackResult<Package> {
        self.build_with_state(package_id, arch).await.result
    }

    /// Like [`build`](Self::build), also reporting the final [`BuildState`].
    pub async fn build_with_state(&self, package_id: &str, arch: Arch) -> BuildOutcome {
        let layout = match self.layout.package_layout(package_id) {
            Ok(layout) => layout,
            Err(e) => {
                let mut state = BuildState::default();
                state.fail(e.to_string());
                return BuildOutcome {
                    state,
                    result: Err(e),
                };
            }
        };

        tracing::info!(
            package_id = %package_id,
            arch = %arch,
            work_dir = %layout.work_dir().display(),
            "Building package image"
        );

        let ctx: BuildCtx = Arc::new(Mutex::new(BuildContext::new(
            package_id,
            arch,
            layout,
            Arc::clone(&self.options),
            Arc::clone(&self.runner),
            self.packages.clone(),
            self.http.clone(),
        )));

        let pipeline = PipelineBuilder::from_plan(get_execution_plan());
        let executed = PipelineExecutor::execute(pipeline, Arc::clone(&ctx)).await;

        let mut ctx = ctx.lock().await;
        let result = match executed {
            Ok(metrics) => {
                metrics.log("image_build");
                ctx.state.finish().and_then(|_| {
                    ctx.package
                        .take()
                        .ok_or_else(|| SpotstackError::Internal("package_register task must run first".into()))
                })
            }
            Err(e) => {
                self.release_mount(&mut ctx, package_id).await;
                ctx.state.fail(e.to_string());
                Err(e)
            }
        };

        BuildOutcome {
            state: ctx.state.clone(),
            result,
        }
    }

    /// Unmount a disk left mounted by a failed build.
    async fn release_mount(&self, ctx: &mut BuildContext, package_id: &str) {
        let Some(mount_dir) = ctx.guard.disarm() else {
            return;
        };
        let cmd = types::umount_command(&mount_dir);
        match self
            .runner
            .run(cmd.clone())
            .await
            .and_then(|o| o.ensure_success(&cmd))
        {
            Ok(_) => tracing::info!(
                package_id = %package_id,
                mount_dir = %mount_dir.display(),
                "Unmounted disk after failed build"
            ),
            Err(e) => tracing::warn!(
                package_id = %package_id,
                mount_dir = %mount_dir.display(),
                error = %e,
                "Failed to unmount disk after failed build"
            ),
        }
    }
}
