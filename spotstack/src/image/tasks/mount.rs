//! Tasks: Loop-mount the disk image and release it again.

use async_trait::async_trait;
use spotstack_shared::errors::{SpotstackError, SpotstackResult};

use super::{BuildCtx, log_task_error, task_start};
use crate::image::state::BuildStep;
use crate::image::types::umount_command;
use crate::pipeline::PipelineTask;
use crate::util::ToolCommand;

pub struct MountTask;

impl MountTask {
    const STEP: BuildStep = BuildStep::Mount;
}

#[async_trait]
impl PipelineTask<BuildCtx> for MountTask {
    async fn run(self: Box<Self>, ctx: BuildCtx) -> SpotstackResult<()> {
        let package_id = task_start(&ctx, Self::STEP).await?;

        let (disk, offset, mount_dir, runner) = {
            let ctx = ctx.lock().await;
            let disk = ctx
                .disk_path
                .clone()
                .ok_or_else(|| SpotstackError::Internal("disk_extract task must run first".into()))?;
            let offset = ctx.partition_offset.ok_or_else(|| {
                SpotstackError::Internal("partition_offset task must run first".into())
            })?;
            (disk, offset, ctx.layout.mount_dir(), ctx.runner.clone())
        };

        tokio::fs::create_dir_all(&mount_dir)
            .await
            .map_err(SpotstackError::from)
            .inspect_err(|e| log_task_error(&package_id, Self::STEP, e))?;

        let cmd = ToolCommand::new("mount")
            .arg("-o")
            .arg(format!("loop,offset={}", offset))
            .arg(disk.display().to_string())
            .arg(mount_dir.display().to_string())
            .privileged();

        runner
            .run(cmd.clone())
            .await
            .and_then(|o| o.ensure_success(&cmd))
            .inspect_err(|e| log_task_error(&package_id, Self::STEP, e))?;

        tracing::info!(
            package_id = %package_id,
            mount_dir = %mount_dir.display(),
            offset,
            "Disk mounted"
        );
        ctx.lock().await.guard.arm(mount_dir);
        Ok(())
    }

    fn name(&self) -> &str {
        Self::STEP.as_str()
    }
}

pub struct UnmountTask;

impl UnmountTask {
    const STEP: BuildStep = BuildStep::Unmount;
}

#[async_trait]
impl PipelineTask<BuildCtx> for UnmountTask {
    async fn run(self: Box<Self>, ctx: BuildCtx) -> SpotstackResult<()> {
        let package_id = task_start(&ctx, Self::STEP).await?;

        let (mount_dir, disk, runner) = {
            let mut ctx = ctx.lock().await;
            (ctx.guard.disarm(), ctx.disk_path.take(), ctx.runner.clone())
        };

        if let Some(mount_dir) = mount_dir {
            let cmd = umount_command(&mount_dir);
            if let Err(e) = runner.run(cmd.clone()).await.and_then(|o| o.ensure_success(&cmd)) {
                tracing::warn!(
                    package_id = %package_id,
                    mount_dir = %mount_dir.display(),
                    error = %e,
                    "Could not unmount disk"
                );
            }
        }

        if let Some(disk) = disk {
            tokio::fs::remove_file(&disk)
                .await
                .map_err(SpotstackError::from)
                .inspect_err(|e| log_task_error(&package_id, Self::STEP, e))?;
        }

        Ok(())
    }

    fn name(&self) -> &str {
        Self::STEP.as_str()
    }
}
