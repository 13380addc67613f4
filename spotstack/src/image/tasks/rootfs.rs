//! Tasks: Copy the root filesystem from the loop device and convert it.

use std::path::Path;

use async_trait::async_trait;
use regex::Regex;
use spotstack_shared::constants::disk::TARGET_FORMAT;
use spotstack_shared::errors::{SpotstackError, SpotstackResult};

use super::{BuildCtx, log_task_error, task_start};
use crate::image::state::BuildStep;
use crate::pipeline::PipelineTask;
use crate::util::ToolCommand;

pub struct RootFsTask;

impl RootFsTask {
    const STEP: BuildStep = BuildStep::RootFs;
}

#[async_trait]
impl PipelineTask<BuildCtx> for RootFsTask {
    async fn run(self: Box<Self>, ctx: BuildCtx) -> SpotstackResult<()> {
        let package_id = task_start(&ctx, Self::STEP).await?;
        let (layout, runner) = {
            let ctx = ctx.lock().await;
            (ctx.layout.clone(), ctx.runner.clone())
        };

        let result = async {
            let list = ToolCommand::new("losetup").arg("-a").privileged();
            let output = runner.run(list.clone()).await?;
            if !output.stderr.trim().is_empty() {
                return Err(SpotstackError::Tool(format!(
                    "could not get list of loop devices: {}",
                    output.stderr.trim()
                )));
            }
            let output = output.ensure_success(&list)?;

            let loop_dev = find_loop_device(&output.stdout, layout.work_dir())?.ok_or_else(|| {
                SpotstackError::NotFound(format!(
                    "could not find loop device for {}",
                    layout.work_dir().display()
                ))
            })?;

            let dd = ToolCommand::new("dd")
                .arg(format!("if={}", loop_dev))
                .arg(format!("of={}", layout.raw_rootfs_path().display()))
                .arg("bs=1024")
                .privileged();
            runner.run(dd.clone()).await?.ensure_success(&dd)?;
            Ok::<_, SpotstackError>(loop_dev)
        }
        .await;

        let loop_dev = result.inspect_err(|e| log_task_error(&package_id, Self::STEP, e))?;
        tracing::debug!(
            package_id = %package_id,
            loop_device = %loop_dev,
            "Root filesystem copied"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        Self::STEP.as_str()
    }
}

pub struct ConvertTask;

impl ConvertTask {
    const STEP: BuildStep = BuildStep::Convert;
}

#[async_trait]
impl PipelineTask<BuildCtx> for ConvertTask {
    async fn run(self: Box<Self>, ctx: BuildCtx) -> SpotstackResult<()> {
        let package_id = task_start(&ctx, Self::STEP).await?;
        let (layout, runner) = {
            let ctx = ctx.lock().await;
            (ctx.layout.clone(), ctx.runner.clone())
        };

        let raw = layout.raw_rootfs_path();
        let cmd = ToolCommand::new("qemu-img")
            .args(["convert", "-f", "raw"])
            .arg(raw.display().to_string())
            .args(["-O", TARGET_FORMAT])
            .arg(layout.image_path().display().to_string());

        let result = async {
            runner.run(cmd.clone()).await?.ensure_success(&cmd)?;
            tokio::fs::remove_file(&raw).await?;
            Ok::<_, SpotstackError>(())
        }
        .await;

        result.inspect_err(|e| log_task_error(&package_id, Self::STEP, e))?;
        tracing::debug!(
            package_id = %package_id,
            image = %layout.image_path().display(),
            "Root filesystem converted"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        Self::STEP.as_str()
    }
}

/// Find the loop device in `losetup -a` output whose backing file lives
/// directly in `work_dir`.
///
/// Lines look like `/dev/loop0: [0801]:1234 (/srv/repo/abc/disk.img), offset 32256`.
pub(crate) fn find_loop_device(listing: &str, work_dir: &Path) -> SpotstackResult<Option<String>> {
    let re = Regex::new(r"^/dev/loop(\d+):[^(]+\(([^)]+)\)")
        .map_err(|e| SpotstackError::Internal(format!("bad losetup pattern: {}", e)))?;

    Ok(listing.lines().find_map(|line| {
        let caps = re.captures(line.trim())?;
        let backing = Path::new(caps.get(2)?.as_str());
        (backing.parent()? == work_dir).then(|| format!("/dev/loop{}", &caps[1]))
    }))
}
