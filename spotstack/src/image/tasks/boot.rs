//! Task: Copy kernel and initrd out of the mounted disk.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use spotstack_shared::errors::{SpotstackError, SpotstackResult};

use super::{BuildCtx, log_task_error, task_start};
use crate::image::state::BuildStep;
use crate::pipeline::PipelineTask;

const BOOT_DIR: &str = "boot";
const INITRD_PREFIX: &str = "initrd.";
const VMLINUZ_PREFIX: &str = "vmlinuz";

pub struct BootFilesTask;

impl BootFilesTask {
    const STEP: BuildStep = BuildStep::BootFiles;
}

#[async_trait]
impl PipelineTask<BuildCtx> for BootFilesTask {
    async fn run(self: Box<Self>, ctx: BuildCtx) -> SpotstackResult<()> {
        let package_id = task_start(&ctx, Self::STEP).await?;
        let layout = ctx.lock().await.layout.clone();

        let result = async {
            let boot_dir = layout.mount_dir().join(BOOT_DIR);
            let initrd = find_boot_file(&boot_dir, INITRD_PREFIX, "initrd").await?;
            let vmlinuz = find_boot_file(&boot_dir, VMLINUZ_PREFIX, "vmlinuz").await?;
            tokio::fs::copy(&initrd, layout.initrd_path()).await?;
            tokio::fs::copy(&vmlinuz, layout.vmlinuz_path()).await?;
            Ok::<_, SpotstackError>((initrd, vmlinuz))
        }
        .await;

        let (initrd, vmlinuz) = result.inspect_err(|e| log_task_error(&package_id, Self::STEP, e))?;
        tracing::debug!(
            package_id = %package_id,
            initrd = %initrd.display(),
            vmlinuz = %vmlinuz.display(),
            "Boot files copied"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        Self::STEP.as_str()
    }
}

/// First entry of `boot_dir`, by name, starting with `prefix`.
async fn find_boot_file(boot_dir: &Path, prefix: &str, kind: &str) -> SpotstackResult<PathBuf> {
    let not_found = || {
        SpotstackError::NotFound(format!("could not find {} image in vm disk boot dir", kind))
    };

    let mut entries = match tokio::fs::read_dir(boot_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(not_found()),
        Err(e) => return Err(e.into()),
    };

    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let file_name = entry.file_name();
        if let Some(name) = file_name.to_str()
            && name.starts_with(prefix)
        {
            names.push(name.to_string());
        }
    }
    names.sort();

    names
        .into_iter()
        .next()
        .map(|name| boot_dir.join(name))
        .ok_or_else(not_found)
}
