//! Tasks: Extract the disk image and locate its first partition.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use flate2::read::MultiGzDecoder;
use spotstack_shared::constants::disk::COMPRESSED_DISK_SUFFIX;
use spotstack_shared::errors::{SpotstackError, SpotstackResult};

use super::{BuildCtx, blocking, log_task_error, task_start};
use crate::image::partition::partition_offset;
use crate::image::state::BuildStep;
use crate::pipeline::PipelineTask;

pub struct ExtractTask;

impl ExtractTask {
    const STEP: BuildStep = BuildStep::Extract;
}

#[async_trait]
impl PipelineTask<BuildCtx> for ExtractTask {
    async fn run(self: Box<Self>, ctx: BuildCtx) -> SpotstackResult<()> {
        let package_id = task_start(&ctx, Self::STEP).await?;

        let layout = ctx.lock().await.layout.clone();
        let archive = layout.archive_path();
        let work_dir = layout.work_dir().to_path_buf();

        let disk_path = blocking(move || extract_disk(&archive, &work_dir))
            .await
            .inspect_err(|e| log_task_error(&package_id, Self::STEP, e))?;

        tracing::debug!(
            package_id = %package_id,
            disk = %disk_path.display(),
            "Disk image extracted"
        );
        ctx.lock().await.disk_path = Some(disk_path);
        Ok(())
    }

    fn name(&self) -> &str {
        Self::STEP.as_str()
    }
}

pub struct LocateOffsetTask;

impl LocateOffsetTask {
    const STEP: BuildStep = BuildStep::LocateOffset;
}

#[async_trait]
impl PipelineTask<BuildCtx> for LocateOffsetTask {
    async fn run(self: Box<Self>, ctx: BuildCtx) -> SpotstackResult<()> {
        let package_id = task_start(&ctx, Self::STEP).await?;

        let disk = ctx
            .lock()
            .await
            .disk_path
            .clone()
            .ok_or_else(|| SpotstackError::Internal("disk_extract task must run first".into()))?;

        let offset = blocking(move || partition_offset(&disk))
            .await
            .inspect_err(|e| log_task_error(&package_id, Self::STEP, e))?;

        tracing::debug!(package_id = %package_id, offset, "Partition offset located");
        ctx.lock().await.partition_offset = Some(offset);
        Ok(())
    }

    fn name(&self) -> &str {
        Self::STEP.as_str()
    }
}

/// Extract the first `.gz` member of `archive` into `work_dir` and
/// decompress it in place. Returns the decompressed file.
pub(crate) fn extract_disk(archive: &Path, work_dir: &Path) -> SpotstackResult<PathBuf> {
    let mut tar = tar::Archive::new(BufReader::new(File::open(archive)?));

    for entry in tar.entries()? {
        let mut entry = entry?;
        let member = entry.path()?.into_owned();
        if !member.to_string_lossy().ends_with(COMPRESSED_DISK_SUFFIX) {
            continue;
        }

        let file_name = member.file_name().ok_or_else(|| {
            SpotstackError::Parse(format!("bad archive member name {}", member.display()))
        })?;
        let compressed = work_dir.join(file_name);
        entry.unpack(&compressed)?;

        let disk = compressed.with_extension("");
        gunzip(&compressed, &disk)?;
        std::fs::remove_file(&compressed)?;
        return Ok(disk);
    }

    Err(SpotstackError::NotFound(format!(
        "disk file not found in {}",
        archive.display()
    )))
}

fn gunzip(source: &Path, target: &Path) -> SpotstackResult<()> {
    let failed = |e: std::io::Error| {
        SpotstackError::Storage(format!("could not gunzip {}: {}", source.display(), e))
    };

    let mut decoder = MultiGzDecoder::new(BufReader::new(File::open(source)?));
    let mut out = BufWriter::new(File::create(target)?);
    std::io::copy(&mut decoder, &mut out).map_err(failed)?;
    std::io::Write::flush(&mut out).map_err(failed)?;
    Ok(())
}
