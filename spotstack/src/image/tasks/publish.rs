//! Tasks: Bundle and publish the image, then register the package.

use std::fs::File;
use std::path::Path;

use async_trait::async_trait;
use flate2::Compression;
use flate2::write::GzEncoder;
use regex::Regex;
use spotstack_shared::constants::PUBLISH_PREFIX_LEN;
use spotstack_shared::errors::{SpotstackError, SpotstackResult};

use super::{BuildCtx, blocking, log_task_error, task_start};
use crate::image::state::BuildStep;
use crate::pipeline::PipelineTask;
use crate::util::ToolCommand;

pub struct PublishTask;

impl PublishTask {
    const STEP: BuildStep = BuildStep::Publish;
}

#[async_trait]
impl PipelineTask<BuildCtx> for PublishTask {
    async fn run(self: Box<Self>, ctx: BuildCtx) -> SpotstackResult<()> {
        let package_id = task_start(&ctx, Self::STEP).await?;
        let (layout, runner, script, arch) = {
            let ctx = ctx.lock().await;
            (
                ctx.layout.clone(),
                ctx.runner.clone(),
                ctx.options.publish_script.clone(),
                ctx.arch,
            )
        };

        let result = async {
            let members = vec![
                layout.initrd_name(),
                layout.vmlinuz_name(),
                layout.image_name(),
            ];
            let work_dir = layout.work_dir().to_path_buf();
            let bundle = layout.bundle_path();
            blocking(move || bundle_files(&work_dir, &members, &bundle)).await?;

            let prefix: String = package_id.chars().take(PUBLISH_PREFIX_LEN).collect();
            let cmd = ToolCommand::new(script.display().to_string())
                .arg(layout.bundle_name())
                .arg(prefix)
                .arg(arch.as_str())
                .current_dir(layout.work_dir());
            let output = runner.run(cmd.clone()).await?;
            if !output.success() {
                return Err(SpotstackError::Tool(format!(
                    "could not publish image: {}",
                    output.stderr.trim()
                )));
            }
            parse_image_id(&output.stdout)
        }
        .await;

        let image_id = result.inspect_err(|e| log_task_error(&package_id, Self::STEP, e))?;
        tracing::info!(
            package_id = %package_id,
            image_id = %image_id,
            arch = %arch,
            "Image published"
        );
        ctx.lock().await.image_id = Some(image_id);
        Ok(())
    }

    fn name(&self) -> &str {
        Self::STEP.as_str()
    }
}

pub struct RegisterTask;

impl RegisterTask {
    const STEP: BuildStep = BuildStep::Register;
}

#[async_trait]
impl PipelineTask<BuildCtx> for RegisterTask {
    async fn run(self: Box<Self>, ctx: BuildCtx) -> SpotstackResult<()> {
        let package_id = task_start(&ctx, Self::STEP).await?;
        let mut ctx = ctx.lock().await;

        let image_id = ctx
            .image_id
            .clone()
            .ok_or_else(|| SpotstackError::Internal("image_publish task must run first".into()))?;

        let package = ctx
            .packages
            .register_ready(&package_id, &image_id)
            .inspect_err(|e| log_task_error(&package_id, Self::STEP, e))?;

        tracing::info!(
            package_id = %package_id,
            nova_id = %image_id,
            "Package registered"
        );
        ctx.package = Some(package);
        Ok(())
    }

    fn name(&self) -> &str {
        Self::STEP.as_str()
    }
}

/// Write `members` (names relative to `work_dir`) into a gzip tarball.
pub(crate) fn bundle_files(work_dir: &Path, members: &[String], target: &Path) -> SpotstackResult<()> {
    let encoder = GzEncoder::new(File::create(target)?, Compression::default());
    let mut tar = tar::Builder::new(encoder);
    for name in members {
        tar.append_path_with_name(work_dir.join(name), name)
            .map_err(|e| SpotstackError::Storage(format!("could not add {} to bundle: {}", name, e)))?;
    }
    tar.into_inner()?.finish()?;
    Ok(())
}

/// Image id from publish tool output.
///
/// The last non-empty line's first token carries `emi="<image id>"`.
pub(crate) fn parse_image_id(stdout: &str) -> SpotstackResult<String> {
    let token = stdout
        .lines()
        .map(str::trim)
        .rfind(|l| !l.is_empty())
        .and_then(|l| l.split_whitespace().next())
        .unwrap_or("");

    let re = Regex::new(r#"emi=\W([^"]+)"#)
        .map_err(|e| SpotstackError::Internal(format!("bad emi pattern: {}", e)))?;

    re.captures(token)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| SpotstackError::Parse(format!("could not get image id from {:?}", token)))
}
