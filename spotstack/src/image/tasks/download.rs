//! Task: Download the package archive.

use async_trait::async_trait;
use futures::StreamExt;
use spotstack_shared::errors::{SpotstackError, SpotstackResult};
use tokio::io::AsyncWriteExt;

use super::{BuildCtx, log_task_error, task_start};
use crate::image::state::BuildStep;
use crate::pipeline::PipelineTask;

pub struct DownloadTask;

impl DownloadTask {
    const STEP: BuildStep = BuildStep::Download;
}

#[async_trait]
impl PipelineTask<BuildCtx> for DownloadTask {
    async fn run(self: Box<Self>, ctx: BuildCtx) -> SpotstackResult<()> {
        let package_id = task_start(&ctx, Self::STEP).await?;

        let (url, layout, http) = {
            let ctx = ctx.lock().await;
            (
                ctx.options.package_url(&package_id),
                ctx.layout.clone(),
                ctx.http.clone(),
            )
        };

        layout
            .prepare()
            .inspect_err(|e| log_task_error(&package_id, Self::STEP, e))?;

        let bytes = download(&http, &url, &layout.archive_path())
            .await
            .inspect_err(|e| log_task_error(&package_id, Self::STEP, e))?;

        tracing::info!(
            package_id = %package_id,
            url = %url,
            bytes,
            "Package downloaded"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        Self::STEP.as_str()
    }
}

/// Stream `url` into `target`, returning the number of bytes written.
async fn download(http: &reqwest::Client, url: &str, target: &std::path::Path) -> SpotstackResult<u64> {
    let network = |e: reqwest::Error| SpotstackError::Network(format!("download {} failed: {}", url, e));

    let response = http
        .get(url)
        .send()
        .await
        .map_err(network)?
        .error_for_status()
        .map_err(network)?;

    let mut file = tokio::fs::File::create(target).await?;
    let mut stream = response.bytes_stream();
    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(network)?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;

    Ok(written)
}
