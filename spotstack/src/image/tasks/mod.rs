//! Image build tasks, one per [`BuildStep`].

mod boot;
mod download;
mod extract;
mod mount;
mod publish;
mod rootfs;

pub(crate) use boot::BootFilesTask;
pub(crate) use download::DownloadTask;
pub(crate) use extract::{ExtractTask, LocateOffsetTask};
pub(crate) use mount::{MountTask, UnmountTask};
pub(crate) use publish::{PublishTask, RegisterTask};
pub(crate) use rootfs::{ConvertTask, RootFsTask};

use std::sync::Arc;

use spotstack_shared::errors::{SpotstackError, SpotstackResult};
use tokio::sync::Mutex;

use super::state::BuildStep;
use super::types::BuildContext;

pub type BuildCtx = Arc<Mutex<BuildContext>>;

/// Advance the build state machine to `step` and return the package id.
async fn task_start(ctx: &BuildCtx, step: BuildStep) -> SpotstackResult<String> {
    let mut ctx = ctx.lock().await;
    ctx.state.start(step)?;
    tracing::debug!(
        package_id = %ctx.package_id,
        step = step.as_str(),
        "Build step started"
    );
    Ok(ctx.package_id.clone())
}

fn log_task_error(package_id: &str, step: BuildStep, error: &SpotstackError) {
    tracing::error!(
        package_id = %package_id,
        step = step.as_str(),
        error = %error,
        "Build step failed"
    );
}

/// Run blocking filesystem work off the async workers.
async fn blocking<T, F>(f: F) -> SpotstackResult<T>
where
    F: FnOnce() -> SpotstackResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| SpotstackError::Internal(format!("blocking task failed: {}", e)))?
}
