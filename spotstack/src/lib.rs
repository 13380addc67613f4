//! spotstack: marketplace VM provisioning for a Nova-style cloud.
//!
//! Turns marketplace packages into published cloud images, launches
//! instances from them, and keeps the local hardware catalog and VM records
//! in step with the cloud.

pub mod cloud;
pub mod db;
pub mod image;
pub mod models;
pub mod pipeline;
pub mod provision;
pub mod runtime;
pub mod sync;
pub mod util;

use std::path::Path;

pub use models::{Arch, HardwareTemplate, Package, PackageState, Task, Vm, VmState};
pub use provision::{ProvisionMetrics, Provisioner};
pub use runtime::{SpotstackOptions, SpotstackRuntime};
pub use spotstack_shared::errors::{SpotstackError, SpotstackResult};

use spotstack_shared::constants::{dirs, files};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Initialize file logging under `<home_dir>/logs`, rotated daily.
///
/// `RUST_LOG` selects the filter (default `info`). Keep the returned guard
/// alive until exit so buffered events are flushed.
pub fn init_logging_for(home_dir: &Path) -> SpotstackResult<WorkerGuard> {
    let logs_dir = home_dir.join(dirs::LOGS_DIR);
    std::fs::create_dir_all(&logs_dir).map_err(|e| {
        SpotstackError::Storage(format!(
            "Failed to create logs directory {}: {}",
            logs_dir.display(),
            e
        ))
    })?;

    let file_appender = tracing_appender::rolling::daily(logs_dir, files::LOG_FILE);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| SpotstackError::Config(format!("invalid log filter: {}", e)))?;

    util::register_to_tracing(non_blocking, env_filter);

    Ok(guard)
}
