//! Table-driven sequential pipeline execution.
//!
//! ```text
//! ExecutionPlan → Pipeline → Tasks (one after another)
//! ```
//!
//! A failing task aborts the run; tasks after it never start. The executor
//! records per-task durations for the tasks that completed.
//!
//! ## Example
//!
//! ```ignore
//! let plan = ExecutionPlan::new(vec![Box::new(DownloadTask), Box::new(ExtractTask)]);
//! let metrics = PipelineExecutor::execute(PipelineBuilder::from_plan(plan), build_ctx).await?;
//! metrics.log("image_build");
//! ```

mod metrics;
#[allow(clippy::module_inception)]
mod pipeline;
mod task;

pub use metrics::{PipelineMetrics, TaskMetrics};
pub use pipeline::{ExecutionPlan, Pipeline, PipelineBuilder, PipelineExecutor};
pub use task::{BoxedTask, PipelineTask};
