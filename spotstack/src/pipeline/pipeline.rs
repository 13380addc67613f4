use std::time::Instant;

use spotstack_shared::errors::SpotstackResult;

use super::metrics::{PipelineMetrics, TaskMetrics};
use super::task::BoxedTask;

pub struct ExecutionPlan<Ctx> {
    tasks: Vec<BoxedTask<Ctx>>,
}

impl<Ctx> ExecutionPlan<Ctx> {
    pub fn new(tasks: Vec<BoxedTask<Ctx>>) -> Self {
        Self { tasks }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn task_names(&self) -> Vec<&str> {
        self.tasks.iter().map(|t| t.name()).collect()
    }

    pub fn tasks(self) -> Vec<BoxedTask<Ctx>> {
        self.tasks
    }
}

pub struct Pipeline<Ctx> {
    tasks: Vec<BoxedTask<Ctx>>,
}

impl<Ctx> Pipeline<Ctx> {
    pub fn new(tasks: Vec<BoxedTask<Ctx>>) -> Self {
        Self { tasks }
    }
}

pub struct PipelineBuilder;

impl PipelineBuilder {
    pub fn from_plan<Ctx>(plan: ExecutionPlan<Ctx>) -> Pipeline<Ctx> {
        Pipeline::new(plan.tasks())
    }
}

/// Runs a pipeline's tasks in order.
pub struct PipelineExecutor;

impl PipelineExecutor {
    /// Execute every task sequentially, stopping at the first error.
    ///
    /// `Ctx` is the shared pipeline context; it is cloned for each task.
    pub async fn execute<Ctx>(pipeline: Pipeline<Ctx>, ctx: Ctx) -> SpotstackResult<PipelineMetrics>
    where
        Ctx: Clone,
    {
        let total_start = Instant::now();
        let mut task_metrics = Vec::with_capacity(pipeline.tasks.len());

        for task in pipeline.tasks {
            let name = task.name().to_string();
            let task_start = Instant::now();
            task.run(ctx.clone()).await.inspect_err(|e| {
                tracing::debug!(task = %name, error = %e, "Pipeline aborted");
            })?;
            task_metrics.push(TaskMetrics {
                name,
                duration_ms: task_start.elapsed().as_millis(),
            });
        }

        Ok(PipelineMetrics {
            total_duration_ms: total_start.elapsed().as_millis(),
            tasks: task_metrics,
        })
    }
}
