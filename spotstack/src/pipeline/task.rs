//! Task trait for pipeline execution.

use async_trait::async_trait;
use spotstack_shared::errors::SpotstackResult;

/// A unit of work run by the pipeline executor.
///
/// Tasks share a context, cloned per task; use interior mutability for
/// outputs consumed by later tasks.
#[async_trait]
pub trait PipelineTask<Ctx>: Send + Sync {
    async fn run(self: Box<Self>, ctx: Ctx) -> SpotstackResult<()>;

    /// Stable task name used in logs and metrics.
    fn name(&self) -> &str;
}

pub type BoxedTask<Ctx> = Box<dyn PipelineTask<Ctx>>;
