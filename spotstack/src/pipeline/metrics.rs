#[derive(Debug, Clone)]
pub struct TaskMetrics {
    pub name: String,
    pub duration_ms: u128,
}

#[derive(Debug, Clone, Default)]
pub struct PipelineMetrics {
    pub total_duration_ms: u128,
    pub tasks: Vec<TaskMetrics>,
}

impl PipelineMetrics {
    pub fn task_duration_ms(&self, name: &str) -> Option<u128> {
        self.tasks
            .iter()
            .find(|task| task.name == name)
            .map(|task| task.duration_ms)
    }

    /// Emit one debug line per task plus the total.
    pub fn log(&self, label: &str) {
        for task in &self.tasks {
            tracing::debug!(
                pipeline = label,
                task = %task.name,
                duration_ms = task.duration_ms as u64,
                "Pipeline task completed"
            );
        }
        tracing::info!(
            pipeline = label,
            tasks = self.tasks.len(),
            total_duration_ms = self.total_duration_ms as u64,
            "Pipeline completed"
        );
    }
}
