//! Provisioning orchestrator.
//!
//! ```text
//! provision(vm, task, hardware, package)
//!   └─ spawn (TaskTracker) ─ catch_unwind ─┬─ load hardware
//!                                          ├─ resolve package (reuse / build / wait)
//!                                          ├─ launch one instance
//!                                          └─ VM + Task committed together
//!                        any error or panic ─→ Task is_error, VM row removed
//! ```
//!
//! The run boundary is the only place where errors turn into task state.

mod metrics;
mod package;

pub use metrics::{ProvisionMetrics, ProvisionMetricsSnapshot, ProvisionMetricsStorage};

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use spotstack_shared::constants::provision_ok_message;
use spotstack_shared::errors::{SpotstackError, SpotstackResult};
use tokio_util::task::TaskTracker;

use crate::cloud::{LaunchRequest, SharedCloudClient, launched_instance_id};
use crate::db::{Database, HardwareStore, PackageStore, TaskStore, VmStore};
use crate::image::ImageBuilder;
use crate::models::{Arch, Package, Task, Vm, generate_id};
use crate::runtime::options::SpotstackOptions;

use package::PackageResolver;

/// Starts and supervises provisioning runs.
///
/// Cheap to clone; clones share the run tracker and metrics.
#[derive(Clone)]
pub struct Provisioner {
    inner: Arc<ProvisionerInner>,
}

struct ProvisionerInner {
    db: Database,
    hardware: HardwareStore,
    packages: PackageStore,
    tasks: TaskStore,
    cloud: SharedCloudClient,
    builder: ImageBuilder,
    options: Arc<SpotstackOptions>,
    tracker: TaskTracker,
    metrics: ProvisionMetricsStorage,
}

impl Provisioner {
    pub fn new(
        db: Database,
        cloud: SharedCloudClient,
        builder: ImageBuilder,
        options: Arc<SpotstackOptions>,
    ) -> Self {
        Self {
            inner: Arc::new(ProvisionerInner {
                hardware: HardwareStore::new(db.clone()),
                packages: PackageStore::new(db.clone()),
                tasks: TaskStore::new(db.clone()),
                db,
                cloud,
                builder,
                options,
                tracker: TaskTracker::new(),
                metrics: ProvisionMetricsStorage::new(),
            }),
        }
    }

    /// Start provisioning `vm_id` in the background.
    ///
    /// Creates the task row if the caller has not, then returns. The outcome
    /// is only observable through the task and VM records.
    pub fn provision(
        &self,
        vm_id: &str,
        task_id: &str,
        hardware_id: &str,
        package_id: &str,
    ) -> SpotstackResult<()> {
        let inner = &self.inner;
        if inner.tracker.is_closed() {
            return Err(SpotstackError::InvalidState(
                "provisioner is shutting down".into(),
            ));
        }

        if inner.tasks.get(task_id)?.is_none() {
            inner.tasks.insert(&Task::with_id(task_id, vm_id))?;
        }

        ProvisionMetricsStorage::incr(&inner.metrics.runs_started);
        tracing::info!(
            vm_id = %vm_id,
            task_id = %task_id,
            hardware_id = %hardware_id,
            package_id = %package_id,
            "Provisioning started"
        );

        let inner = Arc::clone(inner);
        let request = RunRequest {
            vm_id: vm_id.to_string(),
            task_id: task_id.to_string(),
            hardware_id: hardware_id.to_string(),
            package_id: package_id.to_string(),
        };
        self.inner.tracker.spawn(async move { inner.run(request).await });
        Ok(())
    }

    /// Provision with freshly generated VM and task ids.
    pub fn submit(&self, hardware_id: &str, package_id: &str) -> SpotstackResult<(String, String)> {
        let vm_id = generate_id();
        let task_id = generate_id();
        self.provision(&vm_id, &task_id, hardware_id, package_id)?;
        Ok((vm_id, task_id))
    }

    /// Return the package, building or waiting for it as needed.
    pub async fn get_or_download_pkg(&self, package_id: &str, arch: Arch) -> SpotstackResult<Package> {
        self.inner.get_or_download_pkg(package_id, arch).await
    }

    /// Stop accepting runs and wait for in-flight ones to finish.
    pub async fn shutdown(&self) {
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
    }

    /// Number of runs still in flight.
    pub fn in_flight(&self) -> usize {
        self.inner.tracker.len()
    }

    pub fn metrics(&self) -> ProvisionMetrics {
        ProvisionMetrics::new(self.inner.metrics.clone())
    }
}

struct RunRequest {
    vm_id: String,
    task_id: String,
    hardware_id: String,
    package_id: String,
}

impl ProvisionerInner {
    /// Run boundary: nothing escapes, every outcome lands in the task row.
    async fn run(&self, request: RunRequest) {
        let result = AssertUnwindSafe(self.execute(&request))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(SpotstackError::Internal(format!(
                    "provisioning panicked: {}",
                    panic_message(panic.as_ref())
                )))
            });

        let recorded = match result {
            Ok(nova_id) => self.record_success(&request, &nova_id),
            Err(e) => Err(e),
        };

        match recorded {
            Ok(()) => {
                ProvisionMetricsStorage::incr(&self.metrics.runs_succeeded);
                tracing::info!(
                    vm_id = %request.vm_id,
                    task_id = %request.task_id,
                    "Provisioning succeeded"
                );
            }
            Err(e) => {
                ProvisionMetricsStorage::incr(&self.metrics.runs_failed);
                tracing::error!(
                    vm_id = %request.vm_id,
                    task_id = %request.task_id,
                    error = %e,
                    "Provisioning failed"
                );
                if let Err(db_error) = self.record_failure(&request, &e) {
                    tracing::error!(
                        task_id = %request.task_id,
                        error = %db_error,
                        "Could not record provisioning failure"
                    );
                }
            }
        }
    }

    /// Steps 1-3. Returns the launched instance id.
    async fn execute(&self, request: &RunRequest) -> SpotstackResult<String> {
        let hardware = self.hardware.get(&request.hardware_id)?.ok_or_else(|| {
            SpotstackError::NotFound(format!("could not get hardware {}", request.hardware_id))
        })?;

        let package = self
            .get_or_download_pkg(&request.package_id, hardware.arch)
            .await?;

        let image_id = package.image_id()?;
        tracing::debug!(
            vm_id = %request.vm_id,
            image_id = %image_id,
            instance_type = %hardware.nova_id,
            "Launching instance"
        );

        let reservation = self
            .cloud
            .run_instances(LaunchRequest::single(image_id, &hardware.nova_id))
            .await?;
        launched_instance_id(self.cloud.as_ref(), &reservation).await
    }

    async fn get_or_download_pkg(&self, package_id: &str, arch: Arch) -> SpotstackResult<Package> {
        PackageResolver {
            packages: &self.packages,
            builder: &self.builder,
            metrics: &self.metrics,
            poll_interval: self.options.poll_interval,
            time_limit: self.options.download_time_limit,
        }
        .resolve(package_id, arch)
        .await
    }

    /// Step 4: VM row and finished task in one transaction.
    fn record_success(&self, request: &RunRequest, nova_id: &str) -> SpotstackResult<()> {
        let vm = Vm::scheduled(
            &request.vm_id,
            nova_id,
            &request.hardware_id,
            &request.package_id,
        );
        let mut task = self.load_task(request)?;
        task.succeed(provision_ok_message(&request.vm_id));

        self.db
            .transaction(|tx| {
                VmStore::insert_with(tx, &vm)?;
                TaskStore::update_with(tx, &task)
            })
            .inspect_err(|e| {
                tracing::warn!(
                    vm_id = %request.vm_id,
                    nova_id = %nova_id,
                    error = %e,
                    "Instance launched but not recorded"
                );
            })
    }

    /// Step 5: error task, no VM row.
    fn record_failure(&self, request: &RunRequest, error: &SpotstackError) -> SpotstackResult<()> {
        let mut task = self.load_task(request)?;
        task.fail(error.to_string());

        self.db.transaction(|tx| {
            if VmStore::delete_with(tx, &request.vm_id)? {
                tracing::debug!(vm_id = %request.vm_id, "Removed VM row of failed run");
            }
            match TaskStore::get_with(tx, &task.ecp_uuid)? {
                Some(_) => TaskStore::update_with(tx, &task),
                None => TaskStore::insert_with(tx, &task),
            }
        })
    }

    fn load_task(&self, request: &RunRequest) -> SpotstackResult<Task> {
        Ok(self
            .tasks
            .get(&request.task_id)?
            .unwrap_or_else(|| Task::with_id(&request.task_id, &request.vm_id)))
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
