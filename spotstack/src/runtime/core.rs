//! High-level runtime tying the store, cloud client and provisioner together.

use std::sync::Arc;

use chrono::Utc;

use spotstack_shared::errors::{SpotstackError, SpotstackResult};

use crate::cloud::{EucaClient, EucaCredentials, SharedCloudClient};
use crate::db::{Database, HardwareStore, PackageStore, TaskStore, VmStore};
use crate::image::ImageBuilder;
use crate::models::{Arch, HardwareTemplate, Package, Task, Vm};
use crate::provision::{ProvisionMetrics, Provisioner};
use crate::runtime::layout::FilesystemLayout;
use crate::runtime::options::SpotstackOptions;
use crate::sync::{VmSyncReport, sync_hardware, sync_vms};
use crate::util::{HostToolRunner, SharedToolRunner};

/// SpotstackRuntime is the entry point for provisioning and catalog sync.
///
/// **Cloning**: cheap, all clones share the same state.
#[derive(Clone)]
pub struct SpotstackRuntime {
    inner: RuntimeInner,
}

type RuntimeInner = Arc<RuntimeInnerImpl>;

struct RuntimeInnerImpl {
    layout: FilesystemLayout,
    options: Arc<SpotstackOptions>,
    hardware: HardwareStore,
    packages: PackageStore,
    tasks: TaskStore,
    vms: VmStore,
    cloud: SharedCloudClient,
    provisioner: Provisioner,
}

impl SpotstackRuntime {
    /// Create a runtime that drives host tools and euca2ools.
    pub fn new(options: SpotstackOptions) -> SpotstackResult<Self> {
        let runner: SharedToolRunner = Arc::new(HostToolRunner::new(options.use_sudo));

        let mut euca = EucaClient::new(
            Arc::clone(&runner),
            options.nova_manage.display().to_string(),
        );
        if let Some(ref cloud) = options.cloud {
            euca = euca.with_credentials(EucaCredentials {
                endpoint: cloud.endpoint.clone(),
                access_key: cloud.access_key.clone(),
                secret_key: cloud.secret_key.clone(),
            });
        }

        Self::with_clients(options, Arc::new(euca), runner)
    }

    /// Create a runtime with explicit cloud and tool backends.
    pub fn with_clients(
        options: SpotstackOptions,
        cloud: SharedCloudClient,
        runner: SharedToolRunner,
    ) -> SpotstackResult<Self> {
        options.sanitize()?;

        let layout = FilesystemLayout::new(options.home_dir.clone(), options.repo_dir());
        layout.prepare().map_err(|e| {
            SpotstackError::Storage(format!(
                "Failed to initialize filesystem at {}: {}",
                layout.home_dir().display(),
                e
            ))
        })?;

        let db = Database::open(&layout.db_path())?;
        let options = Arc::new(options);

        let packages = PackageStore::new(db.clone());
        release_stale_claims(&packages, &options)?;
        let builder = ImageBuilder::new(
            Arc::clone(&options),
            layout.clone(),
            runner,
            packages.clone(),
        );
        let provisioner = Provisioner::new(
            db.clone(),
            Arc::clone(&cloud),
            builder,
            Arc::clone(&options),
        );

        tracing::debug!(
            home_dir = %layout.home_dir().display(),
            repo_dir = %layout.repo_dir().display(),
            "Runtime initialized"
        );

        Ok(Self {
            inner: Arc::new(RuntimeInnerImpl {
                hardware: HardwareStore::new(db.clone()),
                packages,
                tasks: TaskStore::new(db.clone()),
                vms: VmStore::new(db),
                layout,
                options,
                cloud,
                provisioner,
            }),
        })
    }

    pub fn options(&self) -> &SpotstackOptions {
        &self.inner.options
    }

    pub fn layout(&self) -> &FilesystemLayout {
        &self.inner.layout
    }

    pub fn provisioner(&self) -> &Provisioner {
        &self.inner.provisioner
    }

    /// See [`Provisioner::provision`].
    pub fn provision(
        &self,
        vm_id: &str,
        task_id: &str,
        hardware_id: &str,
        package_id: &str,
    ) -> SpotstackResult<()> {
        self.inner
            .provisioner
            .provision(vm_id, task_id, hardware_id, package_id)
    }

    /// Provision with generated ids. Returns `(vm_id, task_id)`.
    pub fn submit(&self, hardware_id: &str, package_id: &str) -> SpotstackResult<(String, String)> {
        self.inner.provisioner.submit(hardware_id, package_id)
    }

    pub async fn get_or_download_pkg(&self, package_id: &str, arch: Arch) -> SpotstackResult<Package> {
        self.inner.provisioner.get_or_download_pkg(package_id, arch).await
    }

    pub async fn sync_hardware(&self) -> SpotstackResult<Vec<HardwareTemplate>> {
        sync_hardware(&self.inner.hardware, self.inner.cloud.as_ref()).await
    }

    pub async fn sync_vms(&self) -> SpotstackResult<VmSyncReport> {
        sync_vms(&self.inner.vms, self.inner.cloud.as_ref()).await
    }

    pub fn task(&self, task_id: &str) -> SpotstackResult<Option<Task>> {
        self.inner.tasks.get(task_id)
    }

    pub fn list_tasks(&self) -> SpotstackResult<Vec<Task>> {
        self.inner.tasks.list()
    }

    /// Reconcile with the cloud, then list VMs.
    pub async fn list_vms(&self) -> SpotstackResult<Vec<Vm>> {
        self.sync_vms().await?;
        self.inner.vms.list()
    }

    pub fn list_hardware(&self) -> SpotstackResult<Vec<HardwareTemplate>> {
        self.inner.hardware.list()
    }

    pub fn list_packages(&self) -> SpotstackResult<Vec<Package>> {
        self.inner.packages.list()
    }

    pub fn metrics(&self) -> ProvisionMetrics {
        self.inner.provisioner.metrics()
    }

    /// Wait for in-flight provisioning runs; no new runs are accepted.
    pub async fn shutdown(&self) {
        self.inner.provisioner.shutdown().await;
    }
}

/// Drop build claims left behind by a process that died mid-build.
///
/// Only claims older than the download time limit go; pollers give up on a
/// claim by then, so a younger one may still belong to a live build.
fn release_stale_claims(packages: &PackageStore, options: &SpotstackOptions) -> SpotstackResult<()> {
    let limit = chrono::Duration::from_std(options.download_time_limit).map_err(|e| {
        SpotstackError::Config(format!("download time limit out of range: {}", e))
    })?;
    let released = packages.release_stale_claims(Utc::now() - limit)?;
    if released > 0 {
        tracing::info!(released, "Released stale package claims");
    }
    Ok(())
}
