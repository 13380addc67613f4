//! End-to-end provisioning runs against a fake cloud and scripted host.

mod common;

use std::time::Duration;

use common::TestContext;
use spotstack::cloud::Addressing;
use spotstack::db::{PackageStore, VmStore};
use spotstack::{Package, PackageState, SpotstackError, Vm, VmState};

const PACKAGE: &str = "4f1c2b7e-0d5a-4c1e-9a61-3b8f2e7d9c10";

#[tokio::test]
async fn test_provision_launches_instance_and_records_vm() {
    let ctx = TestContext::new().await;
    ctx.server.serve(PACKAGE, common::package_archive());
    let hardware = ctx.hardware("m1.small", "x86_64").await;

    ctx.runtime
        .provision("vm-1", "task-1", &hardware, PACKAGE)
        .unwrap();
    let task = ctx.wait_for_task("task-1").await;

    assert!(!task.is_error, "task failed: {:?}", task.message);
    assert_eq!(task.message.as_deref(), Some("Provision vm-1 OK"));
    assert!(task.ended.is_some());

    let launches = ctx.cloud.launches();
    assert_eq!(launches.len(), 1);
    assert_eq!(launches[0].image_id, "ami-00000001");
    assert_eq!(launches[0].instance_type, "m1.small");
    assert_eq!(launches[0].addressing, Addressing::Private);
    assert_eq!((launches[0].min_count, launches[0].max_count), (1, 1));

    let vms = ctx.runtime.list_vms().await.unwrap();
    assert_eq!(vms.len(), 1);
    let vm = &vms[0];
    assert_eq!(vm.ecp_uuid, "vm-1");
    assert_eq!(vm.nova_id, "i-00000001");
    assert_eq!(vm.state, VmState::Scheduling);
    assert_eq!(vm.hardware_uuid, hardware);
    assert_eq!(vm.package_uuid, PACKAGE);

    let packages = ctx.runtime.list_packages().unwrap();
    assert_eq!(packages.len(), 1);
    assert_eq!(packages[0].state, PackageState::Ready);
    assert_eq!(packages[0].nova_id.as_deref(), Some("ami-00000001"));
    assert_eq!(ctx.runtime.metrics().runs_succeeded_total(), 1);
    assert_eq!(ctx.runtime.metrics().packages_built_total(), 1);
}

#[tokio::test]
async fn test_submit_creates_pending_task() {
    let ctx = TestContext::new().await;
    ctx.server.serve(PACKAGE, common::package_archive());
    ctx.host.set_publish_delay(Duration::from_millis(200));
    let hardware = ctx.hardware("m1.small", "i386").await;

    let (vm_id, task_id) = ctx.runtime.submit(&hardware, PACKAGE).unwrap();

    let pending = ctx.runtime.task(&task_id).unwrap().unwrap();
    assert_eq!(pending.vm_uuid, vm_id);
    assert_eq!(pending.completed, 0);
    assert!(!pending.is_error);

    let done = ctx.wait_for_task(&task_id).await;
    assert!(!done.is_error);
    assert_eq!(done.completed, 100);
}

#[tokio::test]
async fn test_reuses_published_package() {
    let ctx = TestContext::new().await;
    let hardware = ctx.hardware("m1.large", "x86_64").await;
    PackageStore::new(ctx.db.clone())
        .insert(&Package::ready(PACKAGE, "ami-cafe0001"))
        .unwrap();

    ctx.runtime.provision("vm-1", "task-1", &hardware, PACKAGE).unwrap();
    ctx.runtime.provision("vm-2", "task-2", &hardware, PACKAGE).unwrap();
    ctx.runtime.shutdown().await;

    for task_id in ["task-1", "task-2"] {
        let task = ctx.runtime.task(task_id).unwrap().unwrap();
        assert!(!task.is_error, "task failed: {:?}", task.message);
    }
    let launches = ctx.cloud.launches();
    assert_eq!(launches.len(), 2);
    assert!(launches.iter().all(|l| l.image_id == "ami-cafe0001"));
    assert_eq!(ctx.server.requests_for(PACKAGE), 0);
    assert!(ctx.host.calls().is_empty());
    assert_eq!(ctx.runtime.metrics().packages_built_total(), 0);
}

#[tokio::test]
async fn test_unknown_hardware_fails_task() {
    let ctx = TestContext::new().await;
    ctx.server.serve(PACKAGE, common::package_archive());

    ctx.runtime
        .provision("vm-1", "task-1", "no-such-hardware", PACKAGE)
        .unwrap();
    let task = ctx.wait_for_task("task-1").await;

    assert!(task.is_error);
    assert_eq!(
        task.message.as_deref(),
        Some("not found: could not get hardware no-such-hardware")
    );
    assert!(ctx.runtime.list_vms().await.unwrap().is_empty());
    assert!(ctx.cloud.launches().is_empty());
    assert_eq!(ctx.server.requests_for(PACKAGE), 0);
    assert_eq!(ctx.runtime.metrics().runs_failed_total(), 1);
}

#[tokio::test]
async fn test_failed_run_removes_existing_vm_row() {
    let ctx = TestContext::new().await;
    let vms = VmStore::new(ctx.db.clone());
    vms.insert(&Vm::scheduled("vm-1", "i-000000aa", "hw", "pkg")).unwrap();
    ctx.cloud.add_instance("i-000000aa", "running", "10.0.0.5");

    ctx.runtime
        .provision("vm-1", "task-1", "no-such-hardware", PACKAGE)
        .unwrap();
    let task = ctx.wait_for_task("task-1").await;

    assert!(task.is_error);
    assert!(vms.get("vm-1").unwrap().is_none());
    assert!(ctx.cloud.launches().is_empty());
}

#[tokio::test]
async fn test_launch_failure_fails_task_without_vm() {
    let ctx = TestContext::new().await;
    ctx.server.serve(PACKAGE, common::package_archive());
    ctx.cloud.fail_launches("InstanceLimitExceeded");
    let hardware = ctx.hardware("m1.small", "x86_64").await;

    ctx.runtime.provision("vm-1", "task-1", &hardware, PACKAGE).unwrap();
    let task = ctx.wait_for_task("task-1").await;

    assert!(task.is_error);
    assert!(task.message.unwrap().contains("InstanceLimitExceeded"));
    assert!(ctx.runtime.list_vms().await.unwrap().is_empty());

    // The image was still published and stays reusable.
    let package = PackageStore::new(ctx.db.clone()).get(PACKAGE).unwrap().unwrap();
    assert_eq!(package.nova_id.as_deref(), Some("ami-00000001"));
}

#[tokio::test]
async fn test_build_failure_fails_task_and_releases_package() {
    let ctx = TestContext::new().await;
    ctx.server.serve(PACKAGE, common::archive_without_disk());
    let hardware = ctx.hardware("m1.small", "x86_64").await;

    ctx.runtime.provision("vm-1", "task-1", &hardware, PACKAGE).unwrap();
    let task = ctx.wait_for_task("task-1").await;

    assert!(task.is_error);
    assert!(task.message.unwrap().contains("disk file not found"));
    assert!(ctx.cloud.launches().is_empty());
    assert!(PackageStore::new(ctx.db.clone()).get(PACKAGE).unwrap().is_none());
}

#[tokio::test]
async fn test_concurrent_runs_build_package_once() {
    let ctx = TestContext::new().await;
    ctx.server.serve(PACKAGE, common::package_archive());
    ctx.host.set_publish_delay(Duration::from_millis(100));
    let hardware = ctx.hardware("m1.small", "x86_64").await;

    for i in 0..3 {
        ctx.runtime
            .provision(&format!("vm-{}", i), &format!("task-{}", i), &hardware, PACKAGE)
            .unwrap();
    }
    ctx.runtime.shutdown().await;

    for i in 0..3 {
        let task = ctx.runtime.task(&format!("task-{}", i)).unwrap().unwrap();
        assert!(!task.is_error, "task-{} failed: {:?}", i, task.message);
    }
    assert_eq!(ctx.server.requests_for(PACKAGE), 1);
    assert_eq!(ctx.host.published(), 1);
    assert_eq!(ctx.runtime.metrics().packages_built_total(), 1);

    let launches = ctx.cloud.launches();
    assert_eq!(launches.len(), 3);
    assert!(launches.iter().all(|l| l.image_id == "ami-00000001"));
    assert_eq!(ctx.runtime.list_vms().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_panicking_build_is_recorded_as_error() {
    let ctx = TestContext::new().await;
    ctx.server.serve(PACKAGE, common::package_archive());
    ctx.host.panic_on("dd");
    let hardware = ctx.hardware("m1.small", "x86_64").await;

    ctx.runtime.provision("vm-1", "task-1", &hardware, PACKAGE).unwrap();
    let task = ctx.wait_for_task("task-1").await;

    assert!(task.is_error);
    assert!(task.message.unwrap().contains("dd exploded"));
    assert!(PackageStore::new(ctx.db.clone()).get(PACKAGE).unwrap().is_none());

    // The armed mount guard unmounts from its drop.
    for _ in 0..100 {
        if ctx.host.active_mounts() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(ctx.host.active_mounts(), 0);
}

#[tokio::test]
async fn test_provision_rejected_after_shutdown() {
    let ctx = TestContext::new().await;
    ctx.runtime.shutdown().await;

    let err = ctx.runtime.provision("vm-1", "task-1", "hw", PACKAGE).unwrap_err();
    assert!(matches!(err, SpotstackError::InvalidState(_)));
    assert!(ctx.runtime.task("task-1").unwrap().is_none());
}

#[tokio::test]
async fn test_reservation_without_instances_falls_back_to_listing() {
    let ctx = TestContext::new().await;
    ctx.cloud.detach_reservations();
    let hardware = ctx.hardware("m1.small", "x86_64").await;
    PackageStore::new(ctx.db.clone())
        .insert(&Package::ready(PACKAGE, "ami-cafe0001"))
        .unwrap();

    ctx.runtime.provision("vm-1", "task-1", &hardware, PACKAGE).unwrap();
    let task = ctx.wait_for_task("task-1").await;

    assert!(!task.is_error, "task failed: {:?}", task.message);
    let vms = ctx.runtime.list_vms().await.unwrap();
    assert_eq!(vms[0].nova_id, "i-00000001");
}
