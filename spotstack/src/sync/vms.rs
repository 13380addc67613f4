use serde::Serialize;
use spotstack_shared::errors::SpotstackResult;

use crate::cloud::{CloudClient, instances_by_id};
use crate::db::VmStore;
use crate::models::VmState;

/// What one reconciliation pass changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct VmSyncReport {
    pub deleted: usize,
    pub updated: usize,
    pub unchanged: usize,
}

/// Cloud state of an instance that is on its way out of the listing.
const TERMINATED: &str = "terminated";

/// Mirror live instance state into the VM rows.
///
/// Rows whose instance is missing from the cloud listing (or reported as
/// terminated) are deleted. Others pick up the instance's address and, when
/// the cloud state maps to a [`VmState`], its state. Every change is
/// committed on its own.
pub async fn sync_vms(store: &VmStore, cloud: &dyn CloudClient) -> SpotstackResult<VmSyncReport> {
    let live = instances_by_id(cloud.list_instances().await?);
    let mut report = VmSyncReport::default();

    for mut vm in store.list()? {
        let Some(instance) = live.get(&vm.nova_id).filter(|i| i.state != TERMINATED) else {
            tracing::info!(
                vm_id = %vm.ecp_uuid,
                nova_id = %vm.nova_id,
                "Instance gone, removing VM"
            );
            store.delete(&vm.ecp_uuid)?;
            report.deleted += 1;
            continue;
        };

        let mut changed = false;
        if !instance.dns_name.is_empty() && vm.ip_address != instance.dns_name {
            vm.ip_address = instance.dns_name.clone();
            changed = true;
        }

        match VmState::from_cloud_state(&instance.state) {
            Some(state) if state != vm.state => {
                if !vm.state.can_transition_to(state) {
                    tracing::warn!(
                        vm_id = %vm.ecp_uuid,
                        from = %vm.state,
                        to = %state,
                        "Cloud reports a backward state change, adopting it"
                    );
                }
                vm.state = state;
                changed = true;
            }
            Some(_) => {}
            None => tracing::warn!(
                vm_id = %vm.ecp_uuid,
                nova_id = %vm.nova_id,
                cloud_state = %instance.state,
                "Unknown instance state, keeping recorded state"
            ),
        }

        if changed {
            store.update(&vm)?;
            report.updated += 1;
        } else {
            report.unchanged += 1;
        }
    }

    tracing::info!(
        deleted = report.deleted,
        updated = report.updated,
        unchanged = report.unchanged,
        "VM states synchronized"
    );
    Ok(report)
}
