use spotstack_shared::errors::SpotstackResult;

use crate::cloud::CloudClient;
use crate::db::HardwareStore;
use crate::models::{Arch, HardwareTemplate};

/// Rebuild the hardware catalog from the cloud's instance types.
///
/// Existing templates are deleted first, then one template per
/// (instance type, architecture) pair is inserted and committed on its own.
/// A failure part-way leaves a partial catalog.
pub async fn sync_hardware(
    store: &HardwareStore,
    cloud: &dyn CloudClient,
) -> SpotstackResult<Vec<HardwareTemplate>> {
    let removed = store.delete_all()?;
    tracing::debug!(removed, "Cleared hardware catalog");

    let types = cloud.list_instance_types().await?;

    let mut created = Vec::with_capacity(types.len() * Arch::ALL.len());
    for instance_type in &types {
        for arch in Arch::ALL {
            let template = HardwareTemplate::for_instance_type(
                &instance_type.name,
                instance_type.memory,
                instance_type.cpus,
                arch,
            );
            store.insert(&template)?;
            created.push(template);
        }
    }

    tracing::info!(
        instance_types = types.len(),
        templates = created.len(),
        "Hardware catalog synchronized"
    );
    Ok(created)
}
