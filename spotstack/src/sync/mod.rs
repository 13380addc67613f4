//! Catalog and VM state synchronization with the cloud.
//!
//! Both operations propagate errors to their caller; a failed sync is
//! retried as a whole.

mod hardware;
mod vms;

pub use hardware::sync_hardware;
pub use vms::{VmSyncReport, sync_vms};
