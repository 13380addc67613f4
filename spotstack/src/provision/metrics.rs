//! Provisioning counters.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Storage for provisioning metrics.
///
/// Shared by every run of one provisioner. All counters are monotonic.
#[derive(Clone, Debug, Default)]
pub struct ProvisionMetricsStorage {
    pub(crate) runs_started: Arc<AtomicU64>,
    pub(crate) runs_succeeded: Arc<AtomicU64>,
    pub(crate) runs_failed: Arc<AtomicU64>,
    pub(crate) packages_built: Arc<AtomicU64>,
}

impl ProvisionMetricsStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Handle for reading provisioning metrics.
#[derive(Clone, Debug)]
pub struct ProvisionMetrics {
    storage: ProvisionMetricsStorage,
}

impl ProvisionMetrics {
    pub(crate) fn new(storage: ProvisionMetricsStorage) -> Self {
        Self { storage }
    }

    /// Runs accepted by `provision()`.
    pub fn runs_started_total(&self) -> u64 {
        self.storage.runs_started.load(Ordering::Relaxed)
    }

    pub fn runs_succeeded_total(&self) -> u64 {
        self.storage.runs_succeeded.load(Ordering::Relaxed)
    }

    /// Runs that ended with an error task, panics included.
    pub fn runs_failed_total(&self) -> u64 {
        self.storage.runs_failed.load(Ordering::Relaxed)
    }

    /// Image builds that reached the register step.
    pub fn packages_built_total(&self) -> u64 {
        self.storage.packages_built.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> ProvisionMetricsSnapshot {
        ProvisionMetricsSnapshot {
            runs_started: self.runs_started_total(),
            runs_succeeded: self.runs_succeeded_total(),
            runs_failed: self.runs_failed_total(),
            packages_built: self.packages_built_total(),
        }
    }
}

/// Point-in-time copy of the counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ProvisionMetricsSnapshot {
    pub runs_started: u64,
    pub runs_succeeded: u64,
    pub runs_failed: u64,
    pub packages_built: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_shared_between_clones() {
        let storage = ProvisionMetricsStorage::new();
        let metrics = ProvisionMetrics::new(storage.clone());

        ProvisionMetricsStorage::incr(&storage.runs_started);
        ProvisionMetricsStorage::incr(&storage.runs_started);
        ProvisionMetricsStorage::incr(&storage.runs_failed);

        assert_eq!(
            metrics.snapshot(),
            ProvisionMetricsSnapshot {
                runs_started: 2,
                runs_succeeded: 0,
                runs_failed: 1,
                packages_built: 0,
            }
        );
    }
}
