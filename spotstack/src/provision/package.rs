//! Package resolution: reuse a published image, build it, or wait for the
//! run that is building it.

use std::time::Duration;

use spotstack_shared::errors::{SpotstackError, SpotstackResult};
use tokio::time::Instant;

use crate::db::PackageStore;
use crate::image::ImageBuilder;
use crate::models::{Arch, Package};

use super::metrics::ProvisionMetricsStorage;

/// Placeholder row held by the run that builds a package.
///
/// Released on drop unless the build registered the package, so a failed
/// or panicking build never leaves peers waiting on a dead claim.
struct PackageClaim<'a> {
    packages: &'a PackageStore,
    package_id: &'a str,
    armed: bool,
}

impl<'a> PackageClaim<'a> {
    /// Try to claim `package_id`. `None` when another run holds it.
    fn acquire(packages: &'a PackageStore, package_id: &'a str) -> SpotstackResult<Option<Self>> {
        if !packages.try_claim(package_id)? {
            return Ok(None);
        }
        tracing::debug!(package_id = %package_id, "Claimed package for build");
        Ok(Some(Self {
            packages,
            package_id,
            armed: true,
        }))
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PackageClaim<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match self.packages.release_claim(self.package_id) {
            Ok(_) => tracing::debug!(package_id = %self.package_id, "Released package claim"),
            Err(e) => tracing::warn!(
                package_id = %self.package_id,
                error = %e,
                "Failed to release package claim"
            ),
        }
    }
}

pub(crate) struct PackageResolver<'a> {
    pub packages: &'a PackageStore,
    pub builder: &'a ImageBuilder,
    pub metrics: &'a ProvisionMetricsStorage,
    pub poll_interval: Duration,
    pub time_limit: Duration,
}

impl PackageResolver<'_> {
    pub async fn resolve(&self, package_id: &str, arch: Arch) -> SpotstackResult<Package> {
        if let Some(package) = self.packages.get(package_id)? {
            return self.wait_until_ready(package).await;
        }

        let Some(mut claim) = PackageClaim::acquire(self.packages, package_id)? else {
            // Another run inserted the row after our read.
            let package = self.packages.get(package_id)?.ok_or_else(|| {
                SpotstackError::NotFound(format!("package {} disappeared", package_id))
            })?;
            return self.wait_until_ready(package).await;
        };

        let package = self.builder.build(package_id, arch).await?;
        claim.disarm();
        ProvisionMetricsStorage::incr(&self.metrics.packages_built);
        Ok(package)
    }

    /// Re-read `package` until it leaves `downloading`.
    async fn wait_until_ready(&self, mut package: Package) -> SpotstackResult<Package> {
        if !package.is_downloading() {
            return Ok(package);
        }

        tracing::info!(
            package_id = %package.ecp_uuid,
            "Package is being built by another run, waiting"
        );

        let started = Instant::now();
        while package.is_downloading() {
            if started.elapsed() > self.time_limit {
                return Err(SpotstackError::Timeout(format!(
                    "time limit for package download is reached ({})",
                    package.ecp_uuid
                )));
            }
            tokio::time::sleep(self.poll_interval).await;
            package = self.packages.refresh(&package)?;
        }

        tracing::debug!(
            package_id = %package.ecp_uuid,
            waited_ms = started.elapsed().as_millis() as u64,
            "Package became ready"
        );
        Ok(package)
    }
}
