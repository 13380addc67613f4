//! Cloud control-plane client.
//!
//! The provisioning core only needs three calls: launch instances, list
//! reservations and list instance types. [`CloudClient`] abstracts them;
//! [`EucaClient`] implements them over euca2ools and `nova-manage`.

mod euca;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use spotstack_shared::errors::{SpotstackError, SpotstackResult};

pub use euca::{EucaClient, EucaCredentials, parse_instance_types, parse_reservations};

/// Network addressing requested for launched instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Addressing {
    Private,
    Public,
}

impl Addressing {
    pub fn as_str(&self) -> &'static str {
        match self {
            Addressing::Private => "private",
            Addressing::Public => "public",
        }
    }
}

/// Parameters for one `run_instances` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub image_id: String,
    pub instance_type: String,
    pub addressing: Addressing,
    pub min_count: u32,
    pub max_count: u32,
}

impl LaunchRequest {
    /// Exactly one privately addressed instance.
    pub fn single(image_id: &str, instance_type: &str) -> Self {
        Self {
            image_id: image_id.to_string(),
            instance_type: instance_type.to_string(),
            addressing: Addressing::Private,
            min_count: 1,
            max_count: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    /// Address reported by the cloud; empty until assigned.
    pub dns_name: String,
    /// Raw cloud state (`pending`, `running`, `terminated`, ...).
    pub state: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: String,
    pub instances: Vec<Instance>,
}

/// An instance type as listed by the cloud.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceType {
    pub name: String,
    /// Memory in MB.
    pub memory: u64,
    pub cpus: u32,
}

#[async_trait]
pub trait CloudClient: Send + Sync {
    async fn run_instances(&self, request: LaunchRequest) -> SpotstackResult<Reservation>;

    async fn list_instances(&self) -> SpotstackResult<Vec<Reservation>>;

    async fn list_instance_types(&self) -> SpotstackResult<Vec<InstanceType>>;
}

pub type SharedCloudClient = Arc<dyn CloudClient>;

/// Flatten reservations into a map keyed by instance id.
pub fn instances_by_id(reservations: Vec<Reservation>) -> HashMap<String, Instance> {
    reservations
        .into_iter()
        .flat_map(|r| r.instances)
        .map(|i| (i.id.clone(), i))
        .collect()
}

/// Id of the first instance created by `reservation`.
///
/// Some clouds return the reservation before its instances are attached;
/// in that case reservations are re-listed and matched by id.
pub async fn launched_instance_id(
    client: &dyn CloudClient,
    reservation: &Reservation,
) -> SpotstackResult<String> {
    if let Some(instance) = reservation.instances.first() {
        return Ok(instance.id.clone());
    }

    tracing::debug!(
        reservation_id = %reservation.id,
        "Reservation carries no instances, re-listing"
    );

    client
        .list_instances()
        .await?
        .into_iter()
        .find(|r| r.id == reservation.id)
        .and_then(|r| r.instances.into_iter().next())
        .map(|i| i.id)
        .ok_or_else(|| {
            SpotstackError::NotFound(format!("no instance for reservation {}", reservation.id))
        })
}
