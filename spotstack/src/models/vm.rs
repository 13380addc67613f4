use serde::{Deserialize, Serialize};
use spotstack_shared::errors::SpotstackError;

use super::sql_text_enum;

/// Address recorded until the cloud reports one.
pub const DEFAULT_IP_ADDRESS: &str = "127.0.0.1";

/// Lifecycle state of a launched instance as mirrored from the cloud.
///
/// ```text
/// launch()    → Scheduling
/// cloud sync  → Launching → Running
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VmState {
    Scheduling,
    Launching,
    Running,
}

impl VmState {
    /// Forward transitions. The cloud may skip `Launching`.
    pub fn can_transition_to(&self, target: VmState) -> bool {
        use VmState::*;
        matches!(
            (self, target),
            (Scheduling, Launching) | (Scheduling, Running) | (Launching, Running)
        )
    }

    /// Map an instance state reported by the cloud.
    ///
    /// Returns `None` for states with no counterpart here (stopped, error,
    /// shutting down, terminated). Reconciliation keeps the recorded state of
    /// such an instance unless it is terminated.
    pub fn from_cloud_state(state: &str) -> Option<VmState> {
        match state {
            "scheduling" | "pending" | "building" | "networking" => Some(VmState::Scheduling),
            "launching" => Some(VmState::Launching),
            "running" => Some(VmState::Running),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VmState::Scheduling => "scheduling",
            VmState::Launching => "launching",
            VmState::Running => "running",
        }
    }
}

impl std::str::FromStr for VmState {
    type Err = SpotstackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduling" => Ok(VmState::Scheduling),
            "launching" => Ok(VmState::Launching),
            "running" => Ok(VmState::Running),
            other => Err(SpotstackError::Parse(format!("unknown VM state '{}'", other))),
        }
    }
}

impl std::fmt::Display for VmState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

sql_text_enum!(VmState);

/// A launched cloud instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vm {
    pub ecp_uuid: String,
    /// Cloud instance id.
    pub nova_id: String,
    pub state: VmState,
    pub ip_address: String,
    pub hardware_uuid: String,
    pub package_uuid: String,
}

impl Vm {
    /// Record for an instance the cloud has just accepted.
    pub fn scheduled(ecp_uuid: &str, nova_id: &str, hardware_uuid: &str, package_uuid: &str) -> Self {
        Self {
            ecp_uuid: ecp_uuid.to_string(),
            nova_id: nova_id.to_string(),
            state: VmState::Scheduling,
            ip_address: DEFAULT_IP_ADDRESS.to_string(),
            hardware_uuid: hardware_uuid.to_string(),
            package_uuid: package_uuid.to_string(),
        }
    }
}
