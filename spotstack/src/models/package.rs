use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use spotstack_shared::errors::{SpotstackError, SpotstackResult};

use super::sql_text_enum;

/// Build status of a package image.
///
/// ```text
/// claim()    → Downloading (placeholder row, nova_id unset)
/// register() → Ready       (nova_id set, image published)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageState {
    /// Image published; `nova_id` is authoritative.
    Ready,
    /// Some run is building the image; readers must wait.
    Downloading,
}

impl PackageState {
    pub fn can_transition_to(&self, target: PackageState) -> bool {
        use PackageState::*;
        matches!((self, target), (Downloading, Ready))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PackageState::Ready => "ready",
            PackageState::Downloading => "downloading",
        }
    }
}

impl std::str::FromStr for PackageState {
    type Err = SpotstackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ready" => Ok(PackageState::Ready),
            "downloading" => Ok(PackageState::Downloading),
            other => Err(SpotstackError::Parse(format!(
                "unknown package state '{}'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for PackageState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

sql_text_enum!(PackageState);

/// Build-once, reuse-many VM image keyed by the marketplace package id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub ecp_uuid: String,
    /// Cloud image id. Only set (and only meaningful) once `state` is Ready.
    pub nova_id: Option<String>,
    pub name: String,
    pub storage: u64,
    pub os: String,
    pub description: String,
    pub updated: DateTime<Utc>,
    pub state: PackageState,
}

impl Package {
    /// A published package with the given cloud image id.
    pub fn ready(ecp_uuid: &str, nova_id: &str) -> Self {
        Self {
            nova_id: Some(nova_id.to_string()),
            state: PackageState::Ready,
            ..Self::placeholder(ecp_uuid)
        }
    }

    /// Placeholder row claiming a package id for an in-progress build.
    pub fn placeholder(ecp_uuid: &str) -> Self {
        Self {
            ecp_uuid: ecp_uuid.to_string(),
            nova_id: None,
            name: ecp_uuid.to_string(),
            storage: 0,
            os: "unknown".to_string(),
            description: String::new(),
            updated: Utc::now(),
            state: PackageState::Downloading,
        }
    }

    pub fn is_downloading(&self) -> bool {
        self.state == PackageState::Downloading
    }

    /// Cloud image id to launch from.
    pub fn image_id(&self) -> SpotstackResult<&str> {
        match (&self.state, &self.nova_id) {
            (PackageState::Ready, Some(id)) => Ok(id),
            _ => Err(SpotstackError::InvalidState(format!(
                "package {} has no published image (state: {})",
                self.ecp_uuid, self.state
            ))),
        }
    }
}
