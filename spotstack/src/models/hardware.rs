use serde::{Deserialize, Serialize};
use spotstack_shared::errors::SpotstackError;

use super::sql_text_enum;

/// Hypervisor tag stored on templates built from the cloud catalog.
pub const DEFAULT_HYPERVISOR: &str = "kvm-hvm";

/// CPU architecture a hardware template (and the package image built for it) targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Arch {
    #[serde(rename = "i386")]
    I386,
    #[serde(rename = "x86_64")]
    X86_64,
}

impl Arch {
    /// Architectures every cloud instance type is offered in.
    pub const ALL: [Arch; 2] = [Arch::I386, Arch::X86_64];

    pub fn as_str(&self) -> &'static str {
        match self {
            Arch::I386 => "i386",
            Arch::X86_64 => "x86_64",
        }
    }
}

impl std::str::FromStr for Arch {
    type Err = SpotstackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "i386" => Ok(Arch::I386),
            "x86_64" => Ok(Arch::X86_64),
            other => Err(SpotstackError::Parse(format!(
                "unknown architecture '{}'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for Arch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

sql_text_enum!(Arch);

/// Named cpu/memory/architecture combination mapped to a cloud instance type.
///
/// Immutable once created; the whole catalog is replaced by
/// [`crate::sync::sync_hardware`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareTemplate {
    pub ecp_uuid: String,
    /// Display name, unique across the catalog (`<type>.<arch>`).
    pub name: String,
    /// Cloud instance type this template launches with.
    pub nova_id: String,
    pub hypervisor_name: String,
    pub cpus: u32,
    pub arch: Arch,
    /// Memory in MB.
    pub memory: u64,
}

impl HardwareTemplate {
    /// Build a template for one architecture of a cloud instance type.
    pub fn for_instance_type(nova_id: &str, memory: u64, cpus: u32, arch: Arch) -> Self {
        Self {
            ecp_uuid: super::generate_id(),
            name: format!("{}.{}", nova_id, arch),
            nova_id: nova_id.to_string(),
            hypervisor_name: DEFAULT_HYPERVISOR.to_string(),
            cpus,
            arch,
            memory,
        }
    }
}
