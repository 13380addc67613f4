//! Entity records for the provisioning core.
//!
//! Each record carries its `ecp_uuid` identity (assigned by the marketplace
//! or generated here) and, once the cloud knows about it, a `nova_id`.
//! State fields are closed enums persisted as lowercase strings.

mod hardware;
mod package;
mod task;
mod vm;

pub use hardware::{Arch, DEFAULT_HYPERVISOR, HardwareTemplate};
pub use package::{Package, PackageState};
pub use task::{COMPLETED_DONE, Task};
pub use vm::{DEFAULT_IP_ADDRESS, Vm, VmState};

/// Generate a new record identity.
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Implements rusqlite text conversion for a closed enum with
/// `as_str()` and `FromStr`.
macro_rules! sql_text_enum {
    ($ty:ty) => {
        impl rusqlite::ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
                Ok(rusqlite::types::ToSqlOutput::Borrowed(
                    rusqlite::types::ValueRef::Text(self.as_str().as_bytes()),
                ))
            }
        }

        impl rusqlite::types::FromSql for $ty {
            fn column_result(
                value: rusqlite::types::ValueRef<'_>,
            ) -> rusqlite::types::FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e| rusqlite::types::FromSqlError::Other(Box::new(e)))
            }
        }
    };
}

pub(crate) use sql_text_enum;
