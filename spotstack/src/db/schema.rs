//! Table definitions.
//!
//! Tasks reference VMs that only exist after a successful launch, and
//! hardware rows are bulk-replaced by catalog sync, so references between
//! tables are plain columns rather than foreign keys.

pub const SCHEMA_VERSION: i32 = 1;

const SCHEMA_VERSION_TABLE: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    version INTEGER NOT NULL,
    updated_at TEXT NOT NULL
);
";

const HARDWARE_TABLE: &str = "
CREATE TABLE IF NOT EXISTS hardware_templates (
    ecp_uuid TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL UNIQUE,
    nova_id TEXT NOT NULL,
    hypervisor_name TEXT NOT NULL,
    cpus INTEGER NOT NULL,
    arch TEXT NOT NULL,
    memory INTEGER NOT NULL
);
";

const PACKAGES_TABLE: &str = "
CREATE TABLE IF NOT EXISTS packages (
    ecp_uuid TEXT PRIMARY KEY NOT NULL,
    nova_id TEXT UNIQUE,
    name TEXT NOT NULL,
    storage INTEGER NOT NULL DEFAULT 0,
    os TEXT NOT NULL,
    description TEXT NOT NULL,
    updated TEXT NOT NULL,
    state TEXT NOT NULL,
    CHECK (state <> 'ready' OR nova_id IS NOT NULL)
);
";

const VMS_TABLE: &str = "
CREATE TABLE IF NOT EXISTS vms (
    ecp_uuid TEXT PRIMARY KEY NOT NULL,
    nova_id TEXT NOT NULL UNIQUE,
    state TEXT NOT NULL,
    ip_address TEXT NOT NULL,
    hardware_uuid TEXT NOT NULL,
    package_uuid TEXT NOT NULL
);
";

const TASKS_TABLE: &str = "
CREATE TABLE IF NOT EXISTS tasks (
    ecp_uuid TEXT PRIMARY KEY NOT NULL,
    vm_uuid TEXT NOT NULL,
    started TEXT NOT NULL,
    ended TEXT,
    completed INTEGER NOT NULL DEFAULT 0 CHECK (completed BETWEEN 0 AND 100),
    is_error INTEGER NOT NULL DEFAULT 0,
    message TEXT,
    CHECK (is_error = 0 OR completed = 100)
);
CREATE INDEX IF NOT EXISTS idx_tasks_vm_uuid ON tasks(vm_uuid);
";

pub fn all_schemas() -> [&'static str; 5] {
    [
        SCHEMA_VERSION_TABLE,
        HARDWARE_TABLE,
        PACKAGES_TABLE,
        VMS_TABLE,
        TASKS_TABLE,
    ]
}
