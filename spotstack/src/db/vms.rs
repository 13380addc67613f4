//! VM persistence.

use rusqlite::{Connection, OptionalExtension, Row, params};

use spotstack_shared::errors::{SpotstackError, SpotstackResult};

use super::{Database, db_err};
use crate::models::Vm;

const COLUMNS: &str = "ecp_uuid, nova_id, state, ip_address, hardware_uuid, package_uuid";

#[derive(Clone, Debug)]
pub struct VmStore {
    db: Database,
}

impl VmStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn get(&self, id: &str) -> SpotstackResult<Option<Vm>> {
        let conn = self.db.conn();
        db_err!(
            conn.query_row(
                &format!("SELECT {} FROM vms WHERE ecp_uuid = ?1", COLUMNS),
                params![id],
                from_row,
            )
            .optional()
        )
    }

    pub fn insert(&self, vm: &Vm) -> SpotstackResult<()> {
        let conn = self.db.conn();
        Self::insert_with(&conn, vm)
    }

    pub(crate) fn insert_with(conn: &Connection, vm: &Vm) -> SpotstackResult<()> {
        db_err!(conn.execute(
            &format!("INSERT INTO vms ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)", COLUMNS),
            params![
                vm.ecp_uuid,
                vm.nova_id,
                vm.state,
                vm.ip_address,
                vm.hardware_uuid,
                vm.package_uuid
            ],
        ))?;
        Ok(())
    }

    pub fn update(&self, vm: &Vm) -> SpotstackResult<()> {
        let conn = self.db.conn();
        let updated = db_err!(conn.execute(
            "UPDATE vms SET nova_id = ?2, state = ?3, ip_address = ?4,
                hardware_uuid = ?5, package_uuid = ?6
             WHERE ecp_uuid = ?1",
            params![
                vm.ecp_uuid,
                vm.nova_id,
                vm.state,
                vm.ip_address,
                vm.hardware_uuid,
                vm.package_uuid
            ],
        ))?;
        if updated == 0 {
            return Err(SpotstackError::NotFound(format!("vm {}", vm.ecp_uuid)));
        }
        Ok(())
    }

    /// Delete a VM row. Returns whether a row existed.
    pub fn delete(&self, id: &str) -> SpotstackResult<bool> {
        let conn = self.db.conn();
        Self::delete_with(&conn, id)
    }

    pub(crate) fn delete_with(conn: &Connection, id: &str) -> SpotstackResult<bool> {
        let deleted = db_err!(conn.execute("DELETE FROM vms WHERE ecp_uuid = ?1", params![id]))?;
        Ok(deleted == 1)
    }

    pub fn list(&self) -> SpotstackResult<Vec<Vm>> {
        let conn = self.db.conn();
        let mut stmt = db_err!(conn.prepare(&format!(
            "SELECT {} FROM vms ORDER BY ecp_uuid",
            COLUMNS
        )))?;
        let rows = db_err!(stmt.query_map([], from_row))?;
        db_err!(rows.collect::<Result<Vec<_>, _>>())
    }
}

fn from_row(row: &Row<'_>) -> rusqlite::Result<Vm> {
    Ok(Vm {
        ecp_uuid: row.get(0)?,
        nova_id: row.get(1)?,
        state: row.get(2)?,
        ip_address: row.get(3)?,
        hardware_uuid: row.get(4)?,
        package_uuid: row.get(5)?,
    })
}
