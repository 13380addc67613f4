//! Hardware template persistence.

use rusqlite::{Connection, OptionalExtension, Row, params};

use spotstack_shared::errors::{SpotstackError, SpotstackResult};

use super::{Database, db_err};
use crate::models::HardwareTemplate;

const COLUMNS: &str = "ecp_uuid, name, nova_id, hypervisor_name, cpus, arch, memory";

#[derive(Clone, Debug)]
pub struct HardwareStore {
    db: Database,
}

impl HardwareStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn get(&self, id: &str) -> SpotstackResult<Option<HardwareTemplate>> {
        let conn = self.db.conn();
        db_err!(
            conn.query_row(
                &format!("SELECT {} FROM hardware_templates WHERE ecp_uuid = ?1", COLUMNS),
                params![id],
                from_row,
            )
            .optional()
        )
    }

    pub fn insert(&self, hardware: &HardwareTemplate) -> SpotstackResult<()> {
        let conn = self.db.conn();
        Self::insert_with(&conn, hardware)
    }

    pub(crate) fn insert_with(conn: &Connection, hw: &HardwareTemplate) -> SpotstackResult<()> {
        db_err!(conn.execute(
            &format!(
                "INSERT INTO hardware_templates ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                COLUMNS
            ),
            params![
                hw.ecp_uuid,
                hw.name,
                hw.nova_id,
                hw.hypervisor_name,
                hw.cpus,
                hw.arch,
                hw.memory
            ],
        ))?;
        Ok(())
    }

    pub fn delete(&self, id: &str) -> SpotstackResult<()> {
        let conn = self.db.conn();
        let deleted = db_err!(conn.execute(
            "DELETE FROM hardware_templates WHERE ecp_uuid = ?1",
            params![id]
        ))?;
        if deleted == 0 {
            return Err(SpotstackError::NotFound(format!("hardware template {}", id)));
        }
        Ok(())
    }

    /// Remove every template. Returns the number of rows deleted.
    pub fn delete_all(&self) -> SpotstackResult<usize> {
        let conn = self.db.conn();
        db_err!(conn.execute("DELETE FROM hardware_templates", []))
    }

    /// All templates ordered by name.
    pub fn list(&self) -> SpotstackResult<Vec<HardwareTemplate>> {
        let conn = self.db.conn();
        let mut stmt = db_err!(conn.prepare(&format!(
            "SELECT {} FROM hardware_templates ORDER BY name",
            COLUMNS
        )))?;
        let rows = db_err!(stmt.query_map([], from_row))?;
        db_err!(rows.collect::<Result<Vec<_>, _>>())
    }
}

fn from_row(row: &Row<'_>) -> rusqlite::Result<HardwareTemplate> {
    Ok(HardwareTemplate {
        ecp_uuid: row.get(0)?,
        name: row.get(1)?,
        nova_id: row.get(2)?,
        hypervisor_name: row.get(3)?,
        cpus: row.get(4)?,
        arch: row.get(5)?,
        memory: row.get(6)?,
    })
}
