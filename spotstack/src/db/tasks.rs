//! Task persistence.

use rusqlite::{Connection, OptionalExtension, Row, params};

use spotstack_shared::errors::{SpotstackError, SpotstackResult};

use super::{Database, db_err};
use crate::models::Task;

const COLUMNS: &str = "ecp_uuid, vm_uuid, started, ended, completed, is_error, message";

#[derive(Clone, Debug)]
pub struct TaskStore {
    db: Database,
}

impl TaskStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn get(&self, id: &str) -> SpotstackResult<Option<Task>> {
        let conn = self.db.conn();
        Self::get_with(&conn, id)
    }

    pub(crate) fn get_with(conn: &Connection, id: &str) -> SpotstackResult<Option<Task>> {
        db_err!(
            conn.query_row(
                &format!("SELECT {} FROM tasks WHERE ecp_uuid = ?1", COLUMNS),
                params![id],
                from_row,
            )
            .optional()
        )
    }

    pub fn insert(&self, task: &Task) -> SpotstackResult<()> {
        let conn = self.db.conn();
        Self::insert_with(&conn, task)
    }

    pub(crate) fn insert_with(conn: &Connection, task: &Task) -> SpotstackResult<()> {
        db_err!(conn.execute(
            &format!(
                "INSERT INTO tasks ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                COLUMNS
            ),
            params![
                task.ecp_uuid,
                task.vm_uuid,
                task.started,
                task.ended,
                task.completed,
                task.is_error,
                task.message
            ],
        ))?;
        Ok(())
    }

    pub fn update(&self, task: &Task) -> SpotstackResult<()> {
        let conn = self.db.conn();
        Self::update_with(&conn, task)
    }

    pub(crate) fn update_with(conn: &Connection, task: &Task) -> SpotstackResult<()> {
        let updated = db_err!(conn.execute(
            "UPDATE tasks SET vm_uuid = ?2, started = ?3, ended = ?4, completed = ?5,
                is_error = ?6, message = ?7
             WHERE ecp_uuid = ?1",
            params![
                task.ecp_uuid,
                task.vm_uuid,
                task.started,
                task.ended,
                task.completed,
                task.is_error,
                task.message
            ],
        ))?;
        if updated == 0 {
            return Err(SpotstackError::NotFound(format!("task {}", task.ecp_uuid)));
        }
        Ok(())
    }

    pub fn list(&self) -> SpotstackResult<Vec<Task>> {
        let conn = self.db.conn();
        let mut stmt = db_err!(conn.prepare(&format!(
            "SELECT {} FROM tasks ORDER BY started DESC",
            COLUMNS
        )))?;
        let rows = db_err!(stmt.query_map([], from_row))?;
        db_err!(rows.collect::<Result<Vec<_>, _>>())
    }
}

fn from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        ecp_uuid: row.get(0)?,
        vm_uuid: row.get(1)?,
        started: row.get(2)?,
        ended: row.get(3)?,
        completed: row.get(4)?,
        is_error: row.get(5)?,
        message: row.get(6)?,
    })
}
