//! SQLite entity store.
//!
//! One connection shared behind a mutex, with one store type per entity:
//! - HardwareStore: instance-type catalog (bulk replaced by sync)
//! - PackageStore: package images, including the build claim
//! - TaskStore / VmStore: provisioning outcome records
//!
//! Store methods ending in `_with` take a connection so callers can group
//! writes in [`Database::transaction`].

mod hardware;
mod packages;
mod schema;
mod tasks;
mod vms;

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, MutexGuard};
use rusqlite::{Connection, OptionalExtension, Transaction};

use spotstack_shared::errors::{SpotstackError, SpotstackResult};

pub use hardware::HardwareStore;
pub use packages::PackageStore;
pub use tasks::TaskStore;
pub use vms::VmStore;

/// Helper macro to convert rusqlite errors to SpotstackError.
macro_rules! db_err {
    ($result:expr) => {
        $result.map_err(|e| SpotstackError::Database(e.to_string()))
    };
}

pub(crate) use db_err;

/// SQLite database handle.
///
/// Thread-safe via `parking_lot::Mutex`. Cloning shares the connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create the database.
    pub fn open(db_path: &Path) -> SpotstackResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = db_err!(Connection::open(db_path))?;

        // WAL for concurrent readers polling task/package rows while a
        // provisioning run writes; busy timeout covers long transactions.
        db_err!(conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=FULL;
            PRAGMA foreign_keys=ON;
            PRAGMA busy_timeout=100000;
            "
        ))?;

        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Acquire the database connection.
    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    /// Run `f` inside one transaction, committing only if it succeeds.
    pub fn transaction<T>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> SpotstackResult<T>,
    ) -> SpotstackResult<T> {
        let mut conn = self.conn();
        let tx = db_err!(conn.transaction())?;
        let value = f(&tx)?;
        db_err!(tx.commit())?;
        Ok(value)
    }

    fn init_schema(conn: &Connection) -> SpotstackResult<()> {
        for sql in schema::all_schemas() {
            db_err!(conn.execute_batch(sql))?;
        }

        let current_version: Option<i32> = db_err!(
            conn.query_row(
                "SELECT version FROM schema_version WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()
        )?;

        match current_version {
            None => {
                let now = Utc::now().to_rfc3339();
                db_err!(conn.execute(
                    "INSERT INTO schema_version (id, version, updated_at) VALUES (1, ?1, ?2)",
                    rusqlite::params![schema::SCHEMA_VERSION, now],
                ))?;
                tracing::info!(
                    "Initialized database schema version {}",
                    schema::SCHEMA_VERSION
                );
            }
            Some(v) if v > schema::SCHEMA_VERSION => {
                return Err(SpotstackError::Database(format!(
                    "Database schema version {} is newer than supported {}. Please upgrade spotstack.",
                    v,
                    schema::SCHEMA_VERSION
                )));
            }
            Some(_) => {}
        }

        Ok(())
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish()
    }
}
