//! Package persistence and the per-package build claim.
//!
//! A build is claimed by inserting a `downloading` placeholder row keyed by
//! the package id. The insert is a no-op when any row for that id exists, so
//! exactly one caller wins the claim; everyone else sees the placeholder and
//! waits for it to become `ready`.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};

use spotstack_shared::errors::{SpotstackError, SpotstackResult};

use super::{Database, db_err};
use crate::models::{Package, PackageState};

const COLUMNS: &str = "ecp_uuid, nova_id, name, storage, os, description, updated, state";

#[derive(Clone, Debug)]
pub struct PackageStore {
    db: Database,
}

impl PackageStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn get(&self, id: &str) -> SpotstackResult<Option<Package>> {
        let conn = self.db.conn();
        db_err!(
            conn.query_row(
                &format!("SELECT {} FROM packages WHERE ecp_uuid = ?1", COLUMNS),
                params![id],
                from_row,
            )
            .optional()
        )
    }

    /// Re-read a package, picking up writes made by other runs.
    pub fn refresh(&self, package: &Package) -> SpotstackResult<Package> {
        self.get(&package.ecp_uuid)?.ok_or_else(|| {
            SpotstackError::NotFound(format!("package {} disappeared", package.ecp_uuid))
        })
    }

    pub fn insert(&self, package: &Package) -> SpotstackResult<()> {
        let conn = self.db.conn();
        db_err!(conn.execute(
            &format!(
                "INSERT INTO packages ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                COLUMNS
            ),
            params![
                package.ecp_uuid,
                package.nova_id,
                package.name,
                package.storage,
                package.os,
                package.description,
                package.updated,
                package.state
            ],
        ))?;
        Ok(())
    }

    /// Update descriptive fields. Refreshes the `updated` timestamp.
    pub fn update(&self, package: &Package) -> SpotstackResult<()> {
        let conn = self.db.conn();
        let updated = db_err!(conn.execute(
            "UPDATE packages SET nova_id = ?2, name = ?3, storage = ?4, os = ?5,
                description = ?6, updated = ?7, state = ?8
             WHERE ecp_uuid = ?1",
            params![
                package.ecp_uuid,
                package.nova_id,
                package.name,
                package.storage,
                package.os,
                package.description,
                Utc::now(),
                package.state
            ],
        ))?;
        if updated == 0 {
            return Err(SpotstackError::NotFound(format!("package {}", package.ecp_uuid)));
        }
        Ok(())
    }

    pub fn list(&self) -> SpotstackResult<Vec<Package>> {
        let conn = self.db.conn();
        let mut stmt = db_err!(conn.prepare(&format!(
            "SELECT {} FROM packages ORDER BY updated DESC",
            COLUMNS
        )))?;
        let rows = db_err!(stmt.query_map([], from_row))?;
        db_err!(rows.collect::<Result<Vec<_>, _>>())
    }

    /// Claim the build of `id`.
    ///
    /// Returns `true` if this caller inserted the `downloading` placeholder
    /// and must now build the package; `false` if any row already existed.
    pub fn try_claim(&self, id: &str) -> SpotstackResult<bool> {
        let conn = self.db.conn();
        Self::try_claim_with(&conn, id)
    }

    pub(crate) fn try_claim_with(conn: &Connection, id: &str) -> SpotstackResult<bool> {
        let placeholder = Package::placeholder(id);
        let inserted = db_err!(conn.execute(
            &format!(
                "INSERT INTO packages ({}) VALUES (?1, NULL, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(ecp_uuid) DO NOTHING",
                COLUMNS
            ),
            params![
                placeholder.ecp_uuid,
                placeholder.name,
                placeholder.storage,
                placeholder.os,
                placeholder.description,
                placeholder.updated,
                PackageState::Downloading
            ],
        ))?;
        Ok(inserted == 1)
    }

    /// Persist a freshly published package as `ready`.
    ///
    /// Promotes the caller's `downloading` placeholder if there is one,
    /// otherwise inserts the row. Fails if the id is already `ready`.
    pub fn register_ready(&self, id: &str, nova_id: &str) -> SpotstackResult<Package> {
        let package = Package::ready(id, nova_id);
        let conn = self.db.conn();
        let existing = db_err!(
            conn.query_row(
                "SELECT state FROM packages WHERE ecp_uuid = ?1",
                params![id],
                |row| row.get::<_, PackageState>(0),
            )
            .optional()
        )?;
        if let Some(state) = existing
            && !state.can_transition_to(package.state)
        {
            return Err(SpotstackError::InvalidState(format!(
                "package {} is already {}",
                id, state
            )));
        }

        let written = db_err!(conn.execute(
            &format!(
                "INSERT INTO packages ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(ecp_uuid) DO UPDATE SET
                    nova_id = excluded.nova_id,
                    state = excluded.state,
                    updated = excluded.updated
                 WHERE packages.state = ?9",
                COLUMNS
            ),
            params![
                package.ecp_uuid,
                package.nova_id,
                package.name,
                package.storage,
                package.os,
                package.description,
                package.updated,
                package.state,
                PackageState::Downloading
            ],
        ))?;
        if written == 0 {
            return Err(SpotstackError::InvalidState(format!(
                "package {} is already registered",
                id
            )));
        }
        drop(conn);

        self.get(id)?
            .ok_or_else(|| SpotstackError::Internal(format!("package {} not readable after write", id)))
    }

    /// Drop a `downloading` placeholder after a failed build so the package
    /// can be claimed again. Ready rows are left alone.
    pub fn release_claim(&self, id: &str) -> SpotstackResult<bool> {
        let conn = self.db.conn();
        let deleted = db_err!(conn.execute(
            "DELETE FROM packages WHERE ecp_uuid = ?1 AND state = ?2",
            params![id, PackageState::Downloading],
        ))?;
        Ok(deleted == 1)
    }

    /// Drop every `downloading` placeholder last touched before `cutoff`.
    ///
    /// A claim that old belongs to a build that died with its process; no
    /// live poller is still waiting on it.
    pub fn release_stale_claims(&self, cutoff: DateTime<Utc>) -> SpotstackResult<usize> {
        let conn = self.db.conn();
        db_err!(conn.execute(
            "DELETE FROM packages WHERE state = ?1 AND updated < ?2",
            params![PackageState::Downloading, cutoff],
        ))
    }
}

fn from_row(row: &Row<'_>) -> rusqlite::Result<Package> {
    Ok(Package {
        ecp_uuid: row.get(0)?,
        nova_id: row.get(1)?,
        name: row.get(2)?,
        storage: row.get(3)?,
        os: row.get(4)?,
        description: row.get(5)?,
        updated: row.get(6)?,
        state: row.get(7)?,
    })
}
