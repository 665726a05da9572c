// Record Store - durable keyed collection of branch records
//
// One SQLite table, one connection behind a Mutex. Every mutation is a single
// autocommit statement, so it is on disk before the call returns.

use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

use crate::branch::{Branch, BranchFields, BranchId};
use crate::error::StoreError;

// ============================================================================
// REPOSITORY CONTRACT
// ============================================================================

/// CRUD contract the interchange engine and the HTTP layer depend on.
///
/// `update` and `delete` of a missing identity return `StoreError::NotFound`
/// and leave the store untouched.
pub trait BranchRepository: Send + Sync {
    /// All current records, ordered by identity
    fn list(&self) -> Result<Vec<Branch>, StoreError>;

    fn get(&self, id: BranchId) -> Result<Branch, StoreError>;

    /// Persist a new record and return its fresh identity
    fn create(&self, fields: &BranchFields) -> Result<BranchId, StoreError>;

    /// Replace every mutable field of an existing record
    fn update(&self, id: BranchId, fields: &BranchFields) -> Result<(), StoreError>;

    fn delete(&self, id: BranchId) -> Result<(), StoreError>;

    fn count(&self) -> Result<i64, StoreError>;
}

// ============================================================================
// SCHEMA
// ============================================================================

pub fn setup_database(conn: &Connection) -> rusqlite::Result<()> {
    // WAL for crash recovery (a no-op on in-memory databases)
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // AUTOINCREMENT: ids of deleted rows are never handed out again
    conn.execute(
        "CREATE TABLE IF NOT EXISTS branches (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT,
            location TEXT,
            manager TEXT
        )",
        [],
    )?;

    Ok(())
}

// ============================================================================
// SQLITE STORE
// ============================================================================

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database file and make sure the schema exists
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref())?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    pub fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        setup_database(&conn)?;
        Ok(SqliteStore {
            conn: Mutex::new(conn),
        })
    }

    /// A panicking holder never leaves a half-applied statement behind, so a
    /// poisoned lock still guards a usable connection
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn branch_from_row(row: &Row<'_>) -> rusqlite::Result<Branch> {
    Ok(Branch {
        id: row.get(0)?,
        name: row.get(1)?,
        location: row.get(2)?,
        manager: row.get(3)?,
    })
}

impl BranchRepository for SqliteStore {
    fn list(&self) -> Result<Vec<Branch>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT id, name, location, manager FROM branches ORDER BY id")?;

        let branches = stmt
            .query_map([], branch_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(branches)
    }

    fn get(&self, id: BranchId) -> Result<Branch, StoreError> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, name, location, manager FROM branches WHERE id = ?1",
            params![id],
            branch_from_row,
        )
        .optional()?
        .ok_or(StoreError::NotFound(id))
    }

    fn create(&self, fields: &BranchFields) -> Result<BranchId, StoreError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO branches (name, location, manager) VALUES (?1, ?2, ?3)",
            params![fields.name, fields.location, fields.manager],
        )?;

        let id = conn.last_insert_rowid();
        debug!(id, "branch created");
        Ok(id)
    }

    fn update(&self, id: BranchId, fields: &BranchFields) -> Result<(), StoreError> {
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE branches SET name = ?1, location = ?2, manager = ?3 WHERE id = ?4",
            params![fields.name, fields.location, fields.manager, id],
        )?;

        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }
        debug!(id, "branch updated");
        Ok(())
    }

    fn delete(&self, id: BranchId) -> Result<(), StoreError> {
        let conn = self.conn();
        let changed = conn.execute("DELETE FROM branches WHERE id = ?1", params![id])?;

        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }
        debug!(id, "branch deleted");
        Ok(())
    }

    fn count(&self) -> Result<i64, StoreError> {
        let conn = self.conn();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM branches", [], |row| row.get(0))?;
        Ok(count)
    }
}
