//! SQLite persistence layer for diagramvc.
//!
//! Provides a [`Database`] handle with WAL-mode journaling, automatic schema
//! migrations, and the branch/version queries behind
//! [`DiagramStore`](crate::store::DiagramStore).

pub mod queries;
pub mod schema;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;
use tracing::{debug, info};

use crate::errors::StoreError;

/// SQLite-backed branch and version store.
///
/// File databases run in WAL mode with a busy timeout. Versions reference
/// branches by id only (no foreign keys); deleting a branch leaves its
/// versions in place. The connection sits behind a `Mutex`, so every store
/// call (and every [`transaction`](Self::transaction)) is serialized within
/// the process.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a SQLite database at `path`.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening database");

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;

        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        conn.execute_batch("PRAGMA busy_timeout = 5000;")?;

        debug!("database opened successfully with WAL mode");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (useful for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run all schema migrations to bring the database up to date.
    pub fn initialize(&self) -> Result<(), StoreError> {
        info!("initializing database schema");
        let conn = self.conn();
        schema::run_migrations(&conn)?;
        debug!("database schema is up to date");
        Ok(())
    }

    /// Obtain a lock on the underlying connection.
    ///
    /// If the Mutex is poisoned (a previous holder panicked), the lock is
    /// recovered rather than propagating a panic.
    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("database mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Execute a closure inside a SQLite transaction. If the closure returns
    /// `Ok`, the transaction is committed; otherwise it is rolled back.
    pub fn transaction<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError>,
    {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_database() {
        let db = Database::in_memory().expect("failed to create in-memory db");
        db.initialize().expect("failed to initialize schema");
    }

    #[test]
    fn test_file_database_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("test.db");
        let db = Database::new(&path).expect("failed to create file db");
        db.initialize().expect("failed to initialize schema");
        assert!(path.exists());
    }

    #[test]
    fn test_file_database_uses_wal() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("wal.db")).unwrap();
        let mode: String = db
            .conn()
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode, "wal");
    }

    #[test]
    fn test_versions_outlive_their_branch_row() {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        let conn = db.conn();
        conn.execute(
            "INSERT INTO branches (id, diagram_id, name, created_at)
             VALUES ('b1', 'd1', 'feature', '2025-01-01T00:00:00.000000Z')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO versions (id, branch_id, snapshot, created_at)
             VALUES ('v1', 'b1', '{}', '2025-01-01T00:00:00.000000Z')",
            [],
        )
        .unwrap();
        conn.execute("DELETE FROM branches WHERE id = 'b1'", []).unwrap();

        let left: i64 = conn
            .query_row("SELECT COUNT(*) FROM versions WHERE branch_id = 'b1'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(left, 1);
    }

    #[test]
    fn test_transaction_rollback() {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();

        let result: Result<(), StoreError> = db.transaction(|conn| {
            conn.execute(
                "INSERT INTO branches (id, diagram_id, name, is_default, created_at, created_by)
                 VALUES ('b1', 'd1', 'main', 1, '2025-01-01T00:00:00Z', 'tester')",
                [],
            )?;
            Err(StoreError::not_found("test", "forced"))
        });
        assert!(result.is_err());

        let count: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM branches", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
