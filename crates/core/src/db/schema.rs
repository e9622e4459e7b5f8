//! Database schema definitions and migration runner.
//!
//! Migrations are simple SQL strings applied in order. The `user_version`
//! pragma tracks which migrations have already been applied.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::errors::StoreError;

/// All migrations, in order. Each entry is `(version, description, sql)`.
static MIGRATIONS: &[(u32, &str, &str)] = &[
    (
        1,
        "branches and versions",
        r#"
        CREATE TABLE IF NOT EXISTS branches (
            id                  TEXT PRIMARY KEY,
            diagram_id          TEXT NOT NULL,
            name                TEXT NOT NULL,
            parent_branch_id    TEXT,
            parent_version_id   TEXT,
            head_version_id     TEXT,
            is_default          INTEGER NOT NULL DEFAULT 0,
            created_at          TEXT NOT NULL,
            created_by          TEXT NOT NULL DEFAULT '',
            UNIQUE (diagram_id, name)
        );

        CREATE INDEX IF NOT EXISTS idx_branches_diagram ON branches (diagram_id);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_branches_one_default
            ON branches (diagram_id) WHERE is_default = 1;

        CREATE TABLE IF NOT EXISTS versions (
            seq                 INTEGER PRIMARY KEY AUTOINCREMENT,
            id                  TEXT NOT NULL UNIQUE,
            branch_id           TEXT NOT NULL,
            parent_version_id   TEXT,
            snapshot            TEXT NOT NULL,
            message             TEXT,
            created_at          TEXT NOT NULL,
            created_by          TEXT NOT NULL DEFAULT ''
        );

        CREATE INDEX IF NOT EXISTS idx_versions_branch ON versions (branch_id, seq);
        "#,
    ),
];

/// Run all pending migrations against `conn`.
pub fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
    let current_version = get_schema_version(conn)?;
    info!(
        current_version,
        target_version = MIGRATIONS.last().map(|m| m.0).unwrap_or(0),
        "checking database migrations"
    );

    for &(version, description, sql) in MIGRATIONS {
        if version > current_version {
            info!(version, description, "applying migration");
            conn.execute_batch(sql)
                .map_err(|e| StoreError::MigrationFailed {
                    version,
                    detail: e.to_string(),
                })?;
            set_schema_version(conn, version)?;
            debug!(version, "migration applied successfully");
        }
    }

    Ok(())
}

fn get_schema_version(conn: &Connection) -> Result<u32, StoreError> {
    let version: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

fn set_schema_version(conn: &Connection, version: u32) -> Result<(), StoreError> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_run_idempotently() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), 1);
    }

    #[test]
    fn test_tables_created() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let tables: Vec<String> = {
            let mut stmt = conn
                .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
                .unwrap();
            stmt.query_map([], |row| row.get(0))
                .unwrap()
                .filter_map(|r| r.ok())
                .collect()
        };

        assert!(tables.contains(&"branches".to_string()));
        assert!(tables.contains(&"versions".to_string()));
    }

    #[test]
    fn test_only_one_default_branch_per_diagram() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let insert = "INSERT INTO branches (id, diagram_id, name, is_default, created_at)
                      VALUES (?1, 'd1', ?2, 1, '2025-01-01T00:00:00Z')";
        conn.execute(insert, rusqlite::params!["b1", "main"]).unwrap();
        assert!(conn.execute(insert, rusqlite::params!["b2", "other"]).is_err());
    }
}
