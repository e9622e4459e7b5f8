//! Typed branch/version queries and the SQLite [`DiagramStore`] implementation.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use tracing::debug;

use super::Database;
use crate::errors::StoreError;
use crate::models::{Branch, Version};
use crate::snapshot::Snapshot;
use crate::store::DiagramStore;

const BRANCH_COLUMNS: &str = "id, diagram_id, name, parent_branch_id, parent_version_id,
     head_version_id, is_default, created_at, created_by";

const VERSION_COLUMNS: &str =
    "id, branch_id, parent_version_id, snapshot, message, created_at, created_by";

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn branch_from_row(row: &Row<'_>) -> rusqlite::Result<Branch> {
    let created_at: String = row.get(7)?;
    Ok(Branch {
        id: row.get(0)?,
        diagram_id: row.get(1)?,
        name: row.get(2)?,
        parent_branch_id: row.get(3)?,
        parent_version_id: row.get(4)?,
        head_version_id: row.get(5)?,
        is_default: row.get(6)?,
        created_at: parse_datetime(&created_at),
        created_by: row.get(8)?,
    })
}

fn version_from_row(row: &Row<'_>) -> rusqlite::Result<Version> {
    let snapshot_json: String = row.get(3)?;
    let snapshot: Snapshot = serde_json::from_str(&snapshot_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?;
    let created_at: String = row.get(5)?;
    Ok(Version {
        id: row.get(0)?,
        branch_id: row.get(1)?,
        parent_version_id: row.get(2)?,
        snapshot,
        message: row.get(4)?,
        created_at: parse_datetime(&created_at),
        created_by: row.get(6)?,
    })
}

// ---------------------------------------------------------------------------
// Connection-level helpers (usable inside transactions)
// ---------------------------------------------------------------------------

/// Fixed-width RFC 3339 so that text ordering is chronological.
fn timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Same uniqueness checks as `MemoryStore`, run inside the write transaction.
fn check_branch_unique(
    conn: &Connection,
    own_id: &str,
    diagram_id: &str,
    name: &str,
    is_default: bool,
) -> Result<(), StoreError> {
    if is_default {
        let taken = conn
            .query_row(
                "SELECT 1 FROM branches WHERE diagram_id = ?1 AND is_default = 1 AND id != ?2",
                params![diagram_id, own_id],
                |_| Ok(()),
            )
            .optional()?;
        if taken.is_some() {
            return Err(StoreError::DuplicateDefault {
                diagram_id: diagram_id.to_string(),
            });
        }
    }
    let taken = conn
        .query_row(
            "SELECT 1 FROM branches WHERE diagram_id = ?1 AND name = ?2 AND id != ?3",
            params![diagram_id, name, own_id],
            |_| Ok(()),
        )
        .optional()?;
    if taken.is_some() {
        return Err(StoreError::DuplicateName {
            diagram_id: diagram_id.to_string(),
            name: name.to_string(),
        });
    }
    Ok(())
}

/// Map a UNIQUE violation on `branches` (another process won the race)
/// onto the matching store error.
fn branch_constraint_error(err: rusqlite::Error, diagram_id: &str, name: &str) -> StoreError {
    if let rusqlite::Error::SqliteFailure(ref failure, Some(ref msg)) = err {
        if failure.code == ErrorCode::ConstraintViolation {
            if msg.contains("branches.name") {
                return StoreError::DuplicateName {
                    diagram_id: diagram_id.to_string(),
                    name: name.to_string(),
                };
            }
            if msg.contains("branches.diagram_id") {
                return StoreError::DuplicateDefault {
                    diagram_id: diagram_id.to_string(),
                };
            }
        }
    }
    StoreError::Sqlite(err)
}

fn insert_branch_row(conn: &Connection, branch: &Branch) -> Result<(), StoreError> {
    check_branch_unique(conn, &branch.id, &branch.diagram_id, &branch.name, branch.is_default)?;
    conn.execute(
        "INSERT INTO branches (id, diagram_id, name, parent_branch_id, parent_version_id,
         head_version_id, is_default, created_at, created_by)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            branch.id,
            branch.diagram_id,
            branch.name,
            branch.parent_branch_id,
            branch.parent_version_id,
            branch.head_version_id,
            branch.is_default,
            timestamp(&branch.created_at),
            branch.created_by,
        ],
    )
    .map_err(|e| branch_constraint_error(e, &branch.diagram_id, &branch.name))?;
    Ok(())
}

fn insert_version_row(conn: &Connection, version: &Version) -> Result<(), StoreError> {
    let snapshot_json = serde_json::to_string(&version.snapshot)?;
    conn.execute(
        "INSERT INTO versions (id, branch_id, parent_version_id, snapshot, message,
         created_at, created_by)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            version.id,
            version.branch_id,
            version.parent_version_id,
            snapshot_json,
            version.message,
            timestamp(&version.created_at),
            version.created_by,
        ],
    )?;
    Ok(())
}

/// Current head of a branch; outer `None` when the branch does not exist.
fn read_head(conn: &Connection, branch_id: &str) -> Result<Option<Option<String>>, StoreError> {
    let head = conn
        .query_row(
            "SELECT head_version_id FROM branches WHERE id = ?1",
            params![branch_id],
            |row| row.get::<_, Option<String>>(0),
        )
        .optional()?;
    Ok(head)
}

// ---------------------------------------------------------------------------
// DiagramStore implementation
// ---------------------------------------------------------------------------

impl DiagramStore for Database {
    fn insert_branch_with_version(
        &self,
        branch: &Branch,
        version: &Version,
    ) -> Result<(), StoreError> {
        self.transaction(|conn| {
            let mut branch = branch.clone();
            branch.head_version_id = Some(version.id.clone());
            insert_branch_row(conn, &branch)?;
            insert_version_row(conn, version)?;
            Ok(())
        })?;
        debug!(branch_id = %branch.id, version_id = %version.id, "inserted branch with first version");
        Ok(())
    }

    fn insert_branch(&self, branch: &Branch) -> Result<(), StoreError> {
        self.transaction(|conn| insert_branch_row(conn, branch))?;
        debug!(branch_id = %branch.id, name = %branch.name, "inserted branch");
        Ok(())
    }

    fn get_branch(&self, id: &str) -> Result<Option<Branch>, StoreError> {
        let conn = self.conn();
        let branch = conn
            .query_row(
                &format!("SELECT {BRANCH_COLUMNS} FROM branches WHERE id = ?1"),
                params![id],
                branch_from_row,
            )
            .optional()?;
        Ok(branch)
    }

    fn list_branches(&self, diagram_id: &str) -> Result<Vec<Branch>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {BRANCH_COLUMNS} FROM branches WHERE diagram_id = ?1
             ORDER BY created_at, name"
        ))?;
        let branches = stmt
            .query_map(params![diagram_id], branch_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(branches)
    }

    fn default_branch(&self, diagram_id: &str) -> Result<Option<Branch>, StoreError> {
        let conn = self.conn();
        let branch = conn
            .query_row(
                &format!(
                    "SELECT {BRANCH_COLUMNS} FROM branches WHERE diagram_id = ?1 AND is_default = 1"
                ),
                params![diagram_id],
                branch_from_row,
            )
            .optional()?;
        Ok(branch)
    }

    fn rename_branch(&self, id: &str, name: &str) -> Result<(), StoreError> {
        self.transaction(|conn| {
            let diagram_id: String = conn
                .query_row(
                    "SELECT diagram_id FROM branches WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or_else(|| StoreError::not_found("branch", id))?;
            check_branch_unique(conn, id, &diagram_id, name, false)?;
            conn.execute(
                "UPDATE branches SET name = ?1 WHERE id = ?2",
                params![name, id],
            )
            .map_err(|e| branch_constraint_error(e, &diagram_id, name))?;
            Ok(())
        })?;
        debug!(id, name, "renamed branch");
        Ok(())
    }

    fn delete_branch(&self, id: &str) -> Result<(), StoreError> {
        let conn = self.conn();
        let changed = conn.execute("DELETE FROM branches WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(StoreError::not_found("branch", id));
        }
        debug!(id, "deleted branch");
        Ok(())
    }

    fn get_version(&self, id: &str) -> Result<Option<Version>, StoreError> {
        let conn = self.conn();
        let version = conn
            .query_row(
                &format!("SELECT {VERSION_COLUMNS} FROM versions WHERE id = ?1"),
                params![id],
                version_from_row,
            )
            .optional()?;
        Ok(version)
    }

    fn list_versions(&self, branch_id: &str, limit: usize) -> Result<Vec<Version>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {VERSION_COLUMNS} FROM versions WHERE branch_id = ?1
             ORDER BY seq DESC LIMIT ?2"
        ))?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let versions = stmt
            .query_map(params![branch_id, limit], version_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(versions)
    }

    fn commit_version(
        &self,
        version: &Version,
        expected_head: Option<&str>,
    ) -> Result<(), StoreError> {
        self.transaction(|conn| {
            let changed = conn.execute(
                "UPDATE branches SET head_version_id = ?1
                 WHERE id = ?2 AND head_version_id IS ?3",
                params![version.id, version.branch_id, expected_head],
            )?;
            if changed == 0 {
                return match read_head(conn, &version.branch_id)? {
                    None => Err(StoreError::not_found("branch", &version.branch_id)),
                    Some(actual) => Err(StoreError::HeadMoved {
                        branch_id: version.branch_id.clone(),
                        expected: expected_head.map(str::to_string),
                        actual,
                    }),
                };
            }
            insert_version_row(conn, version)
        })?;
        debug!(
            version_id = %version.id,
            branch_id = %version.branch_id,
            parent = ?version.parent_version_id,
            "committed version"
        );
        Ok(())
    }

    fn flush(&self) -> Result<(), StoreError> {
        let conn = self.conn();
        conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        debug!("flushed database");
        Ok(())
    }
}

/// Parse a datetime string, returning Utc::now() as a fallback if parsing fails.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
