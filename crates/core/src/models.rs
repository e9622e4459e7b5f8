//! Branch and version records.
//!
//! These types bridge the branching service, the stores, and the CLI.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::snapshot::Snapshot;

// ---------------------------------------------------------------------------
// Version
// ---------------------------------------------------------------------------

/// An immutable commit: one snapshot plus a link to its parent version.
///
/// The parent may belong to another branch when this version sits right
/// after a fork point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Version {
    pub id: String,
    pub branch_id: String,
    pub parent_version_id: Option<String>,
    pub snapshot: Snapshot,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
}

impl Version {
    /// Create a new version record with a fresh UUID.
    pub fn new(
        branch_id: impl Into<String>,
        parent_version_id: Option<String>,
        snapshot: Snapshot,
        message: Option<String>,
        created_by: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            branch_id: branch_id.into(),
            parent_version_id,
            snapshot,
            message,
            created_at: Utc::now(),
            created_by: created_by.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Branch
// ---------------------------------------------------------------------------

/// A named line of snapshot history with a movable head pointer.
///
/// Only `name` (by rename) and `head_version_id` (by commit) ever change.
/// When set, the head always references a version committed on this branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Branch {
    pub id: String,
    pub diagram_id: String,
    pub name: String,
    pub parent_branch_id: Option<String>,
    pub parent_version_id: Option<String>,
    pub head_version_id: Option<String>,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
}

impl Branch {
    /// Create a new branch record with a fresh UUID and no head.
    pub fn new(
        diagram_id: impl Into<String>,
        name: impl Into<String>,
        created_by: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            diagram_id: diagram_id.into(),
            name: name.into(),
            parent_branch_id: None,
            parent_version_id: None,
            head_version_id: None,
            is_default: false,
            created_at: Utc::now(),
            created_by: created_by.into(),
        }
    }

    /// The version a new commit on this branch should use as its parent:
    /// the head, or the fork point for a branch that has no commits yet.
    pub fn commit_parent(&self) -> Option<&str> {
        self.head_version_id
            .as_deref()
            .or(self.parent_version_id.as_deref())
    }
}

/// Where a new branch forks from. Both fields empty means an empty branch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BranchSource {
    /// Fork from this branch (at its head unless `from_version_id` is set).
    pub from_branch_id: Option<String>,
    /// Fork from this exact version.
    pub from_version_id: Option<String>,
}

impl BranchSource {
    pub fn from_branch(branch_id: impl Into<String>) -> Self {
        Self {
            from_branch_id: Some(branch_id.into()),
            from_version_id: None,
        }
    }

    pub fn from_version(version_id: impl Into<String>) -> Self {
        Self {
            from_branch_id: None,
            from_version_id: Some(version_id.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.from_branch_id.is_none() && self.from_version_id.is_none()
    }
}
