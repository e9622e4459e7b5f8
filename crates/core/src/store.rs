//! Storage contract for branches and versions.
//!
//! The branching logic only needs a durable keyed store that can insert a
//! record, fetch it by id, query by a secondary key (branch → diagram,
//! version → branch) and update a branch head conditioned on its previous
//! value. [`DiagramStore`] captures exactly that. Two backends exist: the
//! SQLite [`Database`](crate::db::Database) and the in-process
//! [`MemoryStore`].

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use tracing::debug;

use crate::errors::StoreError;
use crate::models::{Branch, Version};

/// Persistence operations required by the branching service.
pub trait DiagramStore: Send + Sync {
    /// Atomically insert `branch`, insert `version` on it, and point the
    /// branch head at that version.
    fn insert_branch_with_version(&self, branch: &Branch, version: &Version)
        -> Result<(), StoreError>;

    /// Insert a branch record as-is.
    ///
    /// Both insert operations enforce one default branch per diagram
    /// ([`StoreError::DuplicateDefault`]) and unique names within a diagram
    /// ([`StoreError::DuplicateName`]).
    fn insert_branch(&self, branch: &Branch) -> Result<(), StoreError>;

    fn get_branch(&self, id: &str) -> Result<Option<Branch>, StoreError>;

    /// All branches of a diagram, oldest first.
    fn list_branches(&self, diagram_id: &str) -> Result<Vec<Branch>, StoreError>;

    /// The branch flagged `is_default` for a diagram, if any.
    fn default_branch(&self, diagram_id: &str) -> Result<Option<Branch>, StoreError> {
        Ok(self
            .list_branches(diagram_id)?
            .into_iter()
            .find(|b| b.is_default))
    }

    /// Change a branch name. Fails with `NotFound` if the branch is absent
    /// and with `DuplicateName` if a sibling already uses the name.
    fn rename_branch(&self, id: &str, name: &str) -> Result<(), StoreError>;

    /// Remove a branch record. Its versions are kept.
    fn delete_branch(&self, id: &str) -> Result<(), StoreError>;

    fn get_version(&self, id: &str) -> Result<Option<Version>, StoreError>;

    /// Versions committed on `branch_id`, newest first.
    fn list_versions(&self, branch_id: &str, limit: usize) -> Result<Vec<Version>, StoreError>;

    /// Insert `version` and advance its branch head to it, but only if the
    /// head still equals `expected_head`. On mismatch nothing is written and
    /// [`StoreError::HeadMoved`] is returned.
    fn commit_version(&self, version: &Version, expected_head: Option<&str>)
        -> Result<(), StoreError>;

    /// Push any buffered writes to durable storage.
    fn flush(&self) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryInner {
    branches: HashMap<String, Branch>,
    /// Versions keyed by id, with their insertion sequence number.
    versions: HashMap<String, (u64, Version)>,
    next_seq: u64,
}

impl MemoryInner {
    /// Checks `name` (and the default flag) against the other branches of
    /// `diagram_id`, ignoring the branch with id `own_id`.
    fn check_unique(
        &self,
        own_id: &str,
        diagram_id: &str,
        name: &str,
        is_default: bool,
    ) -> Result<(), StoreError> {
        let siblings = self
            .branches
            .values()
            .filter(|b| b.diagram_id == diagram_id && b.id != own_id);
        for other in siblings {
            if is_default && other.is_default {
                return Err(StoreError::DuplicateDefault {
                    diagram_id: diagram_id.to_string(),
                });
            }
            if other.name == name {
                return Err(StoreError::DuplicateName {
                    diagram_id: diagram_id.to_string(),
                    name: name.to_string(),
                });
            }
        }
        Ok(())
    }

    fn push_version(&mut self, version: &Version) {
        self.next_seq += 1;
        self.versions
            .insert(version.id.clone(), (self.next_seq, version.clone()));
    }
}

/// Non-durable [`DiagramStore`] backed by hash maps behind a mutex.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("memory store mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

impl DiagramStore for MemoryStore {
    fn insert_branch_with_version(
        &self,
        branch: &Branch,
        version: &Version,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.check_unique(&branch.id, &branch.diagram_id, &branch.name, branch.is_default)?;
        let mut branch = branch.clone();
        branch.head_version_id = Some(version.id.clone());
        inner.push_version(version);
        inner.branches.insert(branch.id.clone(), branch);
        Ok(())
    }

    fn insert_branch(&self, branch: &Branch) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.check_unique(&branch.id, &branch.diagram_id, &branch.name, branch.is_default)?;
        inner.branches.insert(branch.id.clone(), branch.clone());
        Ok(())
    }

    fn get_branch(&self, id: &str) -> Result<Option<Branch>, StoreError> {
        Ok(self.lock().branches.get(id).cloned())
    }

    fn list_branches(&self, diagram_id: &str) -> Result<Vec<Branch>, StoreError> {
        let mut branches: Vec<Branch> = self
            .lock()
            .branches
            .values()
            .filter(|b| b.diagram_id == diagram_id)
            .cloned()
            .collect();
        branches.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.name.cmp(&b.name)));
        Ok(branches)
    }

    fn rename_branch(&self, id: &str, name: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let diagram_id = inner
            .branches
            .get(id)
            .map(|b| b.diagram_id.clone())
            .ok_or_else(|| StoreError::not_found("branch", id))?;
        inner.check_unique(id, &diagram_id, name, false)?;
        if let Some(branch) = inner.branches.get_mut(id) {
            branch.name = name.to_string();
        }
        Ok(())
    }

    fn delete_branch(&self, id: &str) -> Result<(), StoreError> {
        self.lock()
            .branches
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found("branch", id))
    }

    fn get_version(&self, id: &str) -> Result<Option<Version>, StoreError> {
        Ok(self.lock().versions.get(id).map(|(_, v)| v.clone()))
    }

    fn list_versions(&self, branch_id: &str, limit: usize) -> Result<Vec<Version>, StoreError> {
        let inner = self.lock();
        let mut versions: Vec<&(u64, Version)> = inner
            .versions
            .values()
            .filter(|(_, v)| v.branch_id == branch_id)
            .collect();
        versions.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(versions
            .into_iter()
            .take(limit)
            .map(|(_, v)| v.clone())
            .collect())
    }

    fn commit_version(
        &self,
        version: &Version,
        expected_head: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let branch = inner
            .branches
            .get_mut(&version.branch_id)
            .ok_or_else(|| StoreError::not_found("branch", &version.branch_id))?;

        if branch.head_version_id.as_deref() != expected_head {
            return Err(StoreError::HeadMoved {
                branch_id: branch.id.clone(),
                expected: expected_head.map(str::to_string),
                actual: branch.head_version_id.clone(),
            });
        }

        branch.head_version_id = Some(version.id.clone());
        inner.push_version(version);
        debug!(version_id = %version.id, branch_id = %version.branch_id, "committed version");
        Ok(())
    }

    fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
