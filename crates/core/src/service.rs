//! Branching service.
//!
//! [`BranchingService`] is the public face of the library: it combines a
//! [`DiagramStore`] with the diff, ancestor and merge engines and enforces
//! the branch invariants (one default branch per diagram, unique names,
//! heads that only move forward through optimistic commits).

use tracing::{debug, info, warn};

use crate::ancestor::find_common_ancestor;
use crate::config::AppConfig;
use crate::diff::{diff, SnapshotDiff};
use crate::errors::{BranchError, StoreError};
use crate::merge::{ConflictResolver, MergeConflict, MergeResult, Merger};
use crate::models::{Branch, BranchSource, Version};
use crate::snapshot::Snapshot;
use crate::store::DiagramStore;

/// Branch, version and merge operations over a [`DiagramStore`].
pub struct BranchingService<S: DiagramStore> {
    store: S,
    author: String,
    default_branch_name: String,
}

impl<S: DiagramStore> BranchingService<S> {
    /// Create a service that records `author` as the creator of everything
    /// it writes.
    pub fn new(store: S, author: impl Into<String>) -> Self {
        Self {
            store,
            author: author.into(),
            default_branch_name: "main".into(),
        }
    }

    /// Create a service using the author and default branch name from `config`.
    pub fn from_config(store: S, config: &AppConfig) -> Self {
        Self::new(store, config.general.author.clone())
            .with_default_branch_name(config.general.default_branch_name.clone())
    }

    pub fn with_default_branch_name(mut self, name: impl Into<String>) -> Self {
        self.default_branch_name = name.into();
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    // -----------------------------------------------------------------------
    // Branches
    // -----------------------------------------------------------------------

    /// Create the default branch of a diagram with `snapshot` as its first
    /// version. A clash with an existing branch name is reported as
    /// [`BranchError::NameTaken`].
    pub fn initialize_branching(
        &self,
        diagram_id: &str,
        snapshot: Snapshot,
    ) -> Result<(Branch, Version), BranchError> {
        if self.store.default_branch(diagram_id)?.is_some() {
            return Err(BranchError::AlreadyInitialized(diagram_id.to_string()));
        }

        let mut branch = Branch::new(diagram_id, self.default_branch_name.as_str(), &self.author);
        branch.is_default = true;
        let version = Version::new(
            &branch.id,
            None,
            snapshot,
            Some("Initial version".into()),
            &self.author,
        );

        self.store
            .insert_branch_with_version(&branch, &version)
            .map_err(insert_error)?;
        branch.head_version_id = Some(version.id.clone());

        info!(
            diagram_id,
            branch_id = %branch.id,
            version_id = %version.id,
            "initialized branching"
        );
        Ok((branch, version))
    }

    /// Create a branch, optionally forked from an existing branch or version.
    ///
    /// A forked branch gets a first version on itself that copies the fork
    /// snapshot, with the fork point as its parent. The new branch is never
    /// the default one, even on a diagram that has not been initialized yet.
    pub fn create_branch(
        &self,
        diagram_id: &str,
        name: &str,
        source: BranchSource,
    ) -> Result<Branch, BranchError> {
        let name = validate_name(name)?;
        self.check_name_available(diagram_id, name, None)?;

        let mut branch = Branch::new(diagram_id, name, &self.author);

        let fork_version = match (&source.from_branch_id, &source.from_version_id) {
            (_, Some(version_id)) => Some(self.get_version(version_id)?),
            (Some(branch_id), None) => {
                let from = self.get_branch(branch_id)?;
                match from.commit_parent() {
                    Some(id) => Some(self.get_version(id)?),
                    None => None,
                }
            }
            (None, None) => None,
        };

        if let Some(ref branch_id) = source.from_branch_id {
            // Validates existence when only a version was used for the fork.
            self.get_branch(branch_id)?;
            branch.parent_branch_id = Some(branch_id.clone());
        }

        let Some(fork) = fork_version else {
            self.store.insert_branch(&branch).map_err(insert_error)?;
            info!(diagram_id, branch_id = %branch.id, name, "created empty branch");
            return Ok(branch);
        };

        if branch.parent_branch_id.is_none() {
            branch.parent_branch_id = Some(fork.branch_id.clone());
        }
        branch.parent_version_id = Some(fork.id.clone());

        let first = Version::new(
            &branch.id,
            Some(fork.id.clone()),
            fork.snapshot,
            Some(format!("Branch {name} created")),
            &self.author,
        );
        self.store
            .insert_branch_with_version(&branch, &first)
            .map_err(insert_error)?;
        branch.head_version_id = Some(first.id.clone());

        info!(
            diagram_id,
            branch_id = %branch.id,
            name,
            fork_version_id = %fork.id,
            "created branch"
        );
        Ok(branch)
    }

    pub fn get_branch(&self, branch_id: &str) -> Result<Branch, BranchError> {
        self.store
            .get_branch(branch_id)?
            .ok_or_else(|| BranchError::BranchNotFound(branch_id.to_string()))
    }

    /// All branches of a diagram, oldest first.
    pub fn list_branches(&self, diagram_id: &str) -> Result<Vec<Branch>, BranchError> {
        Ok(self.store.list_branches(diagram_id)?)
    }

    pub fn default_branch(&self, diagram_id: &str) -> Result<Option<Branch>, BranchError> {
        Ok(self.store.default_branch(diagram_id)?)
    }

    /// Look a branch up by id, falling back to its name within `diagram_id`.
    pub fn find_branch(&self, diagram_id: &str, id_or_name: &str) -> Result<Branch, BranchError> {
        if let Some(branch) = self.store.get_branch(id_or_name)? {
            return Ok(branch);
        }
        self.store
            .list_branches(diagram_id)?
            .into_iter()
            .find(|b| b.name == id_or_name)
            .ok_or_else(|| BranchError::BranchNotFound(id_or_name.to_string()))
    }

    /// Rename a branch. Its history is untouched.
    pub fn rename_branch(&self, branch_id: &str, new_name: &str) -> Result<Branch, BranchError> {
        let new_name = validate_name(new_name)?;
        let mut branch = self.get_branch(branch_id)?;
        if branch.name == new_name {
            return Ok(branch);
        }
        self.check_name_available(&branch.diagram_id, new_name, Some(branch_id))?;

        self.store
            .rename_branch(branch_id, new_name)
            .map_err(insert_error)?;
        info!(branch_id, old = %branch.name, new = new_name, "renamed branch");
        branch.name = new_name.to_string();
        Ok(branch)
    }

    /// Delete a branch record. Its versions stay in the store.
    pub fn delete_branch(&self, branch_id: &str) -> Result<(), BranchError> {
        let branch = self.get_branch(branch_id)?;
        if branch.is_default {
            warn!(branch_id, "refusing to delete default branch");
            return Err(BranchError::CannotDeleteDefault(branch_id.to_string()));
        }
        self.store.delete_branch(branch_id)?;
        info!(branch_id, name = %branch.name, "deleted branch");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Versions
    // -----------------------------------------------------------------------

    /// Commit `snapshot` on top of the branch's current head.
    pub fn create_version(
        &self,
        branch_id: &str,
        snapshot: Snapshot,
        message: Option<String>,
    ) -> Result<Version, BranchError> {
        let branch = self.get_branch(branch_id)?;
        self.commit_on(&branch, branch.head_version_id.as_deref(), snapshot, message)
    }

    /// Commit `snapshot` only if the branch head is still `expected_head`.
    ///
    /// Use this when the snapshot was derived from a head read earlier; a
    /// head that moved in between yields
    /// [`BranchError::ConcurrentModification`].
    pub fn create_version_at(
        &self,
        branch_id: &str,
        expected_head: Option<&str>,
        snapshot: Snapshot,
        message: Option<String>,
    ) -> Result<Version, BranchError> {
        let branch = self.get_branch(branch_id)?;
        self.commit_on(&branch, expected_head, snapshot, message)
    }

    pub fn get_version(&self, version_id: &str) -> Result<Version, BranchError> {
        self.store
            .get_version(version_id)?
            .ok_or_else(|| BranchError::VersionNotFound(version_id.to_string()))
    }

    /// Versions committed on a branch, newest first.
    pub fn get_version_history(
        &self,
        branch_id: &str,
        limit: usize,
    ) -> Result<Vec<Version>, BranchError> {
        self.get_branch(branch_id)?;
        Ok(self.store.list_versions(branch_id, limit)?)
    }

    /// Element-level diff between two versions.
    pub fn diff_versions(
        &self,
        base_version_id: &str,
        new_version_id: &str,
    ) -> Result<SnapshotDiff, BranchError> {
        let base = self.get_version(base_version_id)?;
        let new = self.get_version(new_version_id)?;
        Ok(diff(&base.snapshot, &new.snapshot))
    }

    // -----------------------------------------------------------------------
    // Merging
    // -----------------------------------------------------------------------

    /// Merge the head of `source_branch_id` into the head of
    /// `target_branch_id` without committing anything.
    ///
    /// Uses a three-way merge when a common ancestor is found and a direct
    /// merge otherwise.
    pub fn merge_branches(
        &self,
        source_branch_id: &str,
        target_branch_id: &str,
    ) -> Result<MergeResult, BranchError> {
        let source = self.get_branch(source_branch_id)?;
        let target = self.get_branch(target_branch_id)?;
        info!(
            source = %source.name,
            target = %target.name,
            "merging branches"
        );

        let ours = self.tip_snapshot(&target)?;
        let theirs = self.tip_snapshot(&source)?;

        let base = find_common_ancestor(&self.store, &target, &source)?;
        let mut result = match base {
            Some(ref base) => {
                debug!(base_version_id = %base.id, "using three-way merge");
                Merger::three_way_merge(&base.snapshot, &ours, &theirs)
            }
            None => {
                warn!("no common ancestor, falling back to direct merge");
                Merger::direct_merge(&ours, &theirs)
            }
        };

        result.source_branch_id = Some(source.id.clone());
        result.target_branch_id = Some(target.id.clone());
        result.base_version_id = base.map(|v| v.id);
        result.ours_version_id = target.head_version_id.clone();
        result.theirs_version_id = source.head_version_id.clone();

        info!(
            success = result.success,
            conflicts = result.conflicts.len(),
            strategy = %result.strategy,
            "merge computed"
        );
        Ok(result)
    }

    /// Fold resolved conflicts into a partial merge snapshot.
    pub fn apply_resolutions(&self, partial: &Snapshot, conflicts: &[MergeConflict]) -> Snapshot {
        ConflictResolver::apply_resolutions(partial, conflicts)
    }

    /// Commit the outcome of [`merge_branches`](Self::merge_branches) onto
    /// its target branch.
    ///
    /// `resolved` carries resolutions for the result's conflicts; a conflict
    /// resolved on the result itself counts too. Each resolution is re-applied
    /// to the conflict it names, failing with [`BranchError::InvalidResolution`]
    /// when a custom value is missing or does not match the element id and
    /// type. Fails with [`BranchError::ConflictsPending`] while any conflict
    /// is unresolved,
    /// and with [`BranchError::ConcurrentModification`] if the target head
    /// moved since the merge was computed.
    pub fn commit_merge(
        &self,
        result: &MergeResult,
        resolved: &[MergeConflict],
        message: Option<String>,
    ) -> Result<Version, BranchError> {
        let target_id = result
            .target_branch_id
            .as_deref()
            .ok_or_else(|| BranchError::BranchNotFound("merge result has no target".into()))?;
        let target = self.get_branch(target_id)?;

        let mut effective = Vec::with_capacity(result.conflicts.len());
        let mut pending = 0usize;
        for conflict in &result.conflicts {
            let chosen = resolved
                .iter()
                .find(|r| {
                    r.is_resolved()
                        && r.element_id == conflict.element_id
                        && r.element_type == conflict.element_type
                })
                .or_else(|| conflict.is_resolved().then_some(conflict));
            match chosen {
                Some(c) => effective.push(conflict.adopt_resolution(c)?),
                None => pending += 1,
            }
        }
        if pending > 0 {
            warn!(pending, "merge commit refused, conflicts unresolved");
            return Err(BranchError::ConflictsPending { count: pending });
        }

        let snapshot = ConflictResolver::apply_resolutions(&result.merged, &effective);
        let message = message.or_else(|| {
            let source = result.source_branch_id.as_deref().unwrap_or("unknown");
            Some(format!("Merge {source} into {}", target.name))
        });

        let version = self.commit_on(&target, result.ours_version_id.as_deref(), snapshot, message)?;
        info!(
            target = %target.name,
            version_id = %version.id,
            resolved = effective.len(),
            "merge committed"
        );
        Ok(version)
    }

    /// Push buffered writes to durable storage.
    pub fn flush(&self) -> Result<(), BranchError> {
        Ok(self.store.flush()?)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn commit_on(
        &self,
        branch: &Branch,
        expected_head: Option<&str>,
        snapshot: Snapshot,
        message: Option<String>,
    ) -> Result<Version, BranchError> {
        let parent = expected_head
            .or(branch.parent_version_id.as_deref())
            .map(str::to_string);
        let version = Version::new(&branch.id, parent, snapshot, message, &self.author);

        match self.store.commit_version(&version, expected_head) {
            Ok(()) => {
                info!(
                    branch_id = %branch.id,
                    version_id = %version.id,
                    "created version"
                );
                Ok(version)
            }
            Err(StoreError::HeadMoved {
                branch_id,
                expected,
                actual,
            }) => {
                warn!(%branch_id, "branch head moved during commit");
                Err(BranchError::ConcurrentModification {
                    branch_id,
                    expected: expected.unwrap_or_else(|| "none".into()),
                    actual: actual.unwrap_or_else(|| "none".into()),
                })
            }
            Err(StoreError::NotFound { id, .. }) => Err(BranchError::BranchNotFound(id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Snapshot at the branch tip; empty for a branch with no history.
    fn tip_snapshot(&self, branch: &Branch) -> Result<Snapshot, BranchError> {
        match branch.commit_parent() {
            Some(id) => Ok(self.get_version(id)?.snapshot),
            None => Ok(Snapshot::default()),
        }
    }

    fn check_name_available(
        &self,
        diagram_id: &str,
        name: &str,
        except_branch_id: Option<&str>,
    ) -> Result<(), BranchError> {
        let taken = self
            .store
            .list_branches(diagram_id)?
            .iter()
            .any(|b| b.name == name && Some(b.id.as_str()) != except_branch_id);
        if taken {
            return Err(BranchError::NameTaken {
                diagram_id: diagram_id.to_string(),
                name: name.to_string(),
            });
        }
        Ok(())
    }
}

/// Uniqueness violations caught by the store, for writers that raced past
/// the service-level checks.
fn insert_error(err: StoreError) -> BranchError {
    match err {
        StoreError::DuplicateDefault { diagram_id } => BranchError::AlreadyInitialized(diagram_id),
        StoreError::DuplicateName { diagram_id, name } => {
            BranchError::NameTaken { diagram_id, name }
        }
        StoreError::NotFound { id, .. } => BranchError::BranchNotFound(id),
        other => other.into(),
    }
}

fn validate_name(name: &str) -> Result<&str, BranchError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(BranchError::InvalidName(name.to_string()));
    }
    Ok(trimmed)
}
