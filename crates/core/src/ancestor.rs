//! Merge-base discovery.
//!
//! Each branch's ancestry is walked back through `parent_version_id` from its
//! head, up to [`MAX_ANCESTOR_DEPTH`] versions. The walk keeps a seen-set so
//! it terminates even if a parent chain is cyclic. The first version of
//! branch A's ancestry that also appears in branch B's ancestry is the merge
//! base. Finding none within the bound is not fatal: callers fall back to a
//! two-way merge.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::errors::{BranchError, StoreError};
use crate::models::{Branch, Version};
use crate::store::DiagramStore;

/// Maximum number of versions examined per branch when looking for a merge base.
pub const MAX_ANCESTOR_DEPTH: usize = 100;

/// Follow parent links from `start`, newest first, returning at most
/// `max_depth` versions. Stops early at a missing version or a cycle.
pub fn walk_ancestry<S: DiagramStore + ?Sized>(
    store: &S,
    start: Option<&str>,
    max_depth: usize,
) -> Result<Vec<Version>, StoreError> {
    let mut chain = Vec::new();
    let mut seen = HashSet::new();
    let mut next = start.map(str::to_string);

    while let Some(id) = next.take() {
        if chain.len() >= max_depth {
            break;
        }
        if !seen.insert(id.clone()) {
            warn!(version_id = %id, "cycle in version parent chain, stopping walk");
            break;
        }
        let Some(version) = store.get_version(&id)? else {
            warn!(version_id = %id, "parent version missing from store, stopping walk");
            break;
        };
        next = version.parent_version_id.clone();
        chain.push(version);
    }

    Ok(chain)
}

/// Find the most recent version shared by the ancestries of two branches.
///
/// Returns [`BranchError::AncestorSearchExhausted`] when no shared version is
/// found within [`MAX_ANCESTOR_DEPTH`] steps on either side.
pub fn find_merge_base<S: DiagramStore + ?Sized>(
    store: &S,
    branch_a: &Branch,
    branch_b: &Branch,
) -> Result<Version, BranchError> {
    let history_a = walk_ancestry(store, branch_a.commit_parent(), MAX_ANCESTOR_DEPTH)?;
    let history_b = walk_ancestry(store, branch_b.commit_parent(), MAX_ANCESTOR_DEPTH)?;
    let ids_b: HashSet<&str> = history_b.iter().map(|v| v.id.as_str()).collect();

    for version in &history_a {
        if ids_b.contains(version.id.as_str()) {
            debug!(version_id = %version.id, "found merge base");
            return Ok(version.clone());
        }
        if let Some(parent_id) = version.parent_version_id.as_deref() {
            if ids_b.contains(parent_id) {
                debug!(version_id = parent_id, "found merge base via parent link");
                return store
                    .get_version(parent_id)?
                    .ok_or_else(|| BranchError::VersionNotFound(parent_id.to_string()));
            }
        }
    }

    Err(BranchError::AncestorSearchExhausted {
        depth: MAX_ANCESTOR_DEPTH,
    })
}

/// Like [`find_merge_base`], but an exhausted search yields `None`.
pub fn find_common_ancestor<S: DiagramStore + ?Sized>(
    store: &S,
    branch_a: &Branch,
    branch_b: &Branch,
) -> Result<Option<Version>, BranchError> {
    match find_merge_base(store, branch_a, branch_b) {
        Ok(version) => Ok(Some(version)),
        Err(BranchError::AncestorSearchExhausted { depth }) => {
            warn!(
                branch_a = %branch_a.id,
                branch_b = %branch_b.id,
                depth,
                "no common ancestor within search depth"
            );
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
