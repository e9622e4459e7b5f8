//! Conflict resolution.
//!
//! The [`ConflictResolver`] folds caller-chosen resolutions back into the
//! partial snapshot returned by a merge.

use tracing::{debug, info, warn};

use crate::errors::ConflictError;
use crate::merge::conflict::{MergeConflict, Resolution};
use crate::snapshot::{DiagramElement, Edge, ElementType, Node, Snapshot};

/// Stateless conflict resolution operations.
pub struct ConflictResolver;

impl ConflictResolver {
    /// Apply resolved conflicts to `partial`.
    ///
    /// A resolved conflict with a value upserts that value by id. A resolved
    /// side pick without a value means that side deleted the element, so it is
    /// removed. Unresolved conflicts, and custom resolutions that lack a
    /// value, are skipped; callers must check
    /// [`unresolved`](Self::unresolved) before committing the result.
    pub fn apply_resolutions(partial: &Snapshot, conflicts: &[MergeConflict]) -> Snapshot {
        let mut snapshot = partial.clone();
        let mut applied = 0usize;

        for conflict in conflicts {
            let Some(resolution) = conflict.resolution else {
                debug!(element_id = %conflict.element_id, "conflict unresolved, skipping");
                continue;
            };
            if resolution == Resolution::Custom && conflict.resolved_value.is_none() {
                warn!(element_id = %conflict.element_id, "custom resolution without a value, skipping");
                continue;
            }
            match &conflict.resolved_value {
                Some(DiagramElement::Node(node)) => snapshot.upsert(node.clone()),
                Some(DiagramElement::Edge(edge)) => snapshot.upsert(edge.clone()),
                None => match conflict.element_type {
                    ElementType::Node => {
                        snapshot.remove::<Node>(&conflict.element_id);
                    }
                    ElementType::Edge => {
                        snapshot.remove::<Edge>(&conflict.element_id);
                    }
                },
            }
            debug!(
                element_id = %conflict.element_id,
                %resolution,
                "applied resolution"
            );
            applied += 1;
        }

        info!(
            applied,
            skipped = conflicts.len() - applied,
            "applied conflict resolutions"
        );
        snapshot
    }

    /// Conflicts that still lack a resolution.
    pub fn unresolved(conflicts: &[MergeConflict]) -> Vec<&MergeConflict> {
        conflicts.iter().filter(|c| !c.is_resolved()).collect()
    }

    /// Resolve every unresolved conflict by taking the same side.
    pub fn resolve_all(
        conflicts: &mut [MergeConflict],
        resolution: Resolution,
    ) -> Result<(), ConflictError> {
        info!(%resolution, count = conflicts.len(), "resolving all conflicts");
        for conflict in conflicts.iter_mut().filter(|c| !c.is_resolved()) {
            conflict.resolve(resolution)?;
        }
        Ok(())
    }
}
