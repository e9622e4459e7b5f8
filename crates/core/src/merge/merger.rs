//! Snapshot merge engine.
//!
//! Two strategies are provided:
//!
//! - [`Merger::three_way_merge`] reconciles `ours` and `theirs` against their
//!   common ancestor `base`, deciding each element id independently.
//! - [`Merger::direct_merge`] is the fallback when no ancestor is known: it
//!   starts from `ours`, adds what only `theirs` has and flags every id whose
//!   content differs between the two.
//!
//! Nodes and edges are merged independently with the same rules.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::diff::index_by_id;
use crate::merge::conflict::{Divergence, MergeConflict};
use crate::snapshot::{Edge, GraphElement, Node, Snapshot};

/// Which algorithm produced a [`MergeResult`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Two-way merge without a common ancestor.
    Direct,
    /// Three-way merge against a common ancestor.
    ThreeWay,
}

impl std::fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::ThreeWay => write!(f, "three-way"),
        }
    }
}

/// The outcome of a merge attempt.
///
/// When `success` is false, `merged` is a partial snapshot containing every
/// non-conflicting decision and `conflicts` lists what still needs a
/// resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeResult {
    pub success: bool,
    pub merged: Snapshot,
    #[serde(default)]
    pub conflicts: Vec<MergeConflict>,
    pub strategy: MergeStrategy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_branch_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_branch_id: Option<String>,
    /// The common ancestor version, for three-way merges.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_version_id: Option<String>,
    /// Target head at merge time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ours_version_id: Option<String>,
    /// Source head at merge time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theirs_version_id: Option<String>,
}

impl MergeResult {
    fn new(merged: Snapshot, conflicts: Vec<MergeConflict>, strategy: MergeStrategy) -> Self {
        Self {
            success: conflicts.is_empty(),
            merged,
            conflicts,
            strategy,
            source_branch_id: None,
            target_branch_id: None,
            base_version_id: None,
            ours_version_id: None,
            theirs_version_id: None,
        }
    }

    /// Number of conflicts without a resolution.
    pub fn unresolved_count(&self) -> usize {
        self.conflicts.iter().filter(|c| !c.is_resolved()).count()
    }
}

/// Stateless merge engine.
pub struct Merger;

impl Merger {
    /// Merge `ours` and `theirs` against their common ancestor `base`.
    pub fn three_way_merge(base: &Snapshot, ours: &Snapshot, theirs: &Snapshot) -> MergeResult {
        info!("performing three-way merge");

        let mut merged = Snapshot::default();
        let mut conflicts = Vec::new();

        merged.nodes = three_way_elements::<Node>(
            &base.nodes,
            &ours.nodes,
            &theirs.nodes,
            &mut conflicts,
        );
        merged.edges = three_way_elements::<Edge>(
            &base.edges,
            &ours.edges,
            &theirs.edges,
            &mut conflicts,
        );

        info!(
            nodes = merged.nodes.len(),
            edges = merged.edges.len(),
            conflicts = conflicts.len(),
            "three-way merge finished"
        );
        MergeResult::new(merged, conflicts, MergeStrategy::ThreeWay)
    }

    /// Merge two snapshots that share no known ancestor.
    ///
    /// Elements present on both sides with different content are reported as
    /// `*-modified` conflicts; the partial result keeps ours' copy of them.
    pub fn direct_merge(ours: &Snapshot, theirs: &Snapshot) -> MergeResult {
        info!("performing direct merge");

        let mut merged = ours.clone();
        let mut conflicts = Vec::new();

        direct_elements::<Node>(&mut merged, &ours.nodes, &theirs.nodes, &mut conflicts);
        direct_elements::<Edge>(&mut merged, &ours.edges, &theirs.edges, &mut conflicts);

        info!(conflicts = conflicts.len(), "direct merge finished");
        MergeResult::new(merged, conflicts, MergeStrategy::Direct)
    }
}

fn direct_elements<T: GraphElement>(
    merged: &mut Snapshot,
    ours: &[T],
    theirs: &[T],
    conflicts: &mut Vec<MergeConflict>,
) {
    let ours_by_id = index_by_id(ours);

    for item in theirs {
        match ours_by_id.get(item.id()) {
            None => T::collection_mut(merged).push(item.clone()),
            Some(mine) if mine.structurally_eq(item) => {}
            Some(mine) => {
                debug!(element_id = item.id(), kind = %T::ELEMENT_TYPE, "conflicting content");
                conflicts.push(MergeConflict::new(
                    Divergence::Modified,
                    item.id(),
                    None,
                    Some(*mine),
                    Some(item),
                ));
            }
        }
    }
}

/// Decide every id of one collection. Output order follows first appearance
/// across ours, theirs, then base.
fn three_way_elements<T: GraphElement>(
    base: &[T],
    ours: &[T],
    theirs: &[T],
    conflicts: &mut Vec<MergeConflict>,
) -> Vec<T> {
    let base_by_id = index_by_id(base);
    let ours_by_id = index_by_id(ours);
    let theirs_by_id = index_by_id(theirs);

    let mut seen = HashSet::new();
    let ids = ours
        .iter()
        .chain(theirs)
        .chain(base)
        .map(T::id)
        .filter(|id| seen.insert(*id));

    let mut merged = Vec::new();
    for id in ids {
        let b = base_by_id.get(id).copied();
        let o = ours_by_id.get(id).copied();
        let t = theirs_by_id.get(id).copied();

        match decide(b, o, t) {
            Decision::Keep(element) => merged.push(element.clone()),
            Decision::Drop => debug!(element_id = id, kind = %T::ELEMENT_TYPE, "deleted"),
            Decision::Conflict(divergence) => {
                debug!(element_id = id, kind = %T::ELEMENT_TYPE, ?divergence, "conflict");
                conflicts.push(MergeConflict::new(divergence, id, b, o, t));
            }
        }
    }
    merged
}

enum Decision<'a, T> {
    Keep(&'a T),
    Drop,
    Conflict(Divergence),
}

/// Per-id precedence rules of the three-way merge.
fn decide<'a, T: GraphElement>(
    base: Option<&'a T>,
    ours: Option<&'a T>,
    theirs: Option<&'a T>,
) -> Decision<'a, T> {
    match (base, ours, theirs) {
        (None, None, None) => Decision::Drop,
        (None, None, Some(t)) => Decision::Keep(t),
        (None, Some(o), None) => Decision::Keep(o),
        (None, Some(o), Some(t)) => {
            if o.structurally_eq(t) {
                Decision::Keep(o)
            } else {
                Decision::Conflict(Divergence::Added)
            }
        }
        (Some(_), None, None) => Decision::Drop,
        (Some(b), None, Some(t)) => {
            if t.structurally_eq(b) {
                Decision::Drop
            } else {
                Decision::Conflict(Divergence::Deleted)
            }
        }
        (Some(b), Some(o), None) => {
            if o.structurally_eq(b) {
                Decision::Drop
            } else {
                Decision::Conflict(Divergence::Deleted)
            }
        }
        (Some(b), Some(o), Some(t)) => {
            if o.structurally_eq(t) || t.structurally_eq(b) {
                Decision::Keep(o)
            } else if o.structurally_eq(b) {
                Decision::Keep(t)
            } else {
                Decision::Conflict(Divergence::Modified)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::conflict::ConflictType;
    use crate::snapshot::DiagramElement;
    use serde_json::json;

    fn labelled(id: &str, label: &str) -> Node {
        Node::new(id).with("label", label)
    }

    fn nodes(items: Vec<Node>) -> Snapshot {
        Snapshot::new(items, vec![])
    }

    fn label_of(snapshot: &Snapshot, id: &str) -> Option<String> {
        snapshot.node(id).and_then(Node::label).map(str::to_string)
    }

    fn side_label(side: &Option<DiagramElement>) -> Option<&serde_json::Value> {
        side.as_ref().and_then(|e| e.field("label"))
    }

    #[test]
    fn test_identical_rename_is_clean() {
        let base = nodes(vec![labelled("X", "A")]);
        let ours = nodes(vec![labelled("X", "A1")]);
        let theirs = nodes(vec![labelled("X", "A1")]);

        let result = Merger::three_way_merge(&base, &ours, &theirs);
        assert!(result.success);
        assert!(result.conflicts.is_empty());
        assert_eq!(label_of(&result.merged, "X").as_deref(), Some("A1"));
    }

    #[test]
    fn test_divergent_rename_conflicts() {
        let base = nodes(vec![labelled("X", "A")]);
        let ours = nodes(vec![labelled("X", "A1")]);
        let theirs = nodes(vec![labelled("X", "A2")]);

        let result = Merger::three_way_merge(&base, &ours, &theirs);
        assert!(!result.success);
        assert_eq!(result.conflicts.len(), 1);

        let c = &result.conflicts[0];
        assert_eq!(c.conflict_type, ConflictType::NodeModified);
        assert_eq!(c.element_id, "X");
        assert_eq!(side_label(&c.ours), Some(&json!("A1")));
        assert_eq!(side_label(&c.theirs), Some(&json!("A2")));
        assert_eq!(side_label(&c.base), Some(&json!("A")));
        assert!(c.resolution.is_none());

        // Conflicted elements are left out of the partial result.
        assert!(result.merged.node("X").is_none());
    }

    #[test]
    fn test_delete_of_unchanged_element_wins() {
        let base = nodes(vec![labelled("X", "A"), labelled("Y", "B")]);
        let ours = nodes(vec![labelled("X", "A")]);
        let theirs = base.clone();

        let result = Merger::three_way_merge(&base, &ours, &theirs);
        assert!(result.success);
        assert_eq!(result.merged.nodes.len(), 1);
        assert!(result.merged.node("X").is_some());
        assert!(result.merged.node("Y").is_none());
    }

    #[test]
    fn test_delete_versus_modify_conflicts() {
        let base = nodes(vec![labelled("X", "A")]);
        let ours = Snapshot::default();
        let theirs = nodes(vec![labelled("X", "Z")]);

        let result = Merger::three_way_merge(&base, &ours, &theirs);
        assert!(!result.success);
        assert_eq!(result.conflicts.len(), 1);

        let c = &result.conflicts[0];
        assert_eq!(c.conflict_type, ConflictType::NodeDeleted);
        assert_eq!(c.element_id, "X");
        assert!(c.ours.is_none());
        assert_eq!(side_label(&c.theirs), Some(&json!("Z")));

        // Mirror case: modified in ours, deleted in theirs.
        let result = Merger::three_way_merge(&base, &theirs, &ours);
        assert_eq!(result.conflicts[0].conflict_type, ConflictType::NodeDeleted);
        assert!(result.conflicts[0].theirs.is_none());
    }

    #[test]
    fn test_added_on_both_sides() {
        let base = Snapshot::default();
        let same = nodes(vec![labelled("N", "new")]);
        let result = Merger::three_way_merge(&base, &same, &same.clone());
        assert!(result.success);
        assert_eq!(result.merged.nodes.len(), 1);

        let other = nodes(vec![labelled("N", "different")]);
        let result = Merger::three_way_merge(&base, &same, &other);
        assert_eq!(result.conflicts.len(), 1);
        assert_eq!(result.conflicts[0].conflict_type, ConflictType::NodeAdded);
        assert!(result.conflicts[0].base.is_none());
    }

    #[test]
    fn test_one_sided_changes_are_taken() {
        let base = nodes(vec![labelled("X", "A"), labelled("Y", "B")]);
        let ours = nodes(vec![labelled("X", "A-ours"), labelled("Y", "B"), labelled("O", "o")]);
        let theirs = nodes(vec![labelled("X", "A"), labelled("Y", "B-theirs"), labelled("T", "t")]);

        let result = Merger::three_way_merge(&base, &ours, &theirs);
        assert!(result.success);
        assert_eq!(label_of(&result.merged, "X").as_deref(), Some("A-ours"));
        assert_eq!(label_of(&result.merged, "Y").as_deref(), Some("B-theirs"));
        assert!(result.merged.node("O").is_some());
        assert!(result.merged.node("T").is_some());
    }

    #[test]
    fn test_deleted_on_both_sides() {
        let base = nodes(vec![labelled("X", "A")]);
        let result = Merger::three_way_merge(&base, &Snapshot::default(), &Snapshot::default());
        assert!(result.success);
        assert!(result.merged.is_empty());
    }

    #[test]
    fn test_merge_is_idempotent() {
        let snap = Snapshot::new(
            vec![labelled("X", "A"), labelled("Y", "B")],
            vec![Edge::new("e1", "X", "Y")],
        );
        let result = Merger::three_way_merge(&snap, &snap, &snap);
        assert!(result.success);
        assert!(result.merged.structurally_eq(&snap));

        let result = Merger::direct_merge(&snap, &snap);
        assert!(result.success);
        assert!(result.merged.structurally_eq(&snap));
    }

    #[test]
    fn test_unchanged_side_yields_other_side() {
        let base = Snapshot::new(
            vec![labelled("X", "A"), labelled("Y", "B")],
            vec![Edge::new("e1", "X", "Y")],
        );
        let changed = Snapshot::new(
            vec![labelled("X", "A2"), labelled("W", "W")],
            vec![Edge::new("e2", "X", "W")],
        );

        let result = Merger::three_way_merge(&base, &base, &changed);
        assert!(result.success);
        assert!(result.merged.structurally_eq(&changed));

        let result = Merger::three_way_merge(&base, &changed, &base);
        assert!(result.success);
        assert!(result.merged.structurally_eq(&changed));
    }

    #[test]
    fn test_each_conflicting_id_reported_once() {
        let base = nodes(vec![labelled("X", "A"), labelled("Y", "B"), labelled("Z", "C")]);
        let ours = nodes(vec![labelled("X", "A1"), labelled("Y", "B1"), labelled("Z", "C")]);
        let theirs = nodes(vec![labelled("X", "A2"), labelled("Y", "B2"), labelled("Z", "C")]);

        let result = Merger::three_way_merge(&base, &ours, &theirs);
        let ids: Vec<&str> = result.conflicts.iter().map(|c| c.element_id.as_str()).collect();
        assert_eq!(ids.len(), 2);
        let unique: HashSet<&str> = ids.iter().copied().collect();
        assert_eq!(unique.len(), 2);
        assert!(unique.contains("X") && unique.contains("Y"));
        assert_eq!(label_of(&result.merged, "Z").as_deref(), Some("C"));
    }

    #[test]
    fn test_edges_merge_independently_of_nodes() {
        let base = Snapshot::new(vec![Node::new("n")], vec![Edge::new("n", "a", "b")]);
        let ours = Snapshot::new(vec![Node::new("n")], vec![Edge::new("n", "a", "c")]);
        let theirs = Snapshot::new(vec![Node::new("n")], vec![Edge::new("n", "a", "d")]);

        let result = Merger::three_way_merge(&base, &ours, &theirs);
        assert_eq!(result.conflicts.len(), 1);
        assert_eq!(result.conflicts[0].conflict_type, ConflictType::EdgeModified);
        assert!(result.merged.node("n").is_some());
        assert!(result.merged.edge("n").is_none());
    }

    #[test]
    fn test_edge_added_on_both_sides() {
        let base = nodes(vec![Node::new("a"), Node::new("b")]);
        let mut ours = base.clone();
        ours.upsert(Edge::new("e1", "a", "b").with("label", "calls"));
        let mut theirs = base.clone();
        theirs.upsert(Edge::new("e1", "a", "b").with("label", "uses"));
        // Same edge added identically on both sides merges cleanly.
        ours.upsert(Edge::new("e2", "b", "a"));
        theirs.upsert(Edge::new("e2", "b", "a"));

        let result = Merger::three_way_merge(&base, &ours, &theirs);
        assert_eq!(result.conflicts.len(), 1);
        let c = &result.conflicts[0];
        assert_eq!(c.conflict_type, ConflictType::EdgeAdded);
        assert_eq!(c.element_id, "e1");
        assert!(c.base.is_none());
        assert_eq!(side_label(&c.theirs), Some(&json!("uses")));
        assert!(result.merged.edge("e1").is_none());
        assert!(result.merged.edge("e2").is_some());
        assert_eq!(result.merged.nodes.len(), 2);
    }

    #[test]
    fn test_edge_deleted_against_modified() {
        let base = Snapshot::new(
            vec![Node::new("a"), Node::new("b")],
            vec![Edge::new("e1", "a", "b"), Edge::new("e2", "b", "a")],
        );
        // Ours relabels e1 and drops e2; theirs drops e1 and relabels e2.
        let ours = Snapshot::new(
            vec![Node::new("a"), Node::new("b")],
            vec![Edge::new("e1", "a", "b").with("label", "kept")],
        );
        let theirs = Snapshot::new(
            vec![Node::new("a"), Node::new("b")],
            vec![Edge::new("e2", "b", "a").with("label", "kept")],
        );

        let result = Merger::three_way_merge(&base, &ours, &theirs);
        assert!(!result.success);
        let ids: Vec<(&str, ConflictType)> = result
            .conflicts
            .iter()
            .map(|c| (c.element_id.as_str(), c.conflict_type))
            .collect();
        assert_eq!(
            ids,
            vec![("e1", ConflictType::EdgeDeleted), ("e2", ConflictType::EdgeDeleted)]
        );
        assert!(result.conflicts[0].theirs.is_none());
        assert!(result.conflicts[1].ours.is_none());
        assert!(result.merged.edges.is_empty());
    }

    #[test]
    fn test_merge_is_deterministic() {
        let base = nodes(vec![labelled("X", "A"), labelled("Y", "B")]);
        let ours = nodes(vec![labelled("Y", "B1"), labelled("X", "A1")]);
        let theirs = nodes(vec![labelled("X", "A2"), labelled("Q", "q")]);

        let first = Merger::three_way_merge(&base, &ours, &theirs);
        let second = Merger::three_way_merge(&base, &ours, &theirs);
        assert!(first.merged.structurally_eq(&second.merged));
        let ids = |r: &MergeResult| {
            r.conflicts
                .iter()
                .map(|c| (c.element_id.clone(), c.conflict_type))
                .collect::<Vec<_>>()
        };
        assert_eq!(ids(&first), ids(&second));
    }

    #[test]
    fn test_direct_merge() {
        let ours = Snapshot::new(
            vec![labelled("X", "A"), labelled("Y", "B")],
            vec![Edge::new("e1", "X", "Y")],
        );
        let theirs = Snapshot::new(
            vec![labelled("X", "A"), labelled("Y", "B2"), labelled("W", "W")],
            vec![Edge::new("e2", "Y", "W")],
        );

        let result = Merger::direct_merge(&ours, &theirs);
        assert_eq!(result.strategy, MergeStrategy::Direct);
        assert!(!result.success);
        assert_eq!(result.conflicts.len(), 1);

        let c = &result.conflicts[0];
        assert_eq!(c.conflict_type, ConflictType::NodeModified);
        assert_eq!(c.element_id, "Y");
        assert!(c.base.is_none());
        assert_eq!(side_label(&c.ours), Some(&json!("B")));
        assert_eq!(side_label(&c.theirs), Some(&json!("B2")));

        // Starts from ours, adds theirs-only elements, keeps ours' copy of Y.
        assert_eq!(result.merged.nodes.len(), 3);
        assert_eq!(label_of(&result.merged, "Y").as_deref(), Some("B"));
        assert!(result.merged.edge("e1").is_some());
        assert!(result.merged.edge("e2").is_some());
    }

    #[test]
    fn test_result_wire_shape() {
        let result = Merger::three_way_merge(
            &Snapshot::default(),
            &Snapshot::default(),
            &Snapshot::default(),
        );
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["strategy"], "three_way");
        assert!(json.get("base_version_id").is_none());
    }
}
