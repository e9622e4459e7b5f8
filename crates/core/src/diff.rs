//! Snapshot diffing.
//!
//! [`diff`] compares two snapshots element by element, keyed by id, and
//! reports what was added, removed and modified. Elements present on both
//! sides and structurally equal are omitted. Output follows the order of the
//! input snapshots.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::snapshot::{Edge, GraphElement, Node, Snapshot};

/// The two sides of an element that changed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Modified<T> {
    pub before: T,
    pub after: T,
}

/// Element-level differences between a base and a new snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotDiff {
    pub added_nodes: Vec<Node>,
    pub removed_nodes: Vec<Node>,
    pub modified_nodes: Vec<Modified<Node>>,
    pub added_edges: Vec<Edge>,
    pub removed_edges: Vec<Edge>,
    pub modified_edges: Vec<Modified<Edge>>,
}

impl SnapshotDiff {
    pub fn is_empty(&self) -> bool {
        self.added_nodes.is_empty()
            && self.removed_nodes.is_empty()
            && self.modified_nodes.is_empty()
            && self.added_edges.is_empty()
            && self.removed_edges.is_empty()
            && self.modified_edges.is_empty()
    }

    /// Total number of changed elements.
    pub fn change_count(&self) -> usize {
        self.added_nodes.len()
            + self.removed_nodes.len()
            + self.modified_nodes.len()
            + self.added_edges.len()
            + self.removed_edges.len()
            + self.modified_edges.len()
    }
}

/// Per-collection result of [`diff_elements`].
pub struct ElementChanges<T> {
    pub added: Vec<T>,
    pub removed: Vec<T>,
    pub modified: Vec<Modified<T>>,
}

/// Build an id → element index over a slice.
pub(crate) fn index_by_id<T: GraphElement>(items: &[T]) -> HashMap<&str, &T> {
    items.iter().map(|e| (e.id(), e)).collect()
}

/// Diff one collection (nodes or edges) of two snapshots.
pub fn diff_elements<T: GraphElement>(base: &[T], new: &[T]) -> ElementChanges<T> {
    let base_by_id = index_by_id(base);
    let new_by_id = index_by_id(new);

    let mut added = Vec::new();
    let mut modified = Vec::new();
    for item in new {
        match base_by_id.get(item.id()) {
            None => added.push(item.clone()),
            Some(before) if !before.structurally_eq(item) => modified.push(Modified {
                before: (*before).clone(),
                after: item.clone(),
            }),
            Some(_) => {}
        }
    }

    let removed = base
        .iter()
        .filter(|item| !new_by_id.contains_key(item.id()))
        .cloned()
        .collect();

    ElementChanges {
        added,
        removed,
        modified,
    }
}

/// Compute the element-level diff from `base` to `new`.
pub fn diff(base: &Snapshot, new: &Snapshot) -> SnapshotDiff {
    let nodes = diff_elements(&base.nodes, &new.nodes);
    let edges = diff_elements(&base.edges, &new.edges);

    let result = SnapshotDiff {
        added_nodes: nodes.added,
        removed_nodes: nodes.removed,
        modified_nodes: nodes.modified,
        added_edges: edges.added,
        removed_edges: edges.removed,
        modified_edges: edges.modified,
    };
    debug!(changes = result.change_count(), "computed snapshot diff");
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn ids<T: GraphElement>(items: &[T]) -> BTreeSet<String> {
        items.iter().map(|e| e.id().to_string()).collect()
    }

    fn sample_a() -> Snapshot {
        Snapshot::new(
            vec![
                Node::new("X").with("label", "A"),
                Node::new("Y").with("label", "B"),
                Node::new("Z"),
            ],
            vec![Edge::new("e1", "X", "Y"), Edge::new("e2", "Y", "Z")],
        )
    }

    fn sample_b() -> Snapshot {
        Snapshot::new(
            vec![
                Node::new("X").with("label", "A1"),
                Node::new("Z"),
                Node::new("W").with("label", "new"),
            ],
            vec![
                Edge::new("e1", "X", "Y").with("animated", true),
                Edge::new("e3", "W", "ghost"),
            ],
        )
    }

    #[test]
    fn test_diff_identity_is_empty() {
        let snap = sample_a();
        assert!(diff(&snap, &snap).is_empty());
        assert!(diff(&Snapshot::default(), &Snapshot::default()).is_empty());
    }

    #[test]
    fn test_diff_classifies_changes() {
        let d = diff(&sample_a(), &sample_b());

        assert_eq!(ids(&d.added_nodes), BTreeSet::from(["W".to_string()]));
        assert_eq!(ids(&d.removed_nodes), BTreeSet::from(["Y".to_string()]));
        assert_eq!(d.modified_nodes.len(), 1);
        assert_eq!(d.modified_nodes[0].before.label(), Some("A"));
        assert_eq!(d.modified_nodes[0].after.label(), Some("A1"));

        assert_eq!(ids(&d.added_edges), BTreeSet::from(["e3".to_string()]));
        assert_eq!(ids(&d.removed_edges), BTreeSet::from(["e2".to_string()]));
        assert_eq!(d.modified_edges.len(), 1);
        assert_eq!(d.change_count(), 6);
    }

    #[test]
    fn test_diff_symmetry() {
        let (a, b) = (sample_a(), sample_b());
        let forward = diff(&a, &b);
        let backward = diff(&b, &a);

        assert_eq!(ids(&forward.added_nodes), ids(&backward.removed_nodes));
        assert_eq!(ids(&forward.removed_nodes), ids(&backward.added_nodes));
        assert_eq!(ids(&forward.added_edges), ids(&backward.removed_edges));
        assert_eq!(ids(&forward.removed_edges), ids(&backward.added_edges));
        assert_eq!(forward.modified_nodes.len(), backward.modified_nodes.len());
    }

    #[test]
    fn test_diff_against_empty() {
        let d = diff(&Snapshot::default(), &sample_a());
        assert_eq!(d.added_nodes.len(), 3);
        assert_eq!(d.added_edges.len(), 2);
        assert!(d.removed_nodes.is_empty());
    }

    #[test]
    fn test_reordered_payload_is_not_modified() {
        let base = Snapshot::new(
            vec![Node::new("X").with("w", 1).with("h", 2)],
            vec![],
        );
        let new = Snapshot::new(
            vec![Node::new("X").with("h", 2.0).with("w", 1)],
            vec![],
        );
        assert!(diff(&base, &new).is_empty());
    }
}
