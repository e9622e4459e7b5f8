//! End-to-end tests for diagram branching against a file-backed database.
//!
//! These tests exercise the real `BranchingService` with:
//! - A real SQLite database in a temporary directory
//! - Forks, commits, merges and conflict resolution as a user would run them
//! - Reopening the database to check that history is durable

use std::path::Path;

use tempfile::TempDir;

use diagramvc_core::ancestor::walk_ancestry;
use diagramvc_core::config::AppConfig;
use diagramvc_core::db::Database;
use diagramvc_core::errors::BranchError;
use diagramvc_core::merge::{ConflictResolver, ConflictType, MergeStrategy, Resolution};
use diagramvc_core::models::{BranchSource, Version};
use diagramvc_core::snapshot::{DiagramElement, Edge, Node, Snapshot};
use diagramvc_core::store::DiagramStore;
use diagramvc_core::BranchingService;

// ===========================================================================
// Helpers
// ===========================================================================

fn open_service(path: &Path) -> BranchingService<Database> {
    let db = Database::new(path).expect("failed to create database");
    db.initialize().expect("failed to initialize database");
    BranchingService::new(db, "e2e")
}

fn node(id: &str, label: &str) -> Node {
    Node::new(id).with("label", label)
}

fn flowchart() -> Snapshot {
    Snapshot::new(
        vec![
            node("start", "Start").with("position", serde_json::json!({"x": 0, "y": 0})),
            node("check", "Valid?"),
            node("end", "End"),
        ],
        vec![
            Edge::new("e1", "start", "check"),
            Edge::new("e2", "check", "end").with("label", "yes"),
        ],
    )
}

fn label(snapshot: &Snapshot, id: &str) -> Option<String> {
    snapshot.node(id).and_then(Node::label).map(str::to_string)
}

// ===========================================================================
// Fork, diverge, merge
// ===========================================================================

#[test]
fn test_fork_edit_and_merge_back() {
    let tmp = TempDir::new().unwrap();
    let svc = open_service(&tmp.path().join("data").join("diagramvc.db"));

    let (main, v1) = svc.initialize_branching("flow", flowchart()).unwrap();
    let feature = svc
        .create_branch("flow", "add-retry", BranchSource::from_branch(&main.id))
        .unwrap();

    // Feature adds a retry node and edge.
    let mut edited = flowchart();
    edited.upsert(node("retry", "Retry"));
    edited.upsert(Edge::new("e3", "check", "retry").with("label", "no"));
    svc.create_version(&feature.id, edited, Some("add retry path".into()))
        .unwrap();

    // Main moves the start node independently.
    let mut moved = flowchart();
    moved.upsert(node("start", "Start").with("position", serde_json::json!({"x": 40, "y": 0})));
    svc.create_version(&main.id, moved, Some("move start".into()))
        .unwrap();

    let result = svc.merge_branches(&feature.id, &main.id).unwrap();
    assert!(result.success, "unexpected conflicts: {:?}", result.conflicts);
    assert_eq!(result.strategy, MergeStrategy::ThreeWay);
    assert_eq!(result.base_version_id.as_deref(), Some(v1.id.as_str()));
    assert!(result.merged.node("retry").is_some());
    assert!(result.merged.edge("e3").is_some());
    assert_eq!(
        result.merged.node("start").unwrap().data["position"]["x"],
        serde_json::json!(40)
    );

    let merged = svc.commit_merge(&result, &[], None).unwrap();
    let history = svc.get_version_history(&main.id, 10).unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].id, merged.id);

    let d = svc.diff_versions(&v1.id, &merged.id).unwrap();
    assert_eq!(d.added_nodes.len(), 1);
    assert_eq!(d.added_edges.len(), 1);
    assert_eq!(d.modified_nodes.len(), 1);
}

#[test]
fn test_conflict_round_trip() {
    let tmp = TempDir::new().unwrap();
    let svc = open_service(&tmp.path().join("diagramvc.db"));

    let (main, _) = svc.initialize_branching("flow", flowchart()).unwrap();
    let feature = svc
        .create_branch("flow", "rename", BranchSource::from_branch(&main.id))
        .unwrap();

    // Both sides rename the decision node; feature also deletes the end node
    // that main relabels.
    let mut theirs = flowchart();
    theirs.upsert(node("check", "Is valid?"));
    theirs.remove::<Node>("end");
    svc.create_version(&feature.id, theirs, None).unwrap();

    let mut ours = flowchart();
    ours.upsert(node("check", "Valid input?"));
    ours.upsert(node("end", "Done"));
    svc.create_version(&main.id, ours, None).unwrap();

    let mut result = svc.merge_branches(&feature.id, &main.id).unwrap();
    assert!(!result.success);
    assert_eq!(result.unresolved_count(), 2);

    let kinds: Vec<(String, ConflictType)> = result
        .conflicts
        .iter()
        .map(|c| (c.element_id.clone(), c.conflict_type))
        .collect();
    assert!(kinds.contains(&("check".to_string(), ConflictType::NodeModified)));
    assert!(kinds.contains(&("end".to_string(), ConflictType::NodeDeleted)));

    // The conflict list survives a JSON round trip, as a UI would send it.
    let wire = serde_json::to_string(&result.conflicts).unwrap();
    let mut resolved: Vec<diagramvc_core::MergeConflict> = serde_json::from_str(&wire).unwrap();
    for conflict in &mut resolved {
        if conflict.element_id == "check" {
            conflict
                .resolve_custom(DiagramElement::Node(node("check", "Valid? (merged)")))
                .unwrap();
        } else {
            conflict.resolve(Resolution::Ours).unwrap();
        }
    }

    let version = svc.commit_merge(&result, &resolved, None).unwrap();
    assert_eq!(label(&version.snapshot, "check").as_deref(), Some("Valid? (merged)"));
    assert_eq!(label(&version.snapshot, "end").as_deref(), Some("Done"));

    // Resolving on the result itself is accepted too.
    ConflictResolver::resolve_all(&mut result.conflicts, Resolution::Theirs).unwrap();
    assert!(matches!(
        svc.commit_merge(&result, &[], None),
        Err(BranchError::ConcurrentModification { .. })
    ));
}

// ===========================================================================
// Durability
// ===========================================================================

#[test]
fn test_history_survives_reopen() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("diagramvc.db");

    let (branch_id, head) = {
        let svc = open_service(&path);
        let (main, _) = svc.initialize_branching("flow", flowchart()).unwrap();
        let mut last = None;
        for i in 0..4 {
            let mut snap = flowchart();
            snap.upsert(node("start", &format!("Start v{i}")));
            last = Some(svc.create_version(&main.id, snap, None).unwrap().id);
        }
        svc.flush().unwrap();
        (main.id, last)
    };

    let svc = open_service(&path);
    let main = svc.get_branch(&branch_id).unwrap();
    assert_eq!(main.head_version_id, head);
    assert!(main.is_default);

    let chain = walk_ancestry(svc.store(), main.head_version_id.as_deref(), 100).unwrap();
    assert_eq!(chain.len(), 5);
    assert_eq!(label(&chain[0].snapshot, "start").as_deref(), Some("Start v3"));
    assert!(chain[4].parent_version_id.is_none());
}

#[test]
fn test_config_drives_service() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("config.toml");
    std::fs::write(
        &config_path,
        format!(
            "[general]\nauthor = \"dana\"\ndefault_branch_name = \"trunk\"\n\n[store]\ndata_dir = {:?}\n",
            tmp.path().join("store").display().to_string()
        ),
    )
    .unwrap();

    let config = AppConfig::load_and_resolve(&config_path).unwrap();
    let db = Database::new(config.database_path()).unwrap();
    db.initialize().unwrap();
    let svc = BranchingService::from_config(db, &config);

    let (branch, version) = svc.initialize_branching("flow", Snapshot::default()).unwrap();
    assert_eq!(branch.name, "trunk");
    assert_eq!(version.created_by, "dana");
    assert!(config.database_path().exists());
}

// ===========================================================================
// Concurrency
// ===========================================================================

#[test]
fn test_concurrent_writers_lose_cleanly() {
    let tmp = TempDir::new().unwrap();
    let svc = open_service(&tmp.path().join("diagramvc.db"));
    let (main, v1) = svc.initialize_branching("flow", flowchart()).unwrap();

    let writers = 6;
    let barrier = std::sync::Barrier::new(writers);
    let outcomes: Vec<Result<Version, BranchError>> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..writers)
            .map(|i| {
                let (svc, barrier, main, v1) = (&svc, &barrier, &main, &v1);
                s.spawn(move || {
                    let mut snap = v1.snapshot.clone();
                    snap.upsert(node(&format!("w{i}"), "writer"));
                    barrier.wait();
                    svc.create_version_at(&main.id, Some(&v1.id), snap, None)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let winners: Vec<&Version> = outcomes.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);
    let losers = outcomes
        .iter()
        .filter(|r| matches!(r, Err(BranchError::ConcurrentModification { .. })))
        .count();
    assert_eq!(losers, writers - 1);

    // One linear chain: the winner on top of the initial version.
    let main = svc.get_branch(&main.id).unwrap();
    assert_eq!(main.head_version_id.as_deref(), Some(winners[0].id.as_str()));
    let chain = walk_ancestry(svc.store(), main.head_version_id.as_deref(), 100).unwrap();
    assert_eq!(chain.len(), 2);
    assert_eq!(svc.store().list_versions(&main.id, 100).unwrap().len(), 2);

    // A loser retries by re-reading the head.
    let retried = svc.create_version(&main.id, flowchart(), Some("retry".into())).unwrap();
    assert_eq!(retried.parent_version_id.as_deref(), Some(winners[0].id.as_str()));
}
