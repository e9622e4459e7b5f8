//! diagramvc core library.
//!
//! This crate provides branching and version history for node/edge
//! diagrams: the snapshot model, branch and version stores (SQLite and
//! in-memory), element-level diffing, bounded merge-base discovery,
//! three-way and direct merging with structural conflicts, conflict
//! resolution, and configuration.

pub mod ancestor;
pub mod config;
pub mod db;
pub mod diff;
pub mod errors;
pub mod merge;
pub mod models;
pub mod service;
pub mod snapshot;
pub mod store;

// Re-exports for convenience.
pub use config::AppConfig;
pub use db::Database;
pub use diff::SnapshotDiff;
pub use errors::{BranchError, CoreError};
pub use merge::{ConflictResolver, MergeConflict, MergeResult, Merger, Resolution};
pub use models::{Branch, BranchSource, Version};
pub use service::BranchingService;
pub use snapshot::{DiagramElement, Edge, Node, Snapshot};
pub use store::{DiagramStore, MemoryStore};
