//! Diagram merging, conflict representation and conflict resolution.
//!
//! The merge subsystem is responsible for:
//! 1. **Merging** -- a direct two-way merge when branches share no history,
//!    or a three-way merge against their common ancestor.
//! 2. **Conflicts** -- elements whose divergent changes cannot be reconciled
//!    automatically are reported as [`MergeConflict`]s.
//! 3. **Resolution** -- caller-chosen resolutions are folded back into the
//!    partial merge result.

pub mod conflict;
pub mod merger;
pub mod resolver;

pub use conflict::{ConflictType, MergeConflict, Resolution};
pub use merger::{MergeResult, MergeStrategy, Merger};
pub use resolver::ConflictResolver;
