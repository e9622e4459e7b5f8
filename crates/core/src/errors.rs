//! Error types for the diagramvc core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Branch(#[from] BranchError),

    #[error(transparent)]
    Conflict(#[from] ConflictError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

// ---------------------------------------------------------------------------
// Branch / version errors
// ---------------------------------------------------------------------------

/// Errors from branch and version operations.
#[derive(Debug, Error)]
pub enum BranchError {
    /// The requested branch does not exist.
    #[error("branch not found: {0}")]
    BranchNotFound(String),

    /// The requested version does not exist.
    #[error("version not found: {0}")]
    VersionNotFound(String),

    /// The default branch of a diagram can never be deleted.
    #[error("cannot delete default branch {0}")]
    CannotDeleteDefault(String),

    /// Another commit advanced the branch head between read and write.
    /// Callers should re-read the head and retry.
    #[error(
        "concurrent modification of branch {branch_id}: expected head {expected}, found {actual}"
    )]
    ConcurrentModification {
        branch_id: String,
        expected: String,
        actual: String,
    },

    /// A merge still has unresolved conflicts.
    #[error("{count} merge conflict(s) still need a resolution")]
    ConflictsPending { count: usize },

    /// No common ancestor was found within the bounded history walk.
    #[error("no common ancestor found within {depth} versions")]
    AncestorSearchExhausted { depth: usize },

    /// The diagram already has a default branch.
    #[error("diagram {0} is already initialized for branching")]
    AlreadyInitialized(String),

    /// Another branch of the same diagram already uses this name.
    #[error("branch name '{name}' is already used in diagram {diagram_id}")]
    NameTaken { diagram_id: String, name: String },

    /// Branch names must not be blank.
    #[error("invalid branch name: {0:?}")]
    InvalidName(String),

    /// A merge resolution does not match the conflict it claims to resolve.
    #[error(transparent)]
    InvalidResolution(#[from] ConflictError),

    /// Underlying store error.
    #[error("branch store error: {0}")]
    Store(#[from] StoreError),
}

// ---------------------------------------------------------------------------
// Conflict errors
// ---------------------------------------------------------------------------

/// Errors from the conflict resolution subsystem.
#[derive(Debug, Error)]
pub enum ConflictError {
    /// The provided resolution does not fit the conflict it resolves.
    #[error("invalid resolution for {element_id}: {detail}")]
    InvalidResolution { element_id: String, detail: String },
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Store errors
// ---------------------------------------------------------------------------

/// Errors from the branch/version persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying rusqlite error.
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A migration failed.
    #[error("database migration failed (version {version}): {detail}")]
    MigrationFailed { version: u32, detail: String },

    /// A record was not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// A snapshot could not be encoded or decoded.
    #[error("snapshot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The conditional head update found a different head than expected.
    #[error("head of branch {branch_id} moved: expected {expected:?}, found {actual:?}")]
    HeadMoved {
        branch_id: String,
        expected: Option<String>,
        actual: Option<String>,
    },

    /// The diagram already has a branch flagged as default.
    #[error("diagram {diagram_id} already has a default branch")]
    DuplicateDefault { diagram_id: String },

    /// Another branch of the diagram already uses this name.
    #[error("branch name '{name}' already exists in diagram {diagram_id}")]
    DuplicateName { diagram_id: String, name: String },

    /// Generic I/O error (e.g. file permissions).
    #[error("database I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl StoreError {
    pub(crate) fn not_found(entity: &str, id: &str) -> Self {
        Self::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        }
    }
}

// CoreError implements `std::error::Error` via `thiserror`, which means
// `anyhow::Error: From<CoreError>` is already provided by the blanket impl
// in `anyhow`.
