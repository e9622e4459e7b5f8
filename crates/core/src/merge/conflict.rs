//! Merge conflict records.

use serde::{Deserialize, Serialize};

use crate::errors::ConflictError;
use crate::snapshot::{DiagramElement, ElementType, GraphElement};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Categorisation of a conflict, per element kind.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictType {
    /// Both sides added the same id with different content.
    NodeAdded,
    /// Both sides changed the same node differently.
    NodeModified,
    /// One side deleted a node the other side changed.
    NodeDeleted,
    EdgeAdded,
    EdgeModified,
    EdgeDeleted,
}

/// The kind of divergence, independent of element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Divergence {
    Added,
    Modified,
    Deleted,
}

impl ConflictType {
    pub(crate) fn of(element_type: ElementType, divergence: Divergence) -> Self {
        match (element_type, divergence) {
            (ElementType::Node, Divergence::Added) => Self::NodeAdded,
            (ElementType::Node, Divergence::Modified) => Self::NodeModified,
            (ElementType::Node, Divergence::Deleted) => Self::NodeDeleted,
            (ElementType::Edge, Divergence::Added) => Self::EdgeAdded,
            (ElementType::Edge, Divergence::Modified) => Self::EdgeModified,
            (ElementType::Edge, Divergence::Deleted) => Self::EdgeDeleted,
        }
    }
}

impl std::fmt::Display for ConflictType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NodeAdded => write!(f, "node-added"),
            Self::NodeModified => write!(f, "node-modified"),
            Self::NodeDeleted => write!(f, "node-deleted"),
            Self::EdgeAdded => write!(f, "edge-added"),
            Self::EdgeModified => write!(f, "edge-modified"),
            Self::EdgeDeleted => write!(f, "edge-deleted"),
        }
    }
}

/// Which side a caller picked to resolve a conflict.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Ours,
    Theirs,
    Custom,
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ours => write!(f, "ours"),
            Self::Theirs => write!(f, "theirs"),
            Self::Custom => write!(f, "custom"),
        }
    }
}

/// A node or edge whose changes on the two sides could not be reconciled.
///
/// `ours`/`theirs`/`base` are `None` where the element is absent on that
/// side. `resolution` and `resolved_value` stay empty until a caller picks one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeConflict {
    #[serde(rename = "type")]
    pub conflict_type: ConflictType,
    pub element_id: String,
    pub element_type: ElementType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<DiagramElement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ours: Option<DiagramElement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theirs: Option<DiagramElement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_value: Option<DiagramElement>,
}

impl MergeConflict {
    pub(crate) fn new<T: GraphElement>(
        divergence: Divergence,
        element_id: &str,
        base: Option<&T>,
        ours: Option<&T>,
        theirs: Option<&T>,
    ) -> Self {
        Self {
            conflict_type: ConflictType::of(T::ELEMENT_TYPE, divergence),
            element_id: element_id.to_string(),
            element_type: T::ELEMENT_TYPE,
            base: base.cloned().map(GraphElement::into_element),
            ours: ours.cloned().map(GraphElement::into_element),
            theirs: theirs.cloned().map(GraphElement::into_element),
            resolution: None,
            resolved_value: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolution.is_some()
    }

    /// Resolve by taking one side as-is. The resolved value is `None` when
    /// the chosen side deleted the element.
    ///
    /// `Resolution::Custom` needs a value; use [`resolve_custom`](Self::resolve_custom).
    pub fn resolve(&mut self, resolution: Resolution) -> Result<(), ConflictError> {
        let value = match resolution {
            Resolution::Ours => self.ours.clone(),
            Resolution::Theirs => self.theirs.clone(),
            Resolution::Custom => {
                return Err(ConflictError::InvalidResolution {
                    element_id: self.element_id.clone(),
                    detail: "custom resolution requires a value".into(),
                })
            }
        };
        self.resolution = Some(resolution);
        self.resolved_value = value;
        Ok(())
    }

    /// Resolve with caller-supplied content. The value must be of the same
    /// element type and carry the same id as the conflicting element.
    pub fn resolve_custom(&mut self, value: DiagramElement) -> Result<(), ConflictError> {
        if value.element_type() != self.element_type {
            return Err(ConflictError::InvalidResolution {
                element_id: self.element_id.clone(),
                detail: format!(
                    "expected a {} but got a {}",
                    self.element_type,
                    value.element_type()
                ),
            });
        }
        if value.id() != self.element_id {
            return Err(ConflictError::InvalidResolution {
                element_id: self.element_id.clone(),
                detail: format!("resolved value has id {}", value.id()),
            });
        }
        self.resolution = Some(Resolution::Custom);
        self.resolved_value = Some(value);
        Ok(())
    }

    /// Re-apply the resolution carried by `chosen` (typically a copy that
    /// round-tripped through a client) to this conflict.
    ///
    /// Side picks are re-read from this conflict's own `ours`/`theirs`, so a
    /// stale or edited `resolved_value` is ignored. Custom values go through
    /// the same checks as [`resolve_custom`](Self::resolve_custom).
    pub fn adopt_resolution(&self, chosen: &MergeConflict) -> Result<MergeConflict, ConflictError> {
        let mut adopted = self.clone();
        match (chosen.resolution, &chosen.resolved_value) {
            (Some(Resolution::Custom), Some(value)) => adopted.resolve_custom(value.clone())?,
            (Some(Resolution::Custom), None) => {
                return Err(ConflictError::InvalidResolution {
                    element_id: self.element_id.clone(),
                    detail: "custom resolution requires a value".into(),
                })
            }
            (Some(side), _) => adopted.resolve(side)?,
            (None, _) => {
                return Err(ConflictError::InvalidResolution {
                    element_id: self.element_id.clone(),
                    detail: "conflict has no resolution".into(),
                })
            }
        }
        Ok(adopted)
    }
}
