//! Diagram snapshot model.
//!
//! A [`Snapshot`] is the full state of a diagram at one instant: a list of
//! [`Node`]s and a list of [`Edge`]s. Apart from their ids (and an edge's
//! endpoints) elements are opaque JSON payloads that are only ever compared
//! by deep structural equality, see [`values_equal`].

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Element types
// ---------------------------------------------------------------------------

/// Which collection of a snapshot an element belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ElementType {
    Node,
    Edge,
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Node => write!(f, "node"),
            Self::Edge => write!(f, "edge"),
        }
    }
}

/// A diagram node. Everything except `id` is opaque payload
/// (position, label, style, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl Node {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            data: Map::new(),
        }
    }

    /// Builder-style helper to set a payload field.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }

    /// Convenience accessor for the conventional `label` field.
    pub fn label(&self) -> Option<&str> {
        self.data.get("label").and_then(Value::as_str)
    }
}

/// A diagram edge. `source` and `target` are node ids but are not validated:
/// dangling references are tolerated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl Edge {
    pub fn new(id: impl Into<String>, source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            data: Map::new(),
        }
    }

    /// Builder-style helper to set a payload field.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }
}

/// A node or an edge, tagged with its kind. Used where both kinds travel
/// together, e.g. inside merge conflicts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagramElement {
    Node(Node),
    Edge(Edge),
}

impl DiagramElement {
    pub fn id(&self) -> &str {
        match self {
            Self::Node(n) => &n.id,
            Self::Edge(e) => &e.id,
        }
    }

    pub fn element_type(&self) -> ElementType {
        match self {
            Self::Node(_) => ElementType::Node,
            Self::Edge(_) => ElementType::Edge,
        }
    }

    /// Payload field lookup on either kind.
    pub fn field(&self, key: &str) -> Option<&Value> {
        match self {
            Self::Node(n) => n.data.get(key),
            Self::Edge(e) => e.data.get(key),
        }
    }
}

impl PartialEq for DiagramElement {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Node(a), Self::Node(b)) => a.structurally_eq(b),
            (Self::Edge(a), Self::Edge(b)) => a.structurally_eq(b),
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// GraphElement: the seam shared by diff and merge
// ---------------------------------------------------------------------------

/// Behaviour shared by nodes and edges so the diff and merge algorithms can
/// be written once and applied to both collections independently.
pub trait GraphElement: Clone {
    const ELEMENT_TYPE: ElementType;

    fn id(&self) -> &str;

    /// Deep equality over every field, including the id.
    fn structurally_eq(&self, other: &Self) -> bool;

    fn into_element(self) -> DiagramElement;

    /// Extract an element of this kind from a [`DiagramElement`].
    fn from_element(element: &DiagramElement) -> Option<&Self>;

    /// The collection of this kind inside a snapshot.
    fn collection(snapshot: &Snapshot) -> &[Self];

    fn collection_mut(snapshot: &mut Snapshot) -> &mut Vec<Self>;
}

impl GraphElement for Node {
    const ELEMENT_TYPE: ElementType = ElementType::Node;

    fn id(&self) -> &str {
        &self.id
    }

    fn structurally_eq(&self, other: &Self) -> bool {
        self.id == other.id && maps_equal(&self.data, &other.data)
    }

    fn into_element(self) -> DiagramElement {
        DiagramElement::Node(self)
    }

    fn from_element(element: &DiagramElement) -> Option<&Self> {
        match element {
            DiagramElement::Node(n) => Some(n),
            DiagramElement::Edge(_) => None,
        }
    }

    fn collection(snapshot: &Snapshot) -> &[Self] {
        &snapshot.nodes
    }

    fn collection_mut(snapshot: &mut Snapshot) -> &mut Vec<Self> {
        &mut snapshot.nodes
    }
}

impl GraphElement for Edge {
    const ELEMENT_TYPE: ElementType = ElementType::Edge;

    fn id(&self) -> &str {
        &self.id
    }

    fn structurally_eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.source == other.source
            && self.target == other.target
            && maps_equal(&self.data, &other.data)
    }

    fn into_element(self) -> DiagramElement {
        DiagramElement::Edge(self)
    }

    fn from_element(element: &DiagramElement) -> Option<&Self> {
        match element {
            DiagramElement::Edge(e) => Some(e),
            DiagramElement::Node(_) => None,
        }
    }

    fn collection(snapshot: &Snapshot) -> &[Self] {
        &snapshot.edges
    }

    fn collection_mut(snapshot: &mut Snapshot) -> &mut Vec<Self> {
        &mut snapshot.edges
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Full diagram state at one point in time.
///
/// Node ids are unique within a snapshot, as are edge ids. A missing or empty
/// snapshot is simply one with no nodes and no edges.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl Snapshot {
    pub fn new(nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        Self { nodes, edges }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn edge(&self, id: &str) -> Option<&Edge> {
        self.edges.iter().find(|e| e.id == id)
    }

    /// Insert `element` or replace the element with the same id in place.
    pub fn upsert<T: GraphElement>(&mut self, element: T) {
        let items = T::collection_mut(self);
        match items.iter().position(|e| e.id() == element.id()) {
            Some(idx) => items[idx] = element,
            None => items.push(element),
        }
    }

    /// Remove the element with the given id, returning it if present.
    pub fn remove<T: GraphElement>(&mut self, id: &str) -> Option<T> {
        let items = T::collection_mut(self);
        items
            .iter()
            .position(|e| e.id() == id)
            .map(|idx| items.remove(idx))
    }

    /// Element-wise structural equality, ignoring element order.
    pub fn structurally_eq(&self, other: &Snapshot) -> bool {
        same_elements(&self.nodes, &other.nodes) && same_elements(&self.edges, &other.edges)
    }
}

fn same_elements<T: GraphElement>(a: &[T], b: &[T]) -> bool {
    a.len() == b.len()
        && a.iter().all(|x| {
            b.iter()
                .find(|y| y.id() == x.id())
                .is_some_and(|y| x.structurally_eq(y))
        })
}

// ---------------------------------------------------------------------------
// Deep equality
// ---------------------------------------------------------------------------

/// Deep structural equality over JSON values.
///
/// Objects compare independently of key order, numbers compare by numeric
/// value (`1 == 1.0`), arrays compare element-wise in order.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => {
            if let (Some(x), Some(y)) = (x.as_i64(), y.as_i64()) {
                x == y
            } else if let (Some(x), Some(y)) = (x.as_u64(), y.as_u64()) {
                x == y
            } else {
                x.as_f64() == y.as_f64()
            }
        }
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| values_equal(a, b))
        }
        (Value::Object(x), Value::Object(y)) => maps_equal(x, y),
        _ => false,
    }
}

/// Key-order independent map equality.
pub fn maps_equal(a: &Map<String, Value>, b: &Map<String, Value>) -> bool {
    a.len() == b.len()
        && a
            .iter()
            .all(|(k, v)| b.get(k).is_some_and(|other| values_equal(v, other)))
}
