//! Graph domain model.
//!
//! # Responsibility
//! - Define the canonical node/edge records owned by the graph store.
//! - Keep per-kind node payloads in one tagged union so a node's kind and
//!   its data can never disagree.
//! - Check structural invariants for whole-graph replacement.
//!
//! # Invariants
//! - Node ids and edge ids are unique within one graph.
//! - Every edge endpoint references an existing node.
//! - Exactly one `start` node exists; it is neither draggable nor deletable.
//! - Todo entries are always `{text, done}` records.
//! - A task's top-level `done` is only changed by explicit user action.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable node identifier.
pub type NodeId = String;
/// Stable edge identifier.
pub type EdgeId = String;

/// Id of the start node in a freshly created graph.
pub const DEFAULT_START_NODE_ID: &str = "n1";
/// Placement used when a node is added without an explicit position.
pub const DEFAULT_NEW_NODE_POSITION: Position = Position { x: 100.0, y: 0.0 };

/// Node category.
///
/// Serialized as `start|task|milestone`. The canvas type names
/// (`startNode|taskNode|milestoneNode`) are accepted on input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Singleton graph origin.
    #[serde(alias = "startNode")]
    Start,
    /// Unit of work with a done flag and checklist.
    #[serde(alias = "taskNode")]
    Task,
    /// Derived-completion node.
    #[serde(alias = "milestoneNode")]
    Milestone,
}

impl NodeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Task => "task",
            Self::Milestone => "milestone",
        }
    }

    /// Returns whether reachability traversal stops at this kind.
    pub fn is_traversal_boundary(self) -> bool {
        matches!(self, Self::Start | Self::Milestone)
    }
}

impl Display for NodeKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canvas coordinates. Carried through persistence, never interpreted here.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// One checklist entry of a task.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TodoItem {
    pub text: String,
    pub done: bool,
}

impl TodoItem {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            done: false,
        }
    }
}

/// Payload of a task node.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TaskData {
    pub title: String,
    pub description: String,
    /// Set only by explicit user action, never derived from `todos`.
    pub done: bool,
    pub todos: Vec<TodoItem>,
}

/// Payload of a milestone node.
///
/// Progress counters are derived on every evaluation and never stored here.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MilestoneData {
    pub title: String,
}

/// Per-kind node payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeData {
    Start,
    Task(TaskData),
    Milestone(MilestoneData),
}

impl NodeData {
    /// Returns an empty payload for `kind`.
    pub fn empty(kind: NodeKind) -> Self {
        match kind {
            NodeKind::Start => Self::Start,
            NodeKind::Task => Self::Task(TaskData::default()),
            NodeKind::Milestone => Self::Milestone(MilestoneData::default()),
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            Self::Start => NodeKind::Start,
            Self::Task(_) => NodeKind::Task,
            Self::Milestone(_) => NodeKind::Milestone,
        }
    }

    pub fn title(&self) -> Option<&str> {
        match self {
            Self::Start => None,
            Self::Task(task) => Some(task.title.as_str()),
            Self::Milestone(milestone) => Some(milestone.title.as_str()),
        }
    }
}

/// Canonical graph node.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: NodeId,
    pub position: Position,
    pub draggable: bool,
    pub deletable: bool,
    pub data: NodeData,
    /// Transient tag set while a two-phase removal is pending. Never persisted.
    pub removing: bool,
}

impl Node {
    /// Creates a node with the given payload.
    ///
    /// Start nodes are always pinned and non-deletable; every other kind is
    /// draggable and deletable.
    pub fn new(id: impl Into<NodeId>, position: Position, data: NodeData) -> Self {
        let movable = data.kind() != NodeKind::Start;
        Self {
            id: id.into(),
            position,
            draggable: movable,
            deletable: movable,
            data,
            removing: false,
        }
    }

    /// Creates the graph origin node.
    pub fn start(id: impl Into<NodeId>) -> Self {
        Self::new(id, Position::default(), NodeData::Start)
    }

    pub fn task(id: impl Into<NodeId>, position: Position, data: TaskData) -> Self {
        Self::new(id, position, NodeData::Task(data))
    }

    pub fn milestone(id: impl Into<NodeId>, position: Position, data: MilestoneData) -> Self {
        Self::new(id, position, NodeData::Milestone(data))
    }

    pub fn kind(&self) -> NodeKind {
        self.data.kind()
    }

    pub fn as_task(&self) -> Option<&TaskData> {
        match &self.data {
            NodeData::Task(task) => Some(task),
            _ => None,
        }
    }

    pub fn as_task_mut(&mut self) -> Option<&mut TaskData> {
        match &mut self.data {
            NodeData::Task(task) => Some(task),
            _ => None,
        }
    }

    /// Returns whether this node is a task whose top-level flag is set.
    pub fn is_done_task(&self) -> bool {
        self.as_task().is_some_and(|task| task.done)
    }
}

/// Generates a fresh node id.
pub fn generate_node_id() -> NodeId {
    format!("n-{}", Uuid::new_v4().simple())
}

/// Connection between two nodes.
///
/// `source`/`target` record drag direction only; progress traversal treats
/// edges as undirected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    pub source: NodeId,
    pub target: NodeId,
}

impl Edge {
    pub fn new(id: impl Into<EdgeId>, source: impl Into<NodeId>, target: impl Into<NodeId>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
        }
    }

    /// Creates an edge with the id derived from its endpoints.
    pub fn connecting(source: impl Into<NodeId>, target: impl Into<NodeId>) -> Self {
        let source = source.into();
        let target = target.into();
        Self {
            id: format!("e{source}-{target}"),
            source,
            target,
        }
    }

    /// Returns whether either endpoint equals `node_id`.
    pub fn touches(&self, node_id: &str) -> bool {
        self.source == node_id || self.target == node_id
    }
}

/// Immutable copy of the graph handed to observers.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GraphSnapshot {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl GraphSnapshot {
    pub fn new(nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        Self { nodes, edges }
    }

    /// The graph every new map starts from: one start node, no edges.
    pub fn default_graph() -> Self {
        Self {
            nodes: vec![Node::start(DEFAULT_START_NODE_ID)],
            edges: Vec::new(),
        }
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|node| node.id == id)
    }

    pub fn edge(&self, id: &str) -> Option<&Edge> {
        self.edges.iter().find(|edge| edge.id == id)
    }

    /// Iterates milestone nodes in graph order.
    pub fn milestones(&self) -> impl Iterator<Item = &Node> {
        self.nodes
            .iter()
            .filter(|node| node.kind() == NodeKind::Milestone)
    }

    /// Checks graph-wide invariants (ids, endpoints, start singleton).
    pub fn validate(&self) -> Result<(), GraphValidationError> {
        validate_graph(&self.nodes, &self.edges)
    }
}

/// Structural invariant violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphValidationError {
    /// Payload could not be parsed into the versioned schema.
    Malformed(String),
    /// Payload declares a schema version this build does not read.
    UnsupportedVersion(String),
    DuplicateNodeId(NodeId),
    DuplicateEdgeId(EdgeId),
    /// Edge references a node id absent from the graph.
    DanglingEdge { edge_id: EdgeId, node_id: NodeId },
    MissingStartNode,
    MultipleStartNodes(usize),
    /// The start node cannot be created, removed or re-typed by edits.
    StartNodeImmutable(NodeId),
    /// A data patch targets a node of another kind.
    KindMismatch {
        node_id: NodeId,
        expected: NodeKind,
        actual: NodeKind,
    },
}

impl Display for GraphValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed(message) => write!(f, "malformed graph payload: {message}"),
            Self::UnsupportedVersion(version) => {
                write!(f, "unsupported graph version `{version}`")
            }
            Self::DuplicateNodeId(id) => write!(f, "duplicate node id: {id}"),
            Self::DuplicateEdgeId(id) => write!(f, "duplicate edge id: {id}"),
            Self::DanglingEdge { edge_id, node_id } => {
                write!(f, "edge {edge_id} references missing node {node_id}")
            }
            Self::MissingStartNode => write!(f, "graph has no start node"),
            Self::MultipleStartNodes(count) => {
                write!(f, "graph has {count} start nodes; exactly one is required")
            }
            Self::StartNodeImmutable(id) => write!(f, "start node {id} cannot be changed"),
            Self::KindMismatch {
                node_id,
                expected,
                actual,
            } => write!(f, "node {node_id} is a {actual} node, expected {expected}"),
        }
    }
}

impl Error for GraphValidationError {}

/// Validates node/edge collections against graph invariants.
///
/// Checks run in a fixed order so the first reported violation is stable:
/// node ids, start singleton, edge ids, edge endpoints.
pub fn validate_graph(nodes: &[Node], edges: &[Edge]) -> Result<(), GraphValidationError> {
    let mut node_ids = HashSet::with_capacity(nodes.len());
    for node in nodes {
        if !node_ids.insert(node.id.as_str()) {
            return Err(GraphValidationError::DuplicateNodeId(node.id.clone()));
        }
    }

    match nodes
        .iter()
        .filter(|node| node.kind() == NodeKind::Start)
        .count()
    {
        0 => return Err(GraphValidationError::MissingStartNode),
        1 => {}
        count => return Err(GraphValidationError::MultipleStartNodes(count)),
    }

    let mut edge_ids = HashSet::with_capacity(edges.len());
    for edge in edges {
        if !edge_ids.insert(edge.id.as_str()) {
            return Err(GraphValidationError::DuplicateEdgeId(edge.id.clone()));
        }
        for endpoint in [&edge.source, &edge.target] {
            if !node_ids.contains(endpoint.as_str()) {
                return Err(GraphValidationError::DanglingEdge {
                    edge_id: edge.id.clone(),
                    node_id: endpoint.clone(),
                });
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str) -> Node {
        Node::task(id, Position::default(), TaskData::default())
    }

    #[test]
    fn start_node_is_pinned_and_not_deletable() {
        let start = Node::start("s");
        assert!(!start.draggable);
        assert!(!start.deletable);
        assert_eq!(start.kind(), NodeKind::Start);

        let other = task("t");
        assert!(other.draggable);
        assert!(other.deletable);
    }

    #[test]
    fn default_graph_is_valid() {
        let graph = GraphSnapshot::default_graph();
        assert_eq!(graph.nodes.len(), 1);
        assert_eq!(graph.nodes[0].id, DEFAULT_START_NODE_ID);
        graph.validate().unwrap();
    }

    #[test]
    fn validate_reports_duplicate_ids() {
        let nodes = vec![Node::start("n1"), task("t"), task("t")];
        assert_eq!(
            validate_graph(&nodes, &[]),
            Err(GraphValidationError::DuplicateNodeId("t".to_string()))
        );

        let nodes = vec![Node::start("n1"), task("t")];
        let edges = vec![Edge::new("e", "n1", "t"), Edge::new("e", "t", "n1")];
        assert_eq!(
            validate_graph(&nodes, &edges),
            Err(GraphValidationError::DuplicateEdgeId("e".to_string()))
        );
    }

    #[test]
    fn validate_reports_dangling_edge_and_start_count() {
        let nodes = vec![Node::start("n1")];
        let edges = vec![Edge::new("e1", "missing", "n1")];
        assert_eq!(
            validate_graph(&nodes, &edges),
            Err(GraphValidationError::DanglingEdge {
                edge_id: "e1".to_string(),
                node_id: "missing".to_string(),
            })
        );

        assert_eq!(
            validate_graph(&[task("t")], &[]),
            Err(GraphValidationError::MissingStartNode)
        );
        assert_eq!(
            validate_graph(&[Node::start("a"), Node::start("b")], &[]),
            Err(GraphValidationError::MultipleStartNodes(2))
        );
    }

    #[test]
    fn generated_ids_are_unique() {
        let first = generate_node_id();
        let second = generate_node_id();
        assert_ne!(first, second);
        assert!(first.starts_with("n-"));
    }

    #[test]
    fn connecting_edge_derives_id_from_endpoints() {
        let edge = Edge::connecting("a", "b");
        assert_eq!(edge.id, "ea-b");
        assert!(edge.touches("a"));
        assert!(edge.touches("b"));
        assert!(!edge.touches("c"));
    }
}
