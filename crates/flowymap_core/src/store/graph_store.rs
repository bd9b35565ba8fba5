//! Graph Store: sole owner of the canonical node/edge collections.
//!
//! # Responsibility
//! - Apply structural change-lists, connections and node data patches.
//! - Enforce graph invariants on every commit.
//! - Publish the committed snapshot on the Change Bus before returning.
//!
//! # Invariants
//! - Every mutation is staged on a copy and committed only when the staged
//!   graph validates; a failing call leaves the store untouched and silent.
//! - Removing a node removes every edge that touches it in the same commit.
//! - The start node can be neither added, removed nor re-typed by edits.
//! - A call that changes nothing commits nothing and publishes nothing.

use crate::bus::change_bus::ChangeBus;
use crate::model::graph::{
    generate_node_id, validate_graph, Edge, GraphSnapshot, GraphValidationError, Node, NodeData,
    NodeId, NodeKind, Position, TodoItem, DEFAULT_NEW_NODE_POSITION,
};
use crate::store::changes::{EdgeChange, GraphError, NodeChange, NodeDataPatch};
use log::{debug, info, warn};
use std::collections::HashSet;
use std::rc::Rc;

pub type GraphResult<T> = Result<T, GraphError>;

/// Counts reported by a hard node removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RemovalSummary {
    pub nodes: usize,
    pub edges: usize,
}

impl RemovalSummary {
    pub fn is_empty(&self) -> bool {
        self.nodes == 0 && self.edges == 0
    }
}

/// In-memory canonical graph with change publication.
pub struct GraphStore {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    bus: ChangeBus,
    revision: u64,
}

impl GraphStore {
    /// Creates a store holding the default single-start-node graph.
    ///
    /// Construction does not publish.
    pub fn new(bus: ChangeBus) -> Self {
        let GraphSnapshot { nodes, edges } = GraphSnapshot::default_graph();
        Self {
            nodes,
            edges,
            bus,
            revision: 0,
        }
    }

    pub fn bus(&self) -> &ChangeBus {
        &self.bus
    }

    /// Number of committed mutations since construction.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Returns an owned copy of the current graph.
    pub fn snapshot(&self) -> GraphSnapshot {
        GraphSnapshot::new(self.nodes.clone(), self.edges.clone())
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|node| node.id == id)
    }

    /// Applies a canvas node change-list atomically.
    ///
    /// Changes naming unknown ids are skipped. Removal and position changes
    /// on nodes that are not deletable/draggable are skipped.
    ///
    /// # Errors
    /// - `Validation` when an added node duplicates an id, adds a start node,
    ///   or a replacement changes the start node's kind.
    pub fn apply_node_changes(&mut self, changes: Vec<NodeChange>) -> GraphResult<()> {
        let mut nodes = self.nodes.clone();
        let mut edges = self.edges.clone();
        let mut changed = false;

        for change in changes {
            match change {
                NodeChange::Add(node) => {
                    if node.kind() == NodeKind::Start {
                        return Err(GraphValidationError::StartNodeImmutable(node.id).into());
                    }
                    if nodes.iter().any(|existing| existing.id == node.id) {
                        return Err(GraphValidationError::DuplicateNodeId(node.id).into());
                    }
                    nodes.push(node);
                    changed = true;
                }
                NodeChange::Remove { id } => {
                    let Some(index) = nodes.iter().position(|node| node.id == id) else {
                        debug!("event=node_remove module=store status=skip reason=not_found");
                        continue;
                    };
                    if !nodes[index].deletable {
                        warn!(
                            "event=node_remove module=store status=skip node_id={} reason=not_deletable",
                            id
                        );
                        continue;
                    }
                    nodes.remove(index);
                    edges.retain(|edge| !edge.touches(&id));
                    changed = true;
                }
                NodeChange::Position { id, position } => {
                    match nodes.iter_mut().find(|node| node.id == id) {
                        Some(node) if node.draggable => {
                            node.position = position;
                            changed = true;
                        }
                        Some(_) => debug!(
                            "event=node_move module=store status=skip node_id={} reason=not_draggable",
                            id
                        ),
                        None => debug!("event=node_move module=store status=skip reason=not_found"),
                    }
                }
                NodeChange::Replace(replacement) => {
                    let Some(node) = nodes.iter_mut().find(|node| node.id == replacement.id)
                    else {
                        continue;
                    };
                    let touches_start = node.kind() == NodeKind::Start
                        || replacement.kind() == NodeKind::Start;
                    if touches_start && node.kind() != replacement.kind() {
                        return Err(
                            GraphValidationError::StartNodeImmutable(replacement.id).into()
                        );
                    }
                    *node = normalize_node(replacement);
                    changed = true;
                }
            }
        }

        if !changed {
            return Ok(());
        }
        self.stage(nodes, edges, "apply_node_changes")
    }

    /// Applies a canvas edge change-list atomically.
    ///
    /// # Errors
    /// - `Validation` for duplicate edge ids or endpoints naming unknown nodes.
    pub fn apply_edge_changes(&mut self, changes: Vec<EdgeChange>) -> GraphResult<()> {
        let mut edges = self.edges.clone();
        let mut changed = false;

        for change in changes {
            match change {
                EdgeChange::Add(edge) => {
                    if edges.iter().any(|existing| existing.id == edge.id) {
                        return Err(GraphValidationError::DuplicateEdgeId(edge.id).into());
                    }
                    edges.push(edge);
                    changed = true;
                }
                EdgeChange::Remove { id } => {
                    let before = edges.len();
                    edges.retain(|edge| edge.id != id);
                    changed |= edges.len() != before;
                }
                EdgeChange::Replace(replacement) => {
                    if let Some(edge) = edges.iter_mut().find(|edge| edge.id == replacement.id) {
                        *edge = replacement;
                        changed = true;
                    }
                }
            }
        }

        if !changed {
            return Ok(());
        }
        let nodes = self.nodes.clone();
        self.stage(nodes, edges, "apply_edge_changes")
    }

    /// Connects two existing nodes and returns the edge.
    ///
    /// Connecting an already connected `(source, target)` pair returns the
    /// existing edge without committing.
    ///
    /// # Errors
    /// - `NotFound` when either endpoint is absent.
    pub fn connect(&mut self, source: &str, target: &str) -> GraphResult<Edge> {
        for endpoint in [source, target] {
            if self.node(endpoint).is_none() {
                debug!("event=graph_connect module=store status=skip reason=not_found");
                return Err(GraphError::NotFound(endpoint.to_string()));
            }
        }

        if let Some(existing) = self
            .edges
            .iter()
            .find(|edge| edge.source == source && edge.target == target)
        {
            return Ok(existing.clone());
        }

        let mut edge = Edge::connecting(source, target);
        let base_id = edge.id.clone();
        let mut suffix = 2;
        while self.edges.iter().any(|existing| existing.id == edge.id) {
            edge.id = format!("{base_id}-{suffix}");
            suffix += 1;
        }

        let mut edges = self.edges.clone();
        edges.push(edge.clone());
        let nodes = self.nodes.clone();
        self.stage(nodes, edges, "connect")?;
        Ok(edge)
    }

    /// Replaces the whole graph after validating it.
    ///
    /// Used by import and restore. Start nodes are re-pinned and transient
    /// removal tags are cleared before validation.
    pub fn replace_all(
        &mut self,
        nodes: Vec<Node>,
        edges: Vec<Edge>,
    ) -> Result<(), GraphValidationError> {
        let nodes: Vec<Node> = nodes.into_iter().map(normalize_node).collect();
        validate_graph(&nodes, &edges)?;
        self.commit(nodes, edges, "replace_all");
        Ok(())
    }

    /// Replaces the graph with the default single-start-node graph.
    pub fn reset(&mut self) {
        let GraphSnapshot { nodes, edges } = GraphSnapshot::default_graph();
        self.commit(nodes, edges, "reset");
    }

    /// Adds an empty task or milestone node and returns its generated id.
    pub fn add_node(&mut self, kind: NodeKind, position: Option<Position>) -> GraphResult<NodeId> {
        if kind == NodeKind::Start {
            return Err(GraphValidationError::StartNodeImmutable(generate_node_id()).into());
        }
        let node = Node::new(
            generate_node_id(),
            position.unwrap_or(DEFAULT_NEW_NODE_POSITION),
            NodeData::empty(kind),
        );
        let id = node.id.clone();
        self.apply_node_changes(vec![NodeChange::Add(node)])?;
        Ok(id)
    }

    /// Patches the data of one node and publishes, even when the patched
    /// value equals the previous one.
    pub fn patch_node_data(&mut self, id: &str, patch: NodeDataPatch) -> GraphResult<()> {
        let index = self
            .nodes
            .iter()
            .position(|node| node.id == id)
            .ok_or_else(|| GraphError::NotFound(id.to_string()))?;

        let mut data = self.nodes[index].data.clone();
        patch.apply(id, &mut data)?;

        let mut nodes = self.nodes.clone();
        nodes[index].data = data;
        let edges = self.edges.clone();
        self.stage(nodes, edges, "patch_node_data")
    }

    pub fn set_title(&mut self, id: &str, title: impl Into<String>) -> GraphResult<()> {
        self.patch_node_data(id, NodeDataPatch::Title(title.into()))
    }

    pub fn set_description(&mut self, id: &str, description: impl Into<String>) -> GraphResult<()> {
        self.patch_node_data(id, NodeDataPatch::Description(description.into()))
    }

    /// Sets a task's top-level done flag. This is the only path that changes it.
    pub fn set_task_done(&mut self, id: &str, done: bool) -> GraphResult<()> {
        self.patch_node_data(id, NodeDataPatch::TaskDone(done))
    }

    pub fn set_todos(&mut self, id: &str, todos: Vec<TodoItem>) -> GraphResult<()> {
        self.patch_node_data(id, NodeDataPatch::Todos(todos))
    }

    pub fn add_todo(&mut self, id: &str, after: Option<usize>) -> GraphResult<()> {
        self.patch_node_data(id, NodeDataPatch::AddTodo { after })
    }

    pub fn set_todo_text(&mut self, id: &str, index: usize, text: impl Into<String>) -> GraphResult<()> {
        self.patch_node_data(
            id,
            NodeDataPatch::TodoText {
                index,
                text: text.into(),
            },
        )
    }

    pub fn toggle_todo(&mut self, id: &str, index: usize) -> GraphResult<()> {
        self.patch_node_data(id, NodeDataPatch::ToggleTodo { index })
    }

    pub fn remove_todo(&mut self, id: &str, index: usize) -> GraphResult<()> {
        self.patch_node_data(id, NodeDataPatch::RemoveTodo { index })
    }

    /// Tags deletable nodes from `ids` as pending removal.
    ///
    /// Returns the ids that are present and deletable (already tagged ones
    /// included). Publishes only when at least one tag flipped.
    pub fn mark_removing(&mut self, ids: &[NodeId]) -> Vec<NodeId> {
        let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let mut accepted = Vec::new();
        let mut nodes = self.nodes.clone();
        let mut changed = false;

        for node in nodes.iter_mut().filter(|node| wanted.contains(node.id.as_str())) {
            if !node.deletable {
                warn!(
                    "event=node_mark_removing module=store status=skip node_id={} reason=not_deletable",
                    node.id
                );
                continue;
            }
            changed |= !node.removing;
            node.removing = true;
            accepted.push(node.id.clone());
        }

        if changed {
            let edges = self.edges.clone();
            self.commit(nodes, edges, "mark_removing");
        }
        accepted
    }

    /// Hard-removes deletable nodes from `ids` plus every edge touching them.
    ///
    /// Unknown ids are ignored. Publishes once when anything was removed.
    pub fn remove_nodes(&mut self, ids: &[NodeId]) -> RemovalSummary {
        let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let removed: HashSet<NodeId> = self
            .nodes
            .iter()
            .filter(|node| node.deletable && wanted.contains(node.id.as_str()))
            .map(|node| node.id.clone())
            .collect();
        if removed.is_empty() {
            return RemovalSummary::default();
        }

        let nodes: Vec<Node> = self
            .nodes
            .iter()
            .filter(|node| !removed.contains(&node.id))
            .cloned()
            .collect();
        let edges: Vec<Edge> = self
            .edges
            .iter()
            .filter(|edge| !removed.contains(&edge.source) && !removed.contains(&edge.target))
            .cloned()
            .collect();

        let summary = RemovalSummary {
            nodes: self.nodes.len() - nodes.len(),
            edges: self.edges.len() - edges.len(),
        };
        self.commit(nodes, edges, "remove_nodes");
        summary
    }

    fn stage(&mut self, nodes: Vec<Node>, edges: Vec<Edge>, operation: &str) -> GraphResult<()> {
        if let Err(err) = validate_graph(&nodes, &edges) {
            warn!(
                "event=graph_commit module=store status=error operation={} error={}",
                operation, err
            );
            return Err(err.into());
        }
        self.commit(nodes, edges, operation);
        Ok(())
    }

    fn commit(&mut self, nodes: Vec<Node>, edges: Vec<Edge>, operation: &str) {
        self.nodes = nodes;
        self.edges = edges;
        self.revision += 1;
        info!(
            "event=graph_commit module=store status=ok operation={} revision={} nodes={} edges={}",
            operation,
            self.revision,
            self.nodes.len(),
            self.edges.len()
        );
        self.bus.emit(Rc::new(self.snapshot()));
    }
}

fn normalize_node(mut node: Node) -> Node {
    if node.kind() == NodeKind::Start {
        node.draggable = false;
        node.deletable = false;
    }
    node.removing = false;
    node
}
