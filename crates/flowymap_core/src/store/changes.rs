//! Change-lists accepted by the graph store.
//!
//! The canvas emits node/edge change-lists; node editors emit data patches
//! scoped to a single node id.

use crate::model::graph::{
    Edge, EdgeId, GraphValidationError, Node, NodeData, NodeId, NodeKind, Position, TodoItem,
};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Structural node change produced by the canvas.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeChange {
    /// Inserts a new node. The id must not exist yet.
    Add(Node),
    /// Removes a node and every edge touching it.
    Remove { id: NodeId },
    /// Moves a draggable node.
    Position { id: NodeId, position: Position },
    /// Replaces a node record wholesale (same id).
    Replace(Node),
}

/// Structural edge change produced by the canvas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdgeChange {
    Add(Edge),
    Remove { id: EdgeId },
    Replace(Edge),
}

/// Data edit scoped to one node, issued by node editor widgets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeDataPatch {
    /// Sets the title of a task or milestone.
    Title(String),
    Description(String),
    /// Explicit top-level done toggle of a task.
    TaskDone(bool),
    /// Replaces the checklist of a task.
    Todos(Vec<TodoItem>),
    /// Inserts an empty todo after `after`, or appends when `None`.
    AddTodo { after: Option<usize> },
    TodoText { index: usize, text: String },
    ToggleTodo { index: usize },
    RemoveTodo { index: usize },
}

/// Failure of a graph store operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// Referenced node, edge or todo does not exist. The store is unchanged.
    NotFound(String),
    /// Operation would break a graph invariant. The store is unchanged.
    Validation(GraphValidationError),
}

impl Display for GraphError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(target) => write!(f, "not found: {target}"),
            Self::Validation(err) => write!(f, "{err}"),
        }
    }
}

impl Error for GraphError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::NotFound(_) => None,
        }
    }
}

impl From<GraphValidationError> for GraphError {
    fn from(value: GraphValidationError) -> Self {
        Self::Validation(value)
    }
}

impl NodeDataPatch {
    /// Applies this patch to `data` of node `node_id`.
    ///
    /// Todo edits never touch the task's top-level `done` flag.
    pub fn apply(self, node_id: &str, data: &mut NodeData) -> Result<(), GraphError> {
        if let (Self::Title(title), NodeData::Milestone(milestone)) = (&self, &mut *data) {
            milestone.title = title.clone();
            return Ok(());
        }

        let task = match data {
            NodeData::Task(task) => task,
            NodeData::Start => {
                return Err(GraphValidationError::StartNodeImmutable(node_id.to_string()).into())
            }
            NodeData::Milestone(_) => {
                return Err(GraphValidationError::KindMismatch {
                    node_id: node_id.to_string(),
                    expected: NodeKind::Task,
                    actual: NodeKind::Milestone,
                }
                .into())
            }
        };

        match self {
            Self::Title(title) => task.title = title,
            Self::Description(description) => task.description = description,
            Self::TaskDone(done) => task.done = done,
            Self::Todos(todos) => task.todos = todos,
            Self::AddTodo { after } => {
                let at = match after {
                    Some(index) if index < task.todos.len() => index + 1,
                    Some(index) => return Err(todo_not_found(node_id, index)),
                    None => task.todos.len(),
                };
                task.todos.insert(at, TodoItem::default());
            }
            Self::TodoText { index, text } => {
                task.todos
                    .get_mut(index)
                    .ok_or_else(|| todo_not_found(node_id, index))?
                    .text = text;
            }
            Self::ToggleTodo { index } => {
                let todo = task
                    .todos
                    .get_mut(index)
                    .ok_or_else(|| todo_not_found(node_id, index))?;
                todo.done = !todo.done;
            }
            Self::RemoveTodo { index } => {
                if index >= task.todos.len() {
                    return Err(todo_not_found(node_id, index));
                }
                task.todos.remove(index);
            }
        }
        Ok(())
    }
}

fn todo_not_found(node_id: &str, index: usize) -> GraphError {
    GraphError::NotFound(format!("{node_id}/todos/{index}"))
}
