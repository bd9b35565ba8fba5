//! Versioned graph document (storage and file artifact schema).
//!
//! # Responsibility
//! - Serialize a graph snapshot as `{version, nodes, edges}` UTF-8 JSON.
//! - Parse documents leniently at the field level (missing strings become
//!   empty, todo entries in string form become `{text, done: false}`) and
//!   strictly at the structural level (version, ids, endpoints).
//!
//! # Invariants
//! - Writers always emit version `"1"` and short node type names.
//! - Derived milestone counters and the transient `removing` tag are never
//!   written.
//! - A document that fails any check yields `GraphValidationError` and no
//!   partial graph.

use crate::model::graph::{
    validate_graph, Edge, GraphSnapshot, GraphValidationError, MilestoneData, Node, NodeData,
    NodeKind, Position, TaskData, TodoItem,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Schema version written by this build and the only one it reads.
pub const GRAPH_SCHEMA_VERSION: &str = "1";

#[derive(Debug, Serialize)]
struct DocumentOut<'a> {
    version: &'static str,
    nodes: Vec<NodeRecord>,
    edges: &'a [Edge],
}

#[derive(Debug, Deserialize)]
struct DocumentIn {
    #[serde(default)]
    version: Option<Value>,
    nodes: Vec<NodeRecord>,
    edges: Vec<Edge>,
}

#[derive(Debug, Serialize, Deserialize)]
struct NodeRecord {
    id: String,
    #[serde(rename = "type")]
    kind: NodeKind,
    #[serde(default)]
    position: Position,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    draggable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    deletable: Option<bool>,
    #[serde(default)]
    data: Value,
}

impl From<&Node> for NodeRecord {
    fn from(node: &Node) -> Self {
        let data = match &node.data {
            NodeData::Start => Value::Object(Map::new()),
            NodeData::Task(task) => json!({
                "title": task.title,
                "description": task.description,
                "done": task.done,
                "todos": task.todos,
            }),
            NodeData::Milestone(milestone) => json!({ "title": milestone.title }),
        };
        Self {
            id: node.id.clone(),
            kind: node.kind(),
            position: node.position,
            draggable: Some(node.draggable),
            deletable: Some(node.deletable),
            data,
        }
    }
}

impl From<NodeRecord> for Node {
    fn from(record: NodeRecord) -> Self {
        let data = match record.kind {
            NodeKind::Start => NodeData::Start,
            NodeKind::Task => NodeData::Task(TaskData {
                title: text_field(&record.data, "title"),
                description: text_field(&record.data, "description"),
                done: record.data.get("done").is_some_and(is_truthy),
                todos: normalize_todos(record.data.get("todos")),
            }),
            NodeKind::Milestone => NodeData::Milestone(MilestoneData {
                title: text_field(&record.data, "title"),
            }),
        };

        let mut node = Node::new(record.id, record.position, data);
        if node.kind() != NodeKind::Start {
            node.draggable = record.draggable.unwrap_or(true);
            node.deletable = record.deletable.unwrap_or(true);
        }
        node
    }
}

/// Serializes a snapshot as compact document text.
pub fn encode_graph(snapshot: &GraphSnapshot) -> Result<String, serde_json::Error> {
    serde_json::to_string(&document_out(snapshot))
}

/// Serializes a snapshot as indented document text for file export.
pub fn encode_graph_pretty(snapshot: &GraphSnapshot) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(&document_out(snapshot))
}

/// Parses and validates document text.
///
/// # Errors
/// - `Malformed` when the text is not JSON or lacks `nodes`/`edges`/`version`.
/// - `UnsupportedVersion` for any version other than `"1"`.
/// - Any graph invariant violation reported by `validate_graph`.
pub fn decode_graph(text: &str) -> Result<GraphSnapshot, GraphValidationError> {
    let document: DocumentIn = serde_json::from_str(text)
        .map_err(|err| GraphValidationError::Malformed(err.to_string()))?;

    match document.version {
        None => {
            return Err(GraphValidationError::Malformed(
                "missing field `version`".to_string(),
            ))
        }
        Some(version) if !is_supported_version(&version) => {
            return Err(GraphValidationError::UnsupportedVersion(version_label(
                &version,
            )))
        }
        Some(_) => {}
    }

    let nodes: Vec<Node> = document.nodes.into_iter().map(Node::from).collect();
    validate_graph(&nodes, &document.edges)?;
    Ok(GraphSnapshot::new(nodes, document.edges))
}

/// Normalizes any incoming todo payload to `{text, done}` entries.
///
/// Arrays map element-wise; a lone scalar becomes a single entry; a missing
/// or null payload yields no entries.
pub fn normalize_todos(raw: Option<&Value>) -> Vec<TodoItem> {
    match raw {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.iter().map(normalize_todo).collect(),
        Some(other) => vec![normalize_todo(other)],
    }
}

fn normalize_todo(item: &Value) -> TodoItem {
    match item {
        Value::String(text) => TodoItem::new(text.as_str()),
        Value::Object(_) => TodoItem {
            text: text_field(item, "text"),
            done: item.get("done").is_some_and(is_truthy),
        },
        Value::Null => TodoItem::default(),
        other => TodoItem::new(other.to_string()),
    }
}

fn document_out(snapshot: &GraphSnapshot) -> DocumentOut<'_> {
    DocumentOut {
        version: GRAPH_SCHEMA_VERSION,
        nodes: snapshot.nodes.iter().map(NodeRecord::from).collect(),
        edges: &snapshot.edges,
    }
}

fn is_supported_version(version: &Value) -> bool {
    match version {
        Value::String(text) => text.trim() == GRAPH_SCHEMA_VERSION,
        Value::Number(number) => number.as_u64() == Some(1),
        _ => false,
    }
}

fn version_label(version: &Value) -> String {
    match version {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn text_field(value: &Value, key: &str) -> String {
    match value.get(key) {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Number(number)) => number.to_string(),
        _ => String::new(),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0 && !n.is_nan()),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
