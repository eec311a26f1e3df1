//! Graph wire format for Weaving Flow workflows.
//!
//! A workflow is stored as the JSON the visual editor produces:
//! `{ "nodes": [{ "id", "type", "data" }], "edges": [{ "source", "target",
//! "sourceHandle", "targetHandle" }] }`. The engine builds its runtime graph
//! from a [`GraphDefinition`]; edges become [`Connection`]s.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Output port used when an edge carries no `sourceHandle`.
pub const DEFAULT_SOURCE_HANDLE: &str = "output";

/// Input port used when an edge carries no `targetHandle`.
pub const DEFAULT_TARGET_HANDLE: &str = "input";

// ---------------------------------------------------------------------------
// Graph definition
// ---------------------------------------------------------------------------

/// The persisted shape of a workflow graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphDefinition {
    #[serde(default)]
    pub nodes: Vec<NodeDefinition>,
    #[serde(default)]
    pub edges: Vec<EdgeDefinition>,
}

impl GraphDefinition {
    /// Parse a graph from its JSON text.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Derive the runtime connections from the edge list.
    pub fn connections(&self) -> Vec<Connection> {
        self.edges.iter().map(Connection::from).collect()
    }
}

/// The closed set of node types the engine can execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeKind {
    Start,
    End,
    Browser,
    Loop,
    Condition,
    Crawler,
    ScriptExecute,
}

impl NodeKind {
    /// The wire tag of this node kind (`"scriptExecute"`, `"loop"`, ...).
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Start => "start",
            NodeKind::End => "end",
            NodeKind::Browser => "browser",
            NodeKind::Loop => "loop",
            NodeKind::Condition => "condition",
            NodeKind::Crawler => "crawler",
            NodeKind::ScriptExecute => "scriptExecute",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One node as stored in the graph. `data` is the node's configuration and
/// is interpreted according to `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDefinition {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl NodeDefinition {
    /// Human-readable name: explicit `name`, then `data.label`, then the kind tag.
    pub fn display_name(&self) -> String {
        if let Some(name) = self.name.as_deref().filter(|n| !n.is_empty()) {
            return name.to_string();
        }
        self.data
            .get("label")
            .and_then(|v| v.as_str())
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| self.kind.as_str().to_string())
    }
}

/// One edge as stored in the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// A directed link from one node's output slot to another node's input slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Connection {
    pub source_node_id: String,
    pub source_output: String,
    pub target_node_id: String,
    pub target_input: String,
}

impl Connection {
    pub fn new(
        source_node_id: impl Into<String>,
        source_output: impl Into<String>,
        target_node_id: impl Into<String>,
        target_input: impl Into<String>,
    ) -> Self {
        Self {
            source_node_id: source_node_id.into(),
            source_output: source_output.into(),
            target_node_id: target_node_id.into(),
            target_input: target_input.into(),
        }
    }

    /// True when this connection uses the untyped `output -> input` ports,
    /// which carry every output of the source node.
    pub fn is_passthrough(&self) -> bool {
        self.source_output == DEFAULT_SOURCE_HANDLE && self.target_input == DEFAULT_TARGET_HANDLE
    }
}

impl From<&EdgeDefinition> for Connection {
    fn from(edge: &EdgeDefinition) -> Self {
        let source_output = edge
            .source_handle
            .as_deref()
            .filter(|h| !h.is_empty())
            .unwrap_or(DEFAULT_SOURCE_HANDLE);
        let target_input = edge
            .target_handle
            .as_deref()
            .filter(|h| !h.is_empty())
            .unwrap_or(DEFAULT_TARGET_HANDLE);
        Connection::new(&edge.source, source_output, &edge.target, target_input)
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} -> {}.{}",
            self.source_node_id, self.source_output, self.target_node_id, self.target_input
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
