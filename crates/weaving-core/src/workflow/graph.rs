//! Structural view of a workflow: node definitions, connections and the
//! checks that must pass before anything runs.
//!
//! Cycle detection uses `petgraph`: the connections form a `DiGraph` and
//! `toposort` fails on a cycle. Edges from a Loop node back to its own target
//! are the one sanctioned way to revisit nodes and are left out of that graph.

use std::collections::HashMap;

use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use serde_json::Value;
use weaving_types::graph::{Connection, GraphDefinition, NodeDefinition, NodeKind};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GraphError {
    #[error("duplicate node id '{0}'")]
    DuplicateNode(String),

    #[error("connection {connection} references unknown node '{node_id}'")]
    UnknownNode { connection: String, node_id: String },

    #[error("workflow must contain exactly one {kind} node, found {count}")]
    EntryExitCount { kind: NodeKind, count: usize },

    #[error("loop node '{loop_id}' targets unknown node '{target}'")]
    UnknownLoopTarget { loop_id: String, target: String },

    #[error("cycle detected involving node '{0}'; revisiting nodes requires a loop node")]
    CycleDetected(String),
}

// ---------------------------------------------------------------------------
// WorkflowGraph
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct WorkflowGraph {
    nodes: Vec<NodeDefinition>,
    index: HashMap<String, usize>,
    connections: Vec<Connection>,
}

impl WorkflowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build and validate a graph from its persisted definition.
    pub fn from_definition(definition: &GraphDefinition) -> Result<Self, GraphError> {
        let mut graph = Self::new();
        for node in &definition.nodes {
            graph.add_node(node.clone())?;
        }
        for connection in definition.connections() {
            graph.add_connection(connection)?;
        }
        graph.validate()?;
        Ok(graph)
    }

    pub fn add_node(&mut self, node: NodeDefinition) -> Result<(), GraphError> {
        if self.index.contains_key(&node.id) {
            return Err(GraphError::DuplicateNode(node.id));
        }
        self.index.insert(node.id.clone(), self.nodes.len());
        self.nodes.push(node);
        Ok(())
    }

    /// Both endpoints must already be present.
    pub fn add_connection(&mut self, connection: Connection) -> Result<(), GraphError> {
        for node_id in [&connection.source_node_id, &connection.target_node_id] {
            if !self.index.contains_key(node_id.as_str()) {
                return Err(GraphError::UnknownNode {
                    connection: connection.to_string(),
                    node_id: node_id.clone(),
                });
            }
        }
        self.connections.push(connection);
        Ok(())
    }

    pub fn node(&self, id: &str) -> Option<&NodeDefinition> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn nodes(&self) -> &[NodeDefinition] {
        &self.nodes
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub fn outbound<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a Connection> + 'a {
        self.connections
            .iter()
            .filter(move |c| c.source_node_id == node_id)
    }

    pub fn inbound<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a Connection> + 'a {
        self.connections
            .iter()
            .filter(move |c| c.target_node_id == node_id)
    }

    pub fn start_node(&self) -> Option<&NodeDefinition> {
        self.nodes.iter().find(|n| n.kind == NodeKind::Start)
    }

    pub fn end_node(&self) -> Option<&NodeDefinition> {
        self.nodes.iter().find(|n| n.kind == NodeKind::End)
    }

    /// The configured `targetNodeId` of a Loop node.
    pub fn loop_target(&self, loop_id: &str) -> Option<&str> {
        let node = self.node(loop_id).filter(|n| n.kind == NodeKind::Loop)?;
        node.data
            .get("targetNodeId")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
    }

    /// True for an edge from a Loop node to its own jump target.
    pub fn is_loop_back(&self, connection: &Connection) -> bool {
        self.loop_target(&connection.source_node_id) == Some(connection.target_node_id.as_str())
    }

    pub fn validate(&self) -> Result<(), GraphError> {
        for kind in [NodeKind::Start, NodeKind::End] {
            let count = self.nodes.iter().filter(|n| n.kind == kind).count();
            if count != 1 {
                return Err(GraphError::EntryExitCount { kind, count });
            }
        }

        for node in self.nodes.iter().filter(|n| n.kind == NodeKind::Loop) {
            if let Some(target) = self.loop_target(&node.id)
                && !self.index.contains_key(target)
            {
                return Err(GraphError::UnknownLoopTarget {
                    loop_id: node.id.clone(),
                    target: target.to_string(),
                });
            }
        }

        self.check_acyclic()
    }

    fn check_acyclic(&self) -> Result<(), GraphError> {
        let mut graph = DiGraph::<&str, ()>::new();
        let indices: Vec<_> = self.nodes.iter().map(|n| graph.add_node(n.id.as_str())).collect();

        for connection in &self.connections {
            if self.is_loop_back(connection) {
                continue;
            }
            let from = indices[self.index[connection.source_node_id.as_str()]];
            let to = indices[self.index[connection.target_node_id.as_str()]];
            graph.add_edge(from, to, ());
        }

        toposort(&graph, None).map_err(|cycle| GraphError::CycleDetected(graph[cycle.node_id()].to_string()))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
