//! Graph walk for one workflow run.
//!
//! The engine owns a validated [`WorkflowGraph`] and one live [`Node`] per
//! definition. Execution starts at the Start node; after a node completes its
//! outputs are copied along every outbound connection and all distinct
//! targets are dispatched concurrently. A Loop node that asks to continue
//! jumps to its target instead, awaiting the whole re-run before the loop's
//! own dispatch returns, so iterations of one loop never overlap.
//!
//! There is no join barrier: a node re-runs on every arrival and reads
//! whatever its inputs hold at that point (last write wins). The End node is
//! the exception and waits until each declared output has arrived once.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use futures_util::future::{BoxFuture, try_join_all};
use serde_json::Value;
use weaving_types::graph::{Connection, GraphDefinition, NodeDefinition, NodeKind};

use super::graph::{GraphError, WorkflowGraph};
use super::hooks::{ExecutionHooks, NoopHooks};
use super::node::loop_node::LoopDirective;
use super::node::{Node, NodeContext, NodeError, NodePorts, NodeState, NodeValue};

// ---------------------------------------------------------------------------
// Status and errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    Idle,
    Running,
    Completed,
    Failed,
    Stopped,
}

impl fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EngineStatus::Idle => "idle",
            EngineStatus::Running => "running",
            EngineStatus::Completed => "completed",
            EngineStatus::Failed => "failed",
            EngineStatus::Stopped => "stopped",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("invalid configuration for node '{node_id}': {source}")]
    InvalidNode {
        node_id: String,
        #[source]
        source: NodeError,
    },

    #[error("invalid connection {connection}: {reason}")]
    InvalidConnection { connection: String, reason: String },

    #[error("node '{0}' is not part of this workflow")]
    UnknownNode(String),

    #[error("{node_type} node '{node_name}' ({node_id}) failed: {source}")]
    NodeFailed {
        node_id: String,
        node_type: NodeKind,
        node_name: String,
        #[source]
        source: NodeError,
    },

    #[error("workflow finished without reaching the end node (missing outputs: {missing:?})")]
    EndNotReached { missing: Vec<String> },

    #[error("workflow is already running")]
    AlreadyRunning,
}

impl EngineError {
    /// True when the run ended because a stop was requested.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, EngineError::NodeFailed { source, .. } if source.is_cancelled())
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

type NodeHandle = Arc<tokio::sync::Mutex<Node>>;

pub struct WorkflowEngine {
    graph: WorkflowGraph,
    nodes: DashMap<String, NodeHandle>,
    ports: HashMap<String, NodePorts>,
    ctx: NodeContext,
    hooks: Arc<dyn ExecutionHooks>,
    status: Mutex<EngineStatus>,
    running: AtomicBool,
    cleaned_up: AtomicBool,
    /// Jumps taken per Loop node during the current visit of that loop.
    loop_visits: DashMap<String, u32>,
}

impl fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("flow_name", &self.ctx.flow_name)
            .field("nodes", &self.nodes.len())
            .field("connections", &self.graph.connections().len())
            .field("status", &self.status())
            .finish()
    }
}

/// Clears the running flag however `execute` exits.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl WorkflowEngine {
    pub fn new(ctx: NodeContext) -> Self {
        Self {
            graph: WorkflowGraph::new(),
            nodes: DashMap::new(),
            ports: HashMap::new(),
            ctx,
            hooks: Arc::new(NoopHooks),
            status: Mutex::new(EngineStatus::Idle),
            running: AtomicBool::new(false),
            cleaned_up: AtomicBool::new(false),
            loop_visits: DashMap::new(),
        }
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn ExecutionHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Build every node and connection of a stored graph, then validate it.
    /// Any malformed node configuration is reported here, before a run starts.
    pub fn from_definition(definition: &GraphDefinition, ctx: NodeContext) -> Result<Self, EngineError> {
        let mut engine = Self::new(ctx);
        for node in &definition.nodes {
            engine.add_node(node.clone())?;
        }
        for connection in definition.connections() {
            engine.add_connection(connection)?;
        }
        engine.graph.validate()?;
        Ok(engine)
    }

    pub fn add_node(&mut self, definition: NodeDefinition) -> Result<(), EngineError> {
        let node = Node::from_definition(&definition).map_err(|source| EngineError::InvalidNode {
            node_id: definition.id.clone(),
            source,
        })?;
        let id = definition.id.clone();
        self.graph.add_node(definition)?;
        self.ports.insert(id.clone(), node.ports());
        self.nodes.insert(id, Arc::new(tokio::sync::Mutex::new(node)));
        Ok(())
    }

    /// Add a connection after checking that the source produces the named
    /// output and the target accepts the named input.
    pub fn add_connection(&mut self, connection: Connection) -> Result<(), EngineError> {
        if let (Some(source), Some(target)) = (
            self.ports.get(&connection.source_node_id),
            self.ports.get(&connection.target_node_id),
        ) {
            if !source.produces(&connection.source_output) {
                return Err(EngineError::InvalidConnection {
                    connection: connection.to_string(),
                    reason: format!(
                        "node '{}' has no output '{}'",
                        connection.source_node_id, connection.source_output
                    ),
                });
            }
            if !target.accepts(&connection.target_input) {
                return Err(EngineError::InvalidConnection {
                    connection: connection.to_string(),
                    reason: format!(
                        "node '{}' has no input '{}'",
                        connection.target_node_id, connection.target_input
                    ),
                });
            }
        }
        self.graph.add_connection(connection)?;
        Ok(())
    }

    pub fn graph(&self) -> &WorkflowGraph {
        &self.graph
    }

    pub fn context(&self) -> &NodeContext {
        &self.ctx
    }

    pub fn status(&self) -> EngineStatus {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_status(&self, status: EngineStatus) {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = status;
    }

    fn handle(&self, id: &str) -> Result<NodeHandle, EngineError> {
        self.nodes
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| EngineError::UnknownNode(id.to_string()))
    }

    // -----------------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------------

    /// Run the graph with `initial` as the Start node's inputs and return the
    /// End node's collected results.
    pub async fn execute(&self, initial: HashMap<String, Value>) -> Result<HashMap<String, Value>, EngineError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(EngineError::AlreadyRunning);
        }
        let _running = RunningGuard(&self.running);

        self.graph.validate()?;
        self.cleaned_up.store(false, Ordering::SeqCst);
        self.set_status(EngineStatus::Running);
        tracing::info!(flow = %self.ctx.flow_name, nodes = self.nodes.len(), "workflow execution started");

        let result = self.walk(initial).await;
        let status = match &result {
            Ok(_) => EngineStatus::Completed,
            Err(e) if e.is_cancelled() => EngineStatus::Stopped,
            Err(_) => EngineStatus::Failed,
        };
        self.set_status(status);
        match &result {
            Ok(_) => tracing::info!(flow = %self.ctx.flow_name, "workflow execution completed"),
            Err(e) => tracing::warn!(flow = %self.ctx.flow_name, status = %status, error = %e, "workflow execution ended"),
        }
        result
    }

    async fn walk(&self, initial: HashMap<String, Value>) -> Result<HashMap<String, Value>, EngineError> {
        let start_id = self
            .graph
            .start_node()
            .map(|n| n.id.clone())
            .ok_or(GraphError::EntryExitCount { kind: NodeKind::Start, count: 0 })?;
        let end_id = self
            .graph
            .end_node()
            .map(|n| n.id.clone())
            .ok_or(GraphError::EntryExitCount { kind: NodeKind::End, count: 0 })?;

        {
            let handle = self.handle(&start_id)?;
            let mut start = handle.lock().await;
            for (name, value) in initial {
                start.set_input(&name, value);
            }
        }

        self.execute_node(&start_id).await?;

        let handle = self.handle(&end_id)?;
        let end = handle.lock().await;
        if end.state() != NodeState::Completed {
            return Err(EngineError::EndNotReached {
                missing: end.missing_inputs(),
            });
        }
        Ok(end.final_results().cloned().unwrap_or_default())
    }

    /// Run one node, then whatever it leads to.
    fn execute_node<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<(), EngineError>> {
        Box::pin(async move {
            let handle = self.handle(id)?;
            let (directive, outputs) = {
                let mut node = handle.lock().await;
                let missing = node.missing_inputs();
                if !missing.is_empty() {
                    tracing::debug!(node_id = id, ?missing, "node waiting for inputs");
                    return Ok(());
                }
                node.prepare_revisit();
                self.run_node(&mut node).await?;
                (node.loop_directive(), node.outputs().clone())
            };

            if let Some(directive) = directive {
                if directive.continue_loop {
                    if let Some(target) = &directive.target_node_id {
                        return self.jump_to_loop_target(id, target, &directive, &outputs).await;
                    }
                    tracing::warn!(node_id = id, "loop asked to continue but has no target node");
                } else {
                    self.loop_visits.remove(id);
                }
            }

            self.propagate(id, &outputs).await
        })
    }

    async fn run_node(&self, node: &mut Node) -> Result<(), EngineError> {
        let outcome = self.dispatch(node).await;
        outcome.map_err(|source| EngineError::NodeFailed {
            node_id: node.id().to_string(),
            node_type: node.kind(),
            node_name: node.name().to_string(),
            source,
        })
    }

    async fn dispatch(&self, node: &mut Node) -> Result<(), NodeError> {
        if self.ctx.cancel.is_cancelled() {
            return Err(NodeError::Cancelled);
        }
        self.hooks.before_node(node).await?;
        tracing::debug!(node_id = node.id(), node_type = %node.kind(), "executing node");

        match node.execute(&self.ctx).await {
            Ok(()) => {
                self.hooks.after_node(node).await;
                Ok(())
            }
            Err(e) => {
                self.hooks.on_node_error(node, &e).await;
                Err(e)
            }
        }
    }

    async fn jump_to_loop_target(
        &self,
        loop_id: &str,
        target_id: &str,
        directive: &LoopDirective,
        outputs: &HashMap<String, NodeValue>,
    ) -> Result<(), EngineError> {
        let jumps = {
            let mut visits = self.loop_visits.entry(loop_id.to_string()).or_insert(0);
            *visits += 1;
            *visits
        };
        tracing::debug!(loop_id, target_id, jumps, "loop jumping back");

        {
            let handle = self.handle(target_id)?;
            let mut target = handle.lock().await;
            if !directive.reuse_target_node {
                self.rebuild(&mut target).await?;
            }
            for connection in self
                .graph
                .outbound(loop_id)
                .filter(|c| c.target_node_id == target_id)
            {
                copy_values(connection, outputs, &mut target);
            }
        }

        self.execute_node(target_id).await
    }

    /// Replace a node with a fresh instance of its definition, keeping the
    /// inputs it has received.
    async fn rebuild(&self, node: &mut Node) -> Result<(), EngineError> {
        let definition = self
            .graph
            .node(node.id())
            .ok_or_else(|| EngineError::UnknownNode(node.id().to_string()))?;
        let mut fresh = Node::from_definition(definition).map_err(|source| EngineError::InvalidNode {
            node_id: definition.id.clone(),
            source,
        })?;
        for (name, value) in node.inputs() {
            fresh.carry_input(name, value.clone());
        }
        node.cleanup().await;
        *node = fresh;
        Ok(())
    }

    async fn propagate(&self, source_id: &str, outputs: &HashMap<String, NodeValue>) -> Result<(), EngineError> {
        let mut targets: Vec<&str> = Vec::new();
        for connection in self.graph.outbound(source_id) {
            if self.graph.is_loop_back(connection) {
                continue;
            }
            {
                let handle = self.handle(&connection.target_node_id)?;
                let mut target = handle.lock().await;
                copy_values(connection, outputs, &mut target);
            }
            if !targets.contains(&connection.target_node_id.as_str()) {
                targets.push(&connection.target_node_id);
            }
        }

        try_join_all(targets.into_iter().map(|id| self.execute_node(id))).await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Release every node's resources. Only the first call after a run does
    /// anything.
    pub async fn cleanup(&self) {
        if self.cleaned_up.swap(true, Ordering::SeqCst) {
            return;
        }
        let handles: Vec<NodeHandle> = self.nodes.iter().map(|entry| entry.value().clone()).collect();
        for handle in handles {
            handle.lock().await.cleanup().await;
        }
        tracing::debug!(flow = %self.ctx.flow_name, "engine cleaned up");
    }

    /// Return every node to a fresh state, loop counters included.
    pub async fn reset(&self) {
        let handles: Vec<NodeHandle> = self.nodes.iter().map(|entry| entry.value().clone()).collect();
        for handle in handles {
            handle.lock().await.reset_state();
        }
        self.loop_visits.clear();
        self.cleaned_up.store(false, Ordering::SeqCst);
        self.set_status(EngineStatus::Idle);
    }
}

/// Copy what `connection` carries from the source outputs into `target`.
/// A pass-through connection carries every output; a named one carries its
/// output only when the source produced it.
fn copy_values(connection: &Connection, outputs: &HashMap<String, NodeValue>, target: &mut Node) {
    if connection.is_passthrough() {
        for (name, value) in outputs {
            target.carry_input(name, value.clone());
        }
    } else if let Some(value) = outputs.get(&connection.source_output) {
        target.set_input(&connection.target_input, value.clone());
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use serde_json::json;

    use super::*;
    use crate::test_support::MockLauncher;
    use crate::workflow::node::Capabilities;

    fn definition(value: Value) -> GraphDefinition {
        serde_json::from_value(value).unwrap()
    }

    fn engine(value: Value) -> WorkflowEngine {
        WorkflowEngine::from_definition(&definition(value), NodeContext::new("test flow", Capabilities::default()))
            .unwrap()
    }

    fn params(value: Value) -> HashMap<String, Value> {
        serde_json::from_value(value).unwrap()
    }

    /// Records every completed node and the `iteration` output it produced.
    #[derive(Default)]
    struct Recorder {
        completed: StdMutex<Vec<(String, Option<Value>)>>,
    }

    impl Recorder {
        fn runs_of(&self, id: &str) -> usize {
            self.completed.lock().unwrap().iter().filter(|(n, _)| n == id).count()
        }

        fn iterations_of(&self, id: &str) -> Vec<Value> {
            self.completed
                .lock()
                .unwrap()
                .iter()
                .filter(|(n, _)| n == id)
                .filter_map(|(_, it)| it.clone())
                .collect()
        }
    }

    impl ExecutionHooks for Recorder {
        fn before_node<'a>(&'a self, _node: &'a Node) -> BoxFuture<'a, Result<(), NodeError>> {
            Box::pin(async { Ok(()) })
        }

        fn after_node<'a>(&'a self, node: &'a Node) -> BoxFuture<'a, ()> {
            Box::pin(async move {
                let iteration = node.output("iteration").map(NodeValue::to_json);
                self.completed.lock().unwrap().push((node.id().to_string(), iteration));
            })
        }

        fn on_node_error<'a>(&'a self, _node: &'a Node, _error: &'a NodeError) -> BoxFuture<'a, ()> {
            Box::pin(async {})
        }
    }

    #[tokio::test]
    async fn start_parameters_flow_to_end() {
        let engine = engine(json!({
            "nodes": [
                {"id": "s", "type": "start", "data": {"inputs": [{"name": "keyword", "type": "string"}]}},
                {"id": "e", "type": "end", "data": {"outputs": [{"name": "keyword", "type": "string"}]}}
            ],
            "edges": [{"source": "s", "target": "e"}]
        }));

        let result = engine.execute(params(json!({"keyword": "rust"}))).await.unwrap();

        assert_eq!(result["keyword"], json!("rust"));
        assert_eq!(engine.status(), EngineStatus::Completed);
    }

    #[tokio::test]
    async fn condition_flags_reach_named_inputs() {
        let engine = engine(json!({
            "nodes": [
                {"id": "s", "type": "start", "data": {"inputs": [{"name": "price", "type": "number"}]}},
                {"id": "c", "type": "condition", "data": {"operator": ">", "compareValue": 10}},
                {"id": "e", "type": "end", "data": {"outputs": [
                    {"name": "expensive", "type": "boolean"},
                    {"name": "cheap", "type": "boolean"}
                ]}}
            ],
            "edges": [
                {"source": "s", "target": "c", "sourceHandle": "price", "targetHandle": "value"},
                {"source": "c", "target": "e", "sourceHandle": "true", "targetHandle": "expensive"},
                {"source": "c", "target": "e", "sourceHandle": "false", "targetHandle": "cheap"}
            ]
        }));

        let result = engine.execute(params(json!({"price": "25"}))).await.unwrap();

        assert_eq!(result["expensive"], json!(true));
        assert_eq!(result["cheap"], json!(false));
    }

    #[tokio::test]
    async fn loop_cap_bounds_iterations() {
        let recorder = Arc::new(Recorder::default());
        let engine = engine(json!({
            "nodes": [
                {"id": "s", "type": "start"},
                {"id": "body", "type": "condition", "data": {"value": 1, "operator": "==", "compareValue": 1}},
                {"id": "l", "type": "loop", "data": {"targetNodeId": "body", "maxIterations": 3, "condition": "true"}},
                {"id": "e", "type": "end", "data": {"outputs": [{"name": "iteration", "type": "number"}]}}
            ],
            "edges": [
                {"source": "s", "target": "body"},
                {"source": "body", "target": "l"},
                {"source": "l", "target": "body"},
                {"source": "l", "target": "e", "sourceHandle": "iteration", "targetHandle": "iteration"}
            ]
        }))
        .with_hooks(recorder.clone());

        let result = engine.execute(HashMap::new()).await.unwrap();

        assert_eq!(recorder.runs_of("body"), 3);
        assert_eq!(recorder.runs_of("l"), 3);
        assert_eq!(recorder.runs_of("e"), 1);
        assert_eq!(result["iteration"], json!(3));
    }

    fn nested_loops(reuse: bool) -> WorkflowEngine {
        engine(json!({
            "nodes": [
                {"id": "s", "type": "start"},
                {"id": "inner", "type": "loop", "data": {"maxIterations": 2}},
                {"id": "outer", "type": "loop", "data": {
                    "targetNodeId": "inner",
                    "maxIterations": 3,
                    "reuseTargetNode": reuse
                }},
                {"id": "e", "type": "end", "data": {"outputs": [{"name": "rounds", "type": "number"}]}}
            ],
            "edges": [
                {"source": "s", "target": "inner"},
                {"source": "inner", "target": "outer"},
                {"source": "outer", "target": "inner"},
                {"source": "outer", "target": "e", "sourceHandle": "iteration", "targetHandle": "rounds"}
            ]
        }))
    }

    #[tokio::test]
    async fn reused_target_keeps_its_counter() {
        let recorder = Arc::new(Recorder::default());
        let engine = nested_loops(true).with_hooks(recorder.clone());

        let result = engine.execute(HashMap::new()).await.unwrap();

        assert_eq!(recorder.iterations_of("inner"), vec![json!(1), json!(2), json!(3)]);
        assert_eq!(result["rounds"], json!(3));
    }

    #[tokio::test]
    async fn rebuilt_target_starts_counting_again() {
        let recorder = Arc::new(Recorder::default());
        let engine = nested_loops(false).with_hooks(recorder.clone());

        let result = engine.execute(HashMap::new()).await.unwrap();

        assert_eq!(recorder.iterations_of("inner"), vec![json!(1), json!(1), json!(1)]);
        assert_eq!(result["rounds"], json!(3));
    }

    #[test]
    fn cycle_without_loop_is_rejected_before_running() {
        let err = WorkflowEngine::from_definition(
            &definition(json!({
                "nodes": [
                    {"id": "s", "type": "start"},
                    {"id": "a", "type": "condition"},
                    {"id": "b", "type": "condition"},
                    {"id": "e", "type": "end"}
                ],
                "edges": [
                    {"source": "s", "target": "a"},
                    {"source": "a", "target": "b"},
                    {"source": "b", "target": "a"},
                    {"source": "b", "target": "e"}
                ]
            })),
            NodeContext::new("flow", Capabilities::default()),
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::Graph(GraphError::CycleDetected(_))));
    }

    #[test]
    fn undeclared_port_is_rejected() {
        let err = WorkflowEngine::from_definition(
            &definition(json!({
                "nodes": [
                    {"id": "s", "type": "start"},
                    {"id": "c", "type": "condition"},
                    {"id": "e", "type": "end"}
                ],
                "edges": [
                    {"source": "s", "target": "c"},
                    {"source": "c", "target": "e", "sourceHandle": "maybe"}
                ]
            })),
            NodeContext::new("flow", Capabilities::default()),
        )
        .unwrap_err();
        match err {
            EngineError::InvalidConnection { connection, reason } => {
                assert_eq!(connection, "c.maybe -> e.input");
                assert!(reason.contains("'maybe'"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn invalid_node_config_names_the_node() {
        let err = WorkflowEngine::from_definition(
            &definition(json!({
                "nodes": [
                    {"id": "s", "type": "start"},
                    {"id": "l", "type": "loop", "data": {"maxIterations": "many"}},
                    {"id": "e", "type": "end"}
                ]
            })),
            NodeContext::new("flow", Capabilities::default()),
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::InvalidNode { node_id, .. } if node_id == "l"));
    }

    #[tokio::test]
    async fn unsupported_operator_fails_with_node_identity() {
        let engine = engine(json!({
            "nodes": [
                {"id": "s", "type": "start"},
                {"id": "check", "type": "condition", "name": "Price check", "data": {"operator": "??"}},
                {"id": "e", "type": "end"}
            ],
            "edges": [{"source": "s", "target": "check"}, {"source": "check", "target": "e"}]
        }));

        let err = engine.execute(HashMap::new()).await.unwrap_err();

        assert!(!err.is_cancelled());
        assert!(err.to_string().starts_with("condition node 'Price check' (check) failed"));
        assert!(err.to_string().contains("??"));
        assert_eq!(engine.status(), EngineStatus::Failed);
    }

    #[tokio::test]
    async fn end_without_its_inputs_is_not_reached() {
        let engine = engine(json!({
            "nodes": [
                {"id": "s", "type": "start"},
                {"id": "e", "type": "end", "data": {"outputs": [{"name": "x", "type": "string"}]}}
            ],
            "edges": [{"source": "s", "target": "e"}]
        }));

        let err = engine.execute(HashMap::new()).await.unwrap_err();
        assert!(matches!(err, EngineError::EndNotReached { missing } if missing == vec!["x".to_string()]));
    }

    #[tokio::test]
    async fn end_waits_for_every_branch() {
        let recorder = Arc::new(Recorder::default());
        let engine = engine(json!({
            "nodes": [
                {"id": "s", "type": "start", "data": {"inputs": [
                    {"name": "a", "type": "number"},
                    {"name": "b", "type": "number"}
                ]}},
                {"id": "left", "type": "condition", "data": {"operator": "<", "compareValue": 10}},
                {"id": "right", "type": "condition", "data": {"operator": "<", "compareValue": 10}},
                {"id": "e", "type": "end", "data": {"outputs": [
                    {"name": "x", "type": "boolean"},
                    {"name": "y", "type": "boolean"}
                ]}}
            ],
            "edges": [
                {"source": "s", "target": "left", "sourceHandle": "a", "targetHandle": "value"},
                {"source": "s", "target": "right", "sourceHandle": "b", "targetHandle": "value"},
                {"source": "left", "target": "e", "sourceHandle": "true", "targetHandle": "x"},
                {"source": "right", "target": "e", "sourceHandle": "true", "targetHandle": "y"}
            ]
        }))
        .with_hooks(recorder.clone());

        let result = engine.execute(params(json!({"a": 3, "b": 30}))).await.unwrap();

        assert_eq!(result["x"], json!(true));
        assert_eq!(result["y"], json!(false));
        assert_eq!(recorder.runs_of("e"), 1);
    }

    #[tokio::test]
    async fn stop_before_start_reports_cancellation() {
        let engine = engine(json!({
            "nodes": [{"id": "s", "type": "start"}, {"id": "e", "type": "end"}],
            "edges": [{"source": "s", "target": "e"}]
        }));
        engine.context().cancel.cancel();

        let err = engine.execute(HashMap::new()).await.unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(engine.status(), EngineStatus::Stopped);
    }

    fn browser_flow(launcher: &Arc<MockLauncher>) -> WorkflowEngine {
        WorkflowEngine::from_definition(
            &definition(json!({
                "nodes": [
                    {"id": "s", "type": "start"},
                    {"id": "b", "type": "browser", "data": {
                        "url": "https://example.com",
                        "scripts": [{"type": "delay", "delay": 1000}]
                    }},
                    {"id": "e", "type": "end"}
                ],
                "edges": [{"source": "s", "target": "b"}, {"source": "b", "target": "e"}]
            })),
            NodeContext::new(
                "flow",
                Capabilities {
                    browser: Some(launcher.clone()),
                    ..Capabilities::default()
                },
            ),
        )
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn second_execute_while_running_is_rejected() {
        let launcher = MockLauncher::new();
        let engine = browser_flow(&launcher);

        let (first, second) = tokio::join!(engine.execute(HashMap::new()), engine.execute(HashMap::new()));

        assert!(first.is_ok());
        assert!(matches!(second, Err(EngineError::AlreadyRunning)));
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_twice_closes_the_session_once() {
        let launcher = MockLauncher::new();
        let engine = browser_flow(&launcher);
        engine.execute(HashMap::new()).await.unwrap();

        engine.cleanup().await;
        engine.cleanup().await;

        let sessions = launcher.sessions();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].close_count(), 1);
    }

    #[tokio::test]
    async fn reset_allows_a_fresh_run() {
        let engine = engine(json!({
            "nodes": [
                {"id": "s", "type": "start", "data": {"inputs": [{"name": "n", "type": "number"}]}},
                {"id": "e", "type": "end", "data": {"outputs": [{"name": "n", "type": "number"}]}}
            ],
            "edges": [{"source": "s", "target": "e"}]
        }));

        engine.execute(params(json!({"n": 1}))).await.unwrap();
        engine.reset().await;
        assert_eq!(engine.status(), EngineStatus::Idle);

        let result = engine.execute(params(json!({"n": 2}))).await.unwrap();
        assert_eq!(result["n"], json!(2));
    }
}
