//! Workflow nodes: the closed set of node types and their shared contract.
//!
//! A [`Node`] owns its identity, its input/output slots and its lifecycle
//! state; the per-type behaviour lives in [`NodeVariant`]. The engine never
//! dispatches on anything but the variant tag.
//!
//! Lifecycle: `Pending -> Running -> {Completed | Failed}`. A node only starts
//! from `Pending`; the engine moves a completed node back to `Pending` (keeping
//! its inputs) before it runs it again.

pub mod browser;
pub mod condition;
pub mod crawler;
pub mod end;
pub mod loop_node;
pub mod script_execute;
pub mod start;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;
use weaving_types::graph::{DEFAULT_SOURCE_HANDLE, DEFAULT_TARGET_HANDLE, NodeDefinition, NodeKind};

use crate::browser::{BrowserError, BrowserLauncher, PageHandle};
use crate::notify::Notifier;
use crate::workflow::script::ScriptError;

use self::browser::BrowserNode;
use self::condition::ConditionNode;
use self::crawler::CrawlerNode;
use self::end::EndNode;
use self::loop_node::{LoopDirective, LoopNode};
use self::script_execute::ScriptExecuteNode;
use self::start::StartNode;

// ---------------------------------------------------------------------------
// Slot values
// ---------------------------------------------------------------------------

/// A value held in an input or output slot.
///
/// Most values are JSON; a Browser node additionally publishes live page
/// handles that a ScriptExecute node can drive.
#[derive(Clone)]
pub enum NodeValue {
    Json(Value),
    Page {
        handle: Arc<dyn PageHandle>,
        /// URL of the page when it was published.
        url: String,
    },
}

impl NodeValue {
    pub fn page(handle: Arc<dyn PageHandle>, url: impl Into<String>) -> Self {
        NodeValue::Page {
            handle,
            url: url.into(),
        }
    }

    /// JSON rendering for logs and results. Pages render as a descriptor.
    pub fn to_json(&self) -> Value {
        match self {
            NodeValue::Json(v) => v.clone(),
            NodeValue::Page { url, .. } => json!({ "kind": "page", "url": url }),
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            NodeValue::Json(v) => Some(v),
            NodeValue::Page { .. } => None,
        }
    }

    pub fn as_page(&self) -> Option<&Arc<dyn PageHandle>> {
        match self {
            NodeValue::Page { handle, .. } => Some(handle),
            NodeValue::Json(_) => None,
        }
    }
}

impl From<Value> for NodeValue {
    fn from(value: Value) -> Self {
        NodeValue::Json(value)
    }
}

impl fmt::Debug for NodeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeValue::Json(v) => write!(f, "Json({v})"),
            NodeValue::Page { url, .. } => write!(f, "Page({url})"),
        }
    }
}

/// Input and output slots of one node. Reading a missing slot yields `None`.
#[derive(Debug, Clone, Default)]
pub struct Slots {
    pub inputs: HashMap<String, NodeValue>,
    pub outputs: HashMap<String, NodeValue>,
}

impl Slots {
    pub fn input(&self, name: &str) -> Option<&NodeValue> {
        self.inputs.get(name)
    }

    /// The input as JSON; page handles read as absent.
    pub fn input_json(&self, name: &str) -> Option<&Value> {
        self.inputs.get(name).and_then(NodeValue::as_json)
    }

    /// A string input, ignoring empty strings.
    pub fn input_str(&self, name: &str) -> Option<&str> {
        self.input_json(name)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    pub fn set_output(&mut self, name: &str, value: impl Into<NodeValue>) {
        self.outputs.insert(name.to_string(), value.into());
    }

    fn to_json(map: &HashMap<String, NodeValue>) -> Value {
        let object: Map<String, Value> = map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect();
        Value::Object(object)
    }
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Pending,
    Running,
    Completed,
    Failed,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NodeState::Pending => "pending",
            NodeState::Running => "running",
            NodeState::Completed => "completed",
            NodeState::Failed => "failed",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error(transparent)]
    Browser(#[from] BrowserError),

    #[error("execution cancelled")]
    Cancelled,

    #[error("node cannot start from state '{0}'")]
    InvalidState(NodeState),

    #[error("{0}")]
    Failed(String),
}

impl NodeError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, NodeError::Cancelled | NodeError::Script(ScriptError::Cancelled))
    }
}

// ---------------------------------------------------------------------------
// Execution context
// ---------------------------------------------------------------------------

/// Collaborators available to nodes while they run.
#[derive(Clone, Default)]
pub struct Capabilities {
    pub browser: Option<Arc<dyn BrowserLauncher>>,
    pub notifier: Option<Arc<dyn Notifier>>,
    /// Force sessions headless (`true`) or headed (`false`).
    pub headless_override: Option<bool>,
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capabilities")
            .field("browser", &self.browser.is_some())
            .field("notifier", &self.notifier.is_some())
            .field("headless_override", &self.headless_override)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct NodeContext {
    /// Display name of the workflow, used in notifications.
    pub flow_name: String,
    pub capabilities: Capabilities,
    pub cancel: CancellationToken,
}

impl NodeContext {
    pub fn new(flow_name: impl Into<String>, capabilities: Capabilities) -> Self {
        Self {
            flow_name: flow_name.into(),
            capabilities,
            cancel: CancellationToken::new(),
        }
    }
}

/// What a variant sees of its node while executing.
pub struct ExecEnv<'a> {
    pub node_id: &'a str,
    pub node_name: &'a str,
    pub ctx: &'a NodeContext,
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// Per-type state and behaviour.
#[derive(Debug)]
pub enum NodeVariant {
    Start(StartNode),
    End(EndNode),
    Browser(BrowserNode),
    Loop(LoopNode),
    Condition(ConditionNode),
    Crawler(CrawlerNode),
    ScriptExecute(ScriptExecuteNode),
}

impl NodeVariant {
    fn input_ports(&self) -> Vec<&str> {
        match self {
            NodeVariant::Start(n) => n.ports(),
            NodeVariant::End(n) => n.ports(),
            NodeVariant::Browser(_) => browser::INPUTS.to_vec(),
            NodeVariant::Loop(_) => loop_node::INPUTS.to_vec(),
            NodeVariant::Condition(_) => condition::INPUTS.to_vec(),
            NodeVariant::Crawler(_) => crawler::INPUTS.to_vec(),
            NodeVariant::ScriptExecute(_) => script_execute::INPUTS.to_vec(),
        }
    }

    fn output_ports(&self) -> Vec<&str> {
        match self {
            NodeVariant::Start(n) => n.ports(),
            NodeVariant::End(n) => n.ports(),
            NodeVariant::Browser(_) => browser::OUTPUTS.to_vec(),
            NodeVariant::Loop(_) => loop_node::OUTPUTS.to_vec(),
            NodeVariant::Condition(_) => condition::OUTPUTS.to_vec(),
            NodeVariant::Crawler(_) => crawler::OUTPUTS.to_vec(),
            NodeVariant::ScriptExecute(_) => script_execute::OUTPUTS.to_vec(),
        }
    }
}

/// Port names a node declares. The universal `input`/`output` handles are
/// always accepted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodePorts {
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

impl NodePorts {
    pub fn accepts(&self, name: &str) -> bool {
        name == DEFAULT_TARGET_HANDLE || self.inputs.iter().any(|p| p == name)
    }

    pub fn produces(&self, name: &str) -> bool {
        name == DEFAULT_SOURCE_HANDLE || self.outputs.iter().any(|p| p == name)
    }
}

#[derive(Debug)]
pub struct Node {
    id: String,
    name: String,
    kind: NodeKind,
    slots: Slots,
    state: NodeState,
    variant: NodeVariant,
}

impl Node {
    /// Build a node from its graph definition. Malformed configuration
    /// (including an invalid pre-action guard) is rejected here.
    pub fn from_definition(def: &NodeDefinition) -> Result<Self, NodeError> {
        let variant = match def.kind {
            NodeKind::Start => NodeVariant::Start(StartNode::new(parse_config(def)?)),
            NodeKind::End => NodeVariant::End(EndNode::new(parse_config(def)?)),
            NodeKind::Browser => NodeVariant::Browser(BrowserNode::new(parse_config(def)?)?),
            NodeKind::Loop => NodeVariant::Loop(LoopNode::new(parse_config(def)?)),
            NodeKind::Condition => NodeVariant::Condition(ConditionNode::new(parse_config(def)?)),
            NodeKind::Crawler => NodeVariant::Crawler(CrawlerNode::new(parse_config(def)?)),
            NodeKind::ScriptExecute => {
                NodeVariant::ScriptExecute(ScriptExecuteNode::new(parse_config(def)?))
            }
        };
        Ok(Self {
            id: def.id.clone(),
            name: def.display_name(),
            kind: def.kind,
            slots: Slots::default(),
            state: NodeState::Pending,
            variant,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn variant(&self) -> &NodeVariant {
        &self.variant
    }

    pub fn ports(&self) -> NodePorts {
        NodePorts {
            inputs: self.variant.input_ports().into_iter().map(str::to_string).collect(),
            outputs: self.variant.output_ports().into_iter().map(str::to_string).collect(),
        }
    }

    pub fn accepts_input(&self, name: &str) -> bool {
        name == DEFAULT_TARGET_HANDLE || self.variant.input_ports().contains(&name)
    }

    pub fn produces_output(&self, name: &str) -> bool {
        name == DEFAULT_SOURCE_HANDLE || self.variant.output_ports().contains(&name)
    }

    /// Store an input value. Unknown names are kept (and logged) so that
    /// loosely wired graphs still run.
    pub fn set_input(&mut self, name: &str, value: impl Into<NodeValue>) {
        if !self.accepts_input(name) {
            tracing::warn!(node_id = %self.id, input = name, "input not declared by node type");
        }
        self.slots.inputs.insert(name.to_string(), value.into());
    }

    /// Store an input without checking the name. Pass-through connections
    /// carry every output of their source, declared by this node or not.
    pub fn carry_input(&mut self, name: &str, value: NodeValue) {
        self.slots.inputs.insert(name.to_string(), value);
    }

    pub fn input(&self, name: &str) -> Option<&NodeValue> {
        self.slots.inputs.get(name)
    }

    pub fn output(&self, name: &str) -> Option<&NodeValue> {
        self.slots.outputs.get(name)
    }

    pub fn inputs(&self) -> &HashMap<String, NodeValue> {
        &self.slots.inputs
    }

    pub fn outputs(&self) -> &HashMap<String, NodeValue> {
        &self.slots.outputs
    }

    /// Declared inputs that have not arrived yet. Only an End node waits for
    /// its inputs; every other node can run on whatever it has.
    pub fn missing_inputs(&self) -> Vec<String> {
        match &self.variant {
            NodeVariant::End(n) => n.missing(&self.slots),
            _ => Vec::new(),
        }
    }

    /// Inputs and outputs rendered as JSON, for run logs.
    pub fn snapshot(&self) -> Value {
        json!({
            "inputs": Slots::to_json(&self.slots.inputs),
            "outputs": Slots::to_json(&self.slots.outputs),
        })
    }

    /// Run the node once over its current inputs.
    pub async fn execute(&mut self, ctx: &NodeContext) -> Result<(), NodeError> {
        if self.state != NodeState::Pending {
            return Err(NodeError::InvalidState(self.state));
        }
        self.state = NodeState::Running;

        let env = ExecEnv {
            node_id: &self.id,
            node_name: &self.name,
            ctx,
        };
        let slots = &mut self.slots;
        let result = match &mut self.variant {
            NodeVariant::Start(n) => n.execute(slots),
            NodeVariant::End(n) => n.execute(slots),
            NodeVariant::Browser(n) => n.execute(slots, &env).await,
            NodeVariant::Loop(n) => n.execute(slots, &env),
            NodeVariant::Condition(n) => n.execute(slots),
            NodeVariant::Crawler(n) => n.execute(slots, &env).await,
            NodeVariant::ScriptExecute(n) => n.execute(slots, &env).await,
        };

        self.state = match result {
            Ok(()) => NodeState::Completed,
            Err(_) => NodeState::Failed,
        };
        result
    }

    /// Make a completed node runnable again, keeping its inputs and its
    /// variant state.
    pub fn prepare_revisit(&mut self) {
        if self.state == NodeState::Completed {
            self.slots.outputs.clear();
            self.state = NodeState::Pending;
        }
    }

    /// Clear both slot maps and return to `Pending`.
    pub fn reset(&mut self) {
        self.slots = Slots::default();
        self.state = NodeState::Pending;
    }

    /// [`reset`](Self::reset) plus per-type accumulated state (loop
    /// counters, collected final results).
    pub fn reset_state(&mut self) {
        self.reset();
        match &mut self.variant {
            NodeVariant::Loop(n) => n.reset_counter(),
            NodeVariant::End(n) => n.clear_results(),
            _ => {}
        }
    }

    /// Release held resources. Safe to call repeatedly.
    pub async fn cleanup(&mut self) {
        if let NodeVariant::Browser(n) = &mut self.variant {
            n.cleanup(&self.id).await;
        }
    }

    /// The routing decision of a completed Loop node.
    pub fn loop_directive(&self) -> Option<LoopDirective> {
        match (&self.variant, self.state) {
            (NodeVariant::Loop(n), NodeState::Completed) => Some(n.directive()),
            _ => None,
        }
    }

    /// The configured jump target of a Loop node, if any.
    pub fn loop_target(&self) -> Option<&str> {
        match &self.variant {
            NodeVariant::Loop(n) => n.target_node_id(),
            _ => None,
        }
    }

    /// Collected results of an End node.
    pub fn final_results(&self) -> Option<&HashMap<String, Value>> {
        match &self.variant {
            NodeVariant::End(n) => Some(n.final_results()),
            _ => None,
        }
    }
}

fn parse_config<T: DeserializeOwned>(def: &NodeDefinition) -> Result<T, NodeError> {
    let data = match &def.data {
        Value::Null => Value::Object(Map::new()),
        other => other.clone(),
    };
    serde_json::from_value(data)
        .map_err(|e| NodeError::Config(format!("invalid {} config for node '{}': {e}", def.kind, def.id)))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn def(kind: NodeKind, data: Value) -> NodeDefinition {
        NodeDefinition {
            id: "n1".to_string(),
            kind,
            name: None,
            data,
        }
    }

    #[test]
    fn unknown_input_is_stored() {
        let mut node = Node::from_definition(&def(NodeKind::Condition, Value::Null)).unwrap();
        node.set_input("surprise", json!(1));
        assert_eq!(node.input("surprise").and_then(NodeValue::as_json), Some(&json!(1)));
        assert!(node.input("value").is_none());
        assert!(node.output("true").is_none());
    }

    #[test]
    fn ports_include_universal_handles() {
        let node = Node::from_definition(&def(
            NodeKind::Start,
            json!({"inputs": [{"name": "keyword", "type": "string"}]}),
        ))
        .unwrap();
        assert!(node.accepts_input("keyword"));
        assert!(node.accepts_input("input"));
        assert!(node.produces_output("output"));
        assert!(node.produces_output("keyword"));
        assert!(!node.produces_output("results"));
    }

    #[test]
    fn invalid_guard_fails_at_construction() {
        let err = Node::from_definition(&def(
            NodeKind::Browser,
            json!({"url": "https://example.com", "beforeScript": {"type": "getTitle"}}),
        ))
        .unwrap_err();
        assert!(matches!(err, NodeError::Config(msg) if msg.contains("getTitle")));
    }

    #[test]
    fn malformed_config_is_config_error() {
        let err = Node::from_definition(&def(NodeKind::Loop, json!({"maxIterations": "lots"}))).unwrap_err();
        assert!(matches!(err, NodeError::Config(_)));
    }

    #[tokio::test]
    async fn node_cannot_rerun_without_revisit() {
        let ctx = NodeContext::new("flow", Capabilities::default());
        let mut node = Node::from_definition(&def(NodeKind::Start, json!({"inputs": []}))).unwrap();
        node.execute(&ctx).await.unwrap();
        assert_eq!(node.state(), NodeState::Completed);

        let err = node.execute(&ctx).await.unwrap_err();
        assert!(matches!(err, NodeError::InvalidState(NodeState::Completed)));

        node.prepare_revisit();
        node.execute(&ctx).await.unwrap();
    }

    #[tokio::test]
    async fn failed_node_needs_reset() {
        let ctx = NodeContext::new("flow", Capabilities::default());
        let mut node = Node::from_definition(&def(
            NodeKind::End,
            json!({"outputs": [{"name": "items", "type": "array"}]}),
        ))
        .unwrap();
        assert!(node.execute(&ctx).await.is_err());
        assert_eq!(node.state(), NodeState::Failed);

        node.prepare_revisit();
        assert_eq!(node.state(), NodeState::Failed);

        node.reset();
        node.set_input("items", json!([1]));
        node.execute(&ctx).await.unwrap();
        assert_eq!(node.final_results().unwrap()["items"], json!([1]));
    }

    #[test]
    fn page_values_render_as_descriptor() {
        let page = crate::test_support::MockPage::new("https://example.com");
        let value = NodeValue::page(page, "https://example.com");
        assert_eq!(value.to_json(), json!({"kind": "page", "url": "https://example.com"}));
        assert!(value.as_json().is_none());
        assert!(value.as_page().is_some());
    }
}
