//! Workflow execution: graph, nodes, engine and run supervision.
//!
//! - `graph` -- structural graph and pre-run validation (cycle detection)
//! - `node` -- the seven node types behind one tagged `Node`
//! - `script` -- action-script interpreter used by the Browser node
//! - `expression` -- JEXL evaluator for loop conditions
//! - `hooks` -- interception points around each node dispatch
//! - `engine` -- graph walk for a single run
//! - `supervisor` -- run registry, stop requests and run logs

pub mod engine;
pub mod expression;
pub mod graph;
pub mod hooks;
pub mod node;
pub mod script;
pub mod supervisor;
