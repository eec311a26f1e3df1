//! Interception points around every node dispatch.
//!
//! The engine calls [`ExecutionHooks::before_node`] right before a node runs;
//! an error returned there aborts the run instead of running the node. The
//! run supervisor uses this to observe stop requests and to write run logs.

use futures_util::future::BoxFuture;

use super::node::{Node, NodeError};

pub trait ExecutionHooks: Send + Sync {
    fn before_node<'a>(&'a self, node: &'a Node) -> BoxFuture<'a, Result<(), NodeError>>;

    fn after_node<'a>(&'a self, node: &'a Node) -> BoxFuture<'a, ()>;

    fn on_node_error<'a>(&'a self, node: &'a Node, error: &'a NodeError) -> BoxFuture<'a, ()>;
}

/// Hooks that do nothing. Used when the engine runs outside a supervisor.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl ExecutionHooks for NoopHooks {
    fn before_node<'a>(&'a self, _node: &'a Node) -> BoxFuture<'a, Result<(), NodeError>> {
        Box::pin(async { Ok(()) })
    }

    fn after_node<'a>(&'a self, _node: &'a Node) -> BoxFuture<'a, ()> {
        Box::pin(async {})
    }

    fn on_node_error<'a>(&'a self, _node: &'a Node, _error: &'a NodeError) -> BoxFuture<'a, ()> {
        Box::pin(async {})
    }
}
