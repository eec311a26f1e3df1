//! Loop node: decides once per visit whether to jump back to its target.
//!
//! The iteration cap is absolute: once `max_iterations` visits have happened
//! the loop exits no matter what the condition says.

use serde_json::Value;
use weaving_types::node::LoopConfig;

use super::{ExecEnv, NodeError, Slots};
use crate::workflow::expression::{WorkflowEvaluator, loop_context, truthy};

pub(super) const INPUTS: &[&str] = &["condition", "data"];
pub(super) const OUTPUTS: &[&str] = &["targetNodeId", "continueLoop", "iteration", "data"];

/// What the engine should do after a loop visit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopDirective {
    pub continue_loop: bool,
    pub target_node_id: Option<String>,
    pub reuse_target_node: bool,
}

#[derive(Debug)]
pub struct LoopNode {
    config: LoopConfig,
    current_iteration: u32,
    continue_loop: bool,
}

impl LoopNode {
    pub fn new(config: LoopConfig) -> Self {
        Self {
            config,
            current_iteration: 0,
            continue_loop: false,
        }
    }

    pub fn iteration(&self) -> u32 {
        self.current_iteration
    }

    pub fn target_node_id(&self) -> Option<&str> {
        Some(self.config.target_node_id.as_str()).filter(|t| !t.is_empty())
    }

    pub fn directive(&self) -> LoopDirective {
        LoopDirective {
            continue_loop: self.continue_loop,
            target_node_id: self.target_node_id().map(str::to_string),
            reuse_target_node: self.config.reuse_target_node,
        }
    }

    pub(super) fn reset_counter(&mut self) {
        self.current_iteration = 0;
        self.continue_loop = false;
    }

    pub(super) fn execute(&mut self, slots: &mut Slots, env: &ExecEnv<'_>) -> Result<(), NodeError> {
        let data = slots.input_json("data").cloned();
        let condition = match slots.input_json("condition") {
            Some(supplied) => truthy(supplied),
            None => self.evaluate_condition(data.as_ref(), env.node_id),
        };

        self.current_iteration += 1;
        self.continue_loop = if self.current_iteration >= self.config.max_iterations {
            tracing::warn!(
                node_id = env.node_id,
                max_iterations = self.config.max_iterations,
                "loop reached its iteration cap"
            );
            false
        } else {
            condition
        };

        tracing::debug!(
            node_id = env.node_id,
            iteration = self.current_iteration,
            continue_loop = self.continue_loop,
            "loop visited"
        );

        slots.set_output("targetNodeId", Value::String(self.config.target_node_id.clone()));
        slots.set_output("continueLoop", Value::Bool(self.continue_loop));
        slots.set_output("iteration", Value::from(self.current_iteration));
        slots.set_output("data", data.unwrap_or(Value::Null));
        Ok(())
    }

    /// Evaluate the configured expression; a broken expression reads as
    /// `false` so the loop exits.
    fn evaluate_condition(&self, data: Option<&Value>, node_id: &str) -> bool {
        let evaluator = WorkflowEvaluator::new();
        let context = loop_context(self.current_iteration, data);
        match evaluator.evaluate_bool(&self.config.condition, &context) {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(
                    node_id,
                    condition = %self.config.condition,
                    error = %e,
                    "loop condition failed to evaluate"
                );
                false
            }
        }
    }
}
