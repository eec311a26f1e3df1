//! End node: collects the workflow's result.

use std::collections::HashMap;

use serde_json::Value;
use weaving_types::node::EndConfig;

use super::{NodeError, Slots};

#[derive(Debug)]
pub struct EndNode {
    config: EndConfig,
    final_results: HashMap<String, Value>,
}

impl EndNode {
    pub fn new(config: EndConfig) -> Self {
        Self {
            config,
            final_results: HashMap::new(),
        }
    }

    pub(super) fn ports(&self) -> Vec<&str> {
        self.config.outputs.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn final_results(&self) -> &HashMap<String, Value> {
        &self.final_results
    }

    /// Declared outputs that have not arrived as inputs yet.
    pub(super) fn missing(&self, slots: &Slots) -> Vec<String> {
        self.config
            .outputs
            .iter()
            .filter(|p| slots.input(&p.name).is_none())
            .map(|p| p.name.clone())
            .collect()
    }

    pub(super) fn clear_results(&mut self) {
        self.final_results.clear();
    }

    /// Every declared output must have arrived as an input.
    pub(super) fn execute(&mut self, slots: &mut Slots) -> Result<(), NodeError> {
        for param in &self.config.outputs {
            let value = slots.input(&param.name).cloned().ok_or_else(|| {
                NodeError::Config(format!(
                    "declared output '{}' was never supplied",
                    param.name
                ))
            })?;
            self.final_results.insert(param.name.clone(), value.to_json());
            slots.set_output(&param.name, value);
        }
        Ok(())
    }
}
