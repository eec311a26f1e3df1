//! Start node: the graph's entry point.
//!
//! Run parameters arrive as Start inputs and leave unchanged as the
//! same-named outputs.

use weaving_types::node::StartConfig;

use super::{NodeError, NodeValue, Slots};

#[derive(Debug)]
pub struct StartNode {
    config: StartConfig,
}

impl StartNode {
    pub fn new(config: StartConfig) -> Self {
        Self { config }
    }

    pub(super) fn ports(&self) -> Vec<&str> {
        self.config.inputs.iter().map(|p| p.name.as_str()).collect()
    }

    pub(super) fn execute(&mut self, slots: &mut Slots) -> Result<(), NodeError> {
        for param in &self.config.inputs {
            let value = slots
                .input(&param.name)
                .cloned()
                .or_else(|| param.default.clone().map(NodeValue::Json));
            match value {
                Some(value) => slots.set_output(&param.name, value),
                None if param.required => {
                    return Err(NodeError::Config(format!(
                        "required input '{}' was not supplied",
                        param.name
                    )));
                }
                None => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn start(inputs: serde_json::Value) -> StartNode {
        StartNode::new(serde_json::from_value(json!({ "inputs": inputs })).unwrap())
    }

    #[test]
    fn copies_declared_inputs_to_outputs() {
        let mut node = start(json!([{"name": "keyword", "type": "string"}, {"name": "pages", "type": "number"}]));
        let mut slots = Slots::default();
        slots.inputs.insert("keyword".into(), json!("rust").into());
        slots.inputs.insert("pages".into(), json!(3).into());
        slots.inputs.insert("extra".into(), json!(true).into());

        node.execute(&mut slots).unwrap();

        assert_eq!(slots.outputs.len(), 2);
        assert_eq!(slots.outputs["keyword"].to_json(), json!("rust"));
        assert_eq!(slots.outputs["pages"].to_json(), json!(3));
    }

    #[test]
    fn missing_input_uses_default() {
        let mut node = start(json!([{"name": "pages", "type": "number", "default": 5}]));
        let mut slots = Slots::default();
        node.execute(&mut slots).unwrap();
        assert_eq!(slots.outputs["pages"].to_json(), json!(5));
    }

    #[test]
    fn missing_optional_input_stays_absent() {
        let mut node = start(json!([{"name": "note", "type": "string"}]));
        let mut slots = Slots::default();
        node.execute(&mut slots).unwrap();
        assert!(slots.outputs.is_empty());
    }

    #[test]
    fn missing_required_input_fails() {
        let mut node = start(json!([{"name": "keyword", "type": "string", "required": true}]));
        let err = node.execute(&mut Slots::default()).unwrap_err();
        assert!(matches!(err, NodeError::Config(msg) if msg.contains("keyword")));
    }
}
