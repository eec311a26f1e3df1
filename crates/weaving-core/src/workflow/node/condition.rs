//! Condition node: compares two values and raises one of two flags.
//!
//! Comparison follows JavaScript coercion, since graph authors write
//! conditions against values scraped from pages:
//! - `==` / `!=` use loose equality, `===` / `!==` strict equality.
//! - Relational operators compare two strings lexicographically (so `"10" <
//!   "9"`). Any other pair is coerced to numbers, and a side that is not a
//!   number makes the comparison `false`.
//! - `includes` tests substring containment for strings and element
//!   membership for arrays.
//! - `regex` tests the stringified value against `compareValue`.

use regex::Regex;
use serde_json::Value;
use weaving_types::node::ConditionConfig;

use super::{NodeError, Slots};

pub(super) const INPUTS: &[&str] = &["value", "operator", "compareValue"];
pub(super) const OUTPUTS: &[&str] = &["true", "false"];

#[derive(Debug)]
pub struct ConditionNode {
    config: ConditionConfig,
}

impl ConditionNode {
    pub fn new(config: ConditionConfig) -> Self {
        Self { config }
    }

    pub(super) fn execute(&mut self, slots: &mut Slots) -> Result<(), NodeError> {
        let value = self.operand(slots, "value", self.config.value.as_ref());
        let compare = self.operand(slots, "compareValue", self.config.compare_value.as_ref());
        let operator = slots
            .input_str("operator")
            .or(self.config.operator.as_deref())
            .unwrap_or("");

        let result = evaluate(operator, &value, &compare)?;
        slots.set_output("true", Value::Bool(result));
        slots.set_output("false", Value::Bool(!result));
        Ok(())
    }

    fn operand(&self, slots: &Slots, name: &str, fallback: Option<&Value>) -> Value {
        slots
            .input(name)
            .map(|v| v.to_json())
            .or_else(|| fallback.cloned())
            .unwrap_or(Value::Null)
    }
}

/// Apply `operator` to the operands.
pub fn evaluate(operator: &str, value: &Value, compare: &Value) -> Result<bool, NodeError> {
    let result = match operator {
        "==" => loose_eq(value, compare),
        "!=" => !loose_eq(value, compare),
        "===" => strict_eq(value, compare),
        "!==" => !strict_eq(value, compare),
        ">" => relational(value, compare, |o| o.is_gt()),
        ">=" => relational(value, compare, |o| o.is_ge()),
        "<" => relational(value, compare, |o| o.is_lt()),
        "<=" => relational(value, compare, |o| o.is_le()),
        "includes" => match value {
            Value::String(s) => s.contains(&js_string(compare)),
            Value::Array(items) => items.iter().any(|item| strict_eq(item, compare)),
            _ => false,
        },
        "regex" => {
            let pattern = js_string(compare);
            let re = Regex::new(&pattern)
                .map_err(|e| NodeError::Config(format!("invalid regex '{pattern}': {e}")))?;
            re.is_match(&js_string(value))
        }
        other => {
            return Err(NodeError::Config(format!("unsupported operator '{other}'")));
        }
    };
    Ok(result)
}

// ---------------------------------------------------------------------------
// JavaScript coercion helpers
// ---------------------------------------------------------------------------

fn strict_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Number(_), Value::Number(_)) => strict_eq(a, b),
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Bool(_), _) | (_, Value::Bool(_)) | (Value::Number(_), Value::String(_))
        | (Value::String(_), Value::Number(_)) => match (to_number(a), to_number(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
        (Value::Array(_) | Value::Object(_), Value::Array(_) | Value::Object(_)) => a == b,
        (Value::Array(_) | Value::Object(_), primitive) | (primitive, Value::Array(_) | Value::Object(_)) => {
            let object = if a.is_array() || a.is_object() { a } else { b };
            loose_eq(&Value::String(js_string(object)), primitive)
        }
    }
}

fn relational(a: &Value, b: &Value, test: impl Fn(std::cmp::Ordering) -> bool) -> bool {
    let (a, b) = (to_primitive(a), to_primitive(b));
    if let (Value::String(x), Value::String(y)) = (&a, &b) {
        return test(x.cmp(y));
    }
    match (to_number(&a), to_number(&b)) {
        (Some(x), Some(y)) => x.partial_cmp(&y).is_some_and(test),
        _ => false,
    }
}

/// Arrays and objects compare through their string form.
fn to_primitive(value: &Value) -> Value {
    match value {
        Value::Array(_) | Value::Object(_) => Value::String(js_string(value)),
        other => other.clone(),
    }
}

fn to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                Some(0.0)
            } else {
                trimmed.parse::<f64>().ok().filter(|f| !f.is_nan())
            }
        }
        Value::Null => Some(0.0),
        Value::Array(_) | Value::Object(_) => None,
    }
}

/// `String(value)` as JavaScript would render it.
fn js_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f == 0.0 => "0".to_string(),
            Some(f) if f.fract() == 0.0 && f.abs() < 1e21 => format!("{f:.0}"),
            _ => n.to_string(),
        },
        Value::Array(items) => items
            .iter()
            .map(|item| if item.is_null() { String::new() } else { js_string(item) })
            .collect::<Vec<_>>()
            .join(","),
        Value::Object(_) => "[object Object]".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
