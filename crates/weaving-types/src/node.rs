//! Per-node configuration carried in a node's `data` object.
//!
//! Every config struct tolerates unknown keys (the editor stores layout and
//! label fields alongside the configuration) and fills missing keys with the
//! documented defaults. Numeric fields accept either JSON numbers or numeric
//! strings, since form inputs frequently submit the latter.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::action::{BeforeScriptConfig, ScriptAction};

/// Default page-operation timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

// ---------------------------------------------------------------------------
// Start / End
// ---------------------------------------------------------------------------

/// A declared workflow parameter (Start inputs, End outputs).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamDecl {
    pub name: String,
    #[serde(rename = "type", default = "default_param_type")]
    pub value_type: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_param_type() -> String {
    "string".to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StartConfig {
    pub inputs: Vec<ParamDecl>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndConfig {
    pub outputs: Vec<ParamDecl>,
}

// ---------------------------------------------------------------------------
// Loop
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoopConfig {
    #[serde(deserialize_with = "lenient_u32")]
    pub max_iterations: u32,
    /// Expression evaluated with `iteration` and `data` in scope.
    pub condition: String,
    pub target_node_id: String,
    /// Re-run the existing target instance (keeping its accumulated state)
    /// instead of building a fresh one per iteration.
    pub reuse_target_node: bool,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            condition: "true".to_string(),
            target_node_id: String::new(),
            reuse_target_node: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Condition
// ---------------------------------------------------------------------------

/// Fallback values for a Condition node whose inputs are not wired.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConditionConfig {
    pub value: Option<Value>,
    pub operator: Option<String>,
    pub compare_value: Option<Value>,
}

// ---------------------------------------------------------------------------
// Browser
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BrowserConfig {
    pub url: Option<String>,
    #[serde(deserialize_with = "lenient_u32")]
    pub width: u32,
    #[serde(deserialize_with = "lenient_u32")]
    pub height: u32,
    pub user_agent: Option<String>,
    pub proxy: Option<String>,
    pub cookies: BTreeMap<String, String>,
    pub headers: BTreeMap<String, String>,
    #[serde(deserialize_with = "lenient_u64")]
    pub timeout: u64,
    pub visible: bool,
    pub scripts: Vec<ScriptAction>,
    pub before_script: Option<BeforeScriptConfig>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            url: None,
            width: 1280,
            height: 800,
            user_agent: None,
            proxy: None,
            cookies: BTreeMap::new(),
            headers: BTreeMap::new(),
            timeout: DEFAULT_TIMEOUT_MS,
            visible: true,
            scripts: Vec::new(),
            before_script: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Crawler
// ---------------------------------------------------------------------------

/// What a crawler waits for before collecting: a selector or a fixed delay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WaitFor {
    Millis(u64),
    Selector(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CrawlerConfig {
    pub url: Option<String>,
    pub selector: Option<String>,
    pub wait_for: Option<WaitFor>,
    pub is_headless: Option<bool>,
}

// ---------------------------------------------------------------------------
// ScriptExecute
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScriptExecuteConfig {
    pub script: Option<String>,
    pub enable_captcha_check: bool,
    pub captcha_check_script: Option<String>,
    #[serde(deserialize_with = "lenient_u64")]
    pub captcha_timeout: u64,
    #[serde(deserialize_with = "lenient_u64")]
    pub captcha_check_interval: u64,
}

impl Default for ScriptExecuteConfig {
    fn default() -> Self {
        Self {
            script: None,
            enable_captcha_check: false,
            captcha_check_script: None,
            captcha_timeout: 300_000,
            captcha_check_interval: 1_000,
        }
    }
}

// ---------------------------------------------------------------------------
// Lenient numeric fields
// ---------------------------------------------------------------------------

/// Read an unsigned integer from a JSON number or a numeric string.
pub fn value_as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| *f >= 0.0).map(|f| f as u64),
        _ => None,
    }
}

pub(crate) fn lenient_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    value_as_u64(&value)
        .ok_or_else(|| serde::de::Error::custom(format!("expected a non-negative number, got {value}")))
}

pub(crate) fn lenient_u32<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let n = lenient_u64(deserializer)?;
    u32::try_from(n).map_err(|_| serde::de::Error::custom(format!("number {n} out of range")))
}

pub(crate) fn lenient_opt_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(v) => value_as_u64(&v)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("expected a non-negative number, got {v}"))),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
