//! Action-script items and the pre-action guard of a Browser node.
//!
//! A Browser node's `scripts` array is an ordered list of [`ScriptAction`]s,
//! internally tagged by `type`. The optional `beforeScript` object is stored
//! flat by the editor ([`BeforeScriptConfig`]) and converted into a typed
//! [`Guard`] when the node is built, so malformed guards fail at load time.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::browser::LoadState;
use crate::node::lenient_opt_u64;

// ---------------------------------------------------------------------------
// Script actions
// ---------------------------------------------------------------------------

/// One step of an action script.
///
/// Optional `timeout` fields are milliseconds and default to 30 000.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ScriptAction {
    /// Run a JavaScript function body in the page. The body receives the
    /// accumulated `results` array and its return value is recorded.
    Script { script: String },
    Delay {
        #[serde(default, deserialize_with = "lenient_opt_u64")]
        delay: Option<u64>,
    },
    WaitForSelector {
        selector: String,
        #[serde(default, deserialize_with = "lenient_opt_u64")]
        timeout: Option<u64>,
    },
    Click {
        selector: String,
        #[serde(default, deserialize_with = "lenient_opt_u64")]
        timeout: Option<u64>,
    },
    Fill {
        selector: String,
        #[serde(default)]
        value: String,
        #[serde(default, deserialize_with = "lenient_opt_u64")]
        timeout: Option<u64>,
    },
    Type {
        selector: String,
        #[serde(default)]
        text: String,
        /// Per-character delay in milliseconds (default 100).
        #[serde(default, deserialize_with = "lenient_opt_u64")]
        delay: Option<u64>,
    },
    Press {
        #[serde(default)]
        selector: Option<String>,
        #[serde(deserialize_with = "string_or_number")]
        key: String,
    },
    Hover {
        selector: String,
        #[serde(default, deserialize_with = "lenient_opt_u64")]
        timeout: Option<u64>,
    },
    Screenshot {
        #[serde(default)]
        selector: Option<String>,
        path: String,
        #[serde(rename = "fullPage", default)]
        full_page: bool,
    },
    Evaluate { expression: String },
    WaitForLoadState {
        #[serde(default)]
        state: Option<LoadState>,
        #[serde(default, deserialize_with = "lenient_opt_u64")]
        timeout: Option<u64>,
    },
    SelectOption {
        selector: String,
        #[serde(deserialize_with = "one_or_many")]
        value: Vec<String>,
    },
    CheckOrUncheck {
        selector: String,
        #[serde(default)]
        checked: bool,
    },
    GoBack {
        #[serde(default, deserialize_with = "lenient_opt_u64")]
        timeout: Option<u64>,
    },
    GoForward {
        #[serde(default, deserialize_with = "lenient_opt_u64")]
        timeout: Option<u64>,
    },
    Reload {
        #[serde(rename = "waitUntil", default)]
        wait_until: Option<LoadState>,
    },
    GetPageUrl {},
    /// Wait for the page to change: either a new page opens or the current
    /// one navigates.
    WaitPage {
        #[serde(default, deserialize_with = "lenient_opt_u64")]
        timeout: Option<u64>,
    },
    ReturnPreviousPage {},
}

impl ScriptAction {
    /// The wire tag of this action.
    pub fn name(&self) -> &'static str {
        match self {
            ScriptAction::Script { .. } => "script",
            ScriptAction::Delay { .. } => "delay",
            ScriptAction::WaitForSelector { .. } => "waitForSelector",
            ScriptAction::Click { .. } => "click",
            ScriptAction::Fill { .. } => "fill",
            ScriptAction::Type { .. } => "type",
            ScriptAction::Press { .. } => "press",
            ScriptAction::Hover { .. } => "hover",
            ScriptAction::Screenshot { .. } => "screenshot",
            ScriptAction::Evaluate { .. } => "evaluate",
            ScriptAction::WaitForLoadState { .. } => "waitForLoadState",
            ScriptAction::SelectOption { .. } => "selectOption",
            ScriptAction::CheckOrUncheck { .. } => "checkOrUncheck",
            ScriptAction::GoBack { .. } => "goBack",
            ScriptAction::GoForward { .. } => "goForward",
            ScriptAction::Reload { .. } => "reload",
            ScriptAction::GetPageUrl {} => "getPageUrl",
            ScriptAction::WaitPage { .. } => "waitPage",
            ScriptAction::ReturnPreviousPage {} => "returnPreviousPage",
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected a string or number, got {other}"
        ))),
    }
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(vec![s]),
        Value::Array(items) => items
            .into_iter()
            .map(|v| match v {
                Value::String(s) => Ok(s),
                Value::Number(n) => Ok(n.to_string()),
                other => Err(serde::de::Error::custom(format!("invalid option value {other}"))),
            })
            .collect(),
        other => Err(serde::de::Error::custom(format!(
            "expected a string or list of strings, got {other}"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Pre-action guard (wire shape)
// ---------------------------------------------------------------------------

/// The `beforeScript` object exactly as the editor stores it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BeforeScriptConfig {
    /// `getPageUrl` or `waitForSelector`; empty disables the guard.
    #[serde(rename = "type")]
    pub kind: Option<String>,
    #[serde(deserialize_with = "lenient_opt_u64")]
    pub get_page_url_delay: Option<u64>,
    pub operator: Option<String>,
    pub value: Option<String>,
    pub selector: Option<String>,
    /// `waitTime`, `waitSelector`, `continue`, `break` or `jumpIndex`.
    pub action: Option<String>,
    #[serde(deserialize_with = "lenient_opt_u64")]
    pub action_wait_time: Option<u64>,
    pub action_wait_selector: Option<String>,
    #[serde(deserialize_with = "lenient_opt_u64")]
    pub action_jump_index: Option<u64>,
    pub send_notification: bool,
}

// ---------------------------------------------------------------------------
// Pre-action guard (typed)
// ---------------------------------------------------------------------------

/// A guard evaluated before every action of a script.
#[derive(Debug, Clone, PartialEq)]
pub struct Guard {
    pub condition: GuardCondition,
    pub reaction: GuardReaction,
    /// Send a notification each time the guard fires.
    pub notify: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GuardCondition {
    /// Compare the active page URL, optionally after a settling delay.
    PageUrl {
        delay_ms: Option<u64>,
        operator: UrlOperator,
        value: String,
    },
    /// Holds once the selector is present (waits indefinitely).
    SelectorPresent { selector: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlOperator {
    Equals,
    NotEquals,
    Includes,
}

impl UrlOperator {
    pub fn matches(&self, url: &str, value: &str) -> bool {
        match self {
            UrlOperator::Equals => url == value,
            UrlOperator::NotEquals => url != value,
            UrlOperator::Includes => url.contains(value),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GuardReaction {
    WaitTime(u64),
    WaitSelector(String),
    Continue,
    Break,
    JumpIndex(usize),
}

/// A `beforeScript` object that cannot be turned into a [`Guard`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GuardConfigError {
    #[error("unknown guard type '{0}'")]
    UnknownType(String),

    #[error("unsupported page URL operator '{0}'")]
    UnknownOperator(String),

    #[error("unknown guard action '{0}'")]
    UnknownAction(String),

    #[error("guard field '{0}' is required")]
    MissingField(&'static str),
}

impl BeforeScriptConfig {
    /// Convert into a typed guard. `Ok(None)` when no guard type is set.
    pub fn to_guard(&self) -> Result<Option<Guard>, GuardConfigError> {
        let kind = match self.kind.as_deref().map(str::trim) {
            None | Some("") => return Ok(None),
            Some(kind) => kind,
        };

        let condition = match kind {
            "getPageUrl" => {
                let operator = match self.operator.as_deref().unwrap_or("==") {
                    "==" | "===" => UrlOperator::Equals,
                    "!=" | "!==" => UrlOperator::NotEquals,
                    "includes" => UrlOperator::Includes,
                    other => return Err(GuardConfigError::UnknownOperator(other.to_string())),
                };
                GuardCondition::PageUrl {
                    delay_ms: self.get_page_url_delay.filter(|d| *d > 0),
                    operator,
                    value: self.value.clone().unwrap_or_default(),
                }
            }
            "waitForSelector" => GuardCondition::SelectorPresent {
                selector: non_empty(&self.selector).ok_or(GuardConfigError::MissingField("selector"))?,
            },
            other => return Err(GuardConfigError::UnknownType(other.to_string())),
        };

        let reaction = match self.action.as_deref().map(str::trim).unwrap_or("") {
            "" | "continue" => GuardReaction::Continue,
            "break" => GuardReaction::Break,
            "waitTime" => GuardReaction::WaitTime(
                self.action_wait_time
                    .ok_or(GuardConfigError::MissingField("actionWaitTime"))?,
            ),
            "waitSelector" => GuardReaction::WaitSelector(
                non_empty(&self.action_wait_selector)
                    .ok_or(GuardConfigError::MissingField("actionWaitSelector"))?,
            ),
            "jumpIndex" => GuardReaction::JumpIndex(
                self.action_jump_index
                    .ok_or(GuardConfigError::MissingField("actionJumpIndex"))? as usize,
            ),
            other => return Err(GuardConfigError::UnknownAction(other.to_string())),
        };

        Ok(Some(Guard {
            condition,
            reaction,
            notify: self.send_notification,
        }))
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_deref().filter(|s| !s.trim().is_empty()).map(str::to_string)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
