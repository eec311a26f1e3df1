//! ScriptExecute node: repeatedly evaluate a script on a page opened by a
//! Browser node, optionally pausing while a captcha is on screen.
//!
//! Each evaluation must return `{ data, shouldContinue }`. Truthy `data` is
//! collected; falsy or missing `data` ends the loop. The node evaluates again
//! only while `shouldContinue` is `true`.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use weaving_types::node::{ScriptExecuteConfig, value_as_u64};

use super::{ExecEnv, NodeError, NodeValue, Slots};
use crate::browser::PageHandle;
use crate::workflow::expression::truthy;
use crate::workflow::script::sleep;

pub(super) const INPUTS: &[&str] = &[
    "browser",
    "script",
    "enableCaptchaCheck",
    "captchaCheckScript",
    "captchaTimeout",
    "captchaCheckInterval",
];
pub(super) const OUTPUTS: &[&str] = &["results", "error"];

#[derive(Debug)]
pub struct ScriptExecuteNode {
    config: ScriptExecuteConfig,
}

struct CaptchaCheck {
    script: String,
    timeout: Duration,
    interval: Duration,
}

impl ScriptExecuteNode {
    pub fn new(config: ScriptExecuteConfig) -> Self {
        Self { config }
    }

    pub(super) async fn execute(&mut self, slots: &mut Slots, env: &ExecEnv<'_>) -> Result<(), NodeError> {
        match self.run(slots, env).await {
            Ok(results) => {
                slots.set_output("results", Value::Array(results));
                Ok(())
            }
            Err(e) => {
                tracing::error!(node_id = env.node_id, error = %e, "script execution failed");
                slots.set_output("error", json!(e.to_string()));
                Err(e)
            }
        }
    }

    async fn run(&self, slots: &Slots, env: &ExecEnv<'_>) -> Result<Vec<Value>, NodeError> {
        let page = slots
            .input("browser")
            .and_then(NodeValue::as_page)
            .cloned()
            .ok_or_else(|| {
                NodeError::Config("input 'browser' must be a page published by a Browser node".to_string())
            })?;
        let script = slots
            .input_str("script")
            .map(str::to_string)
            .or_else(|| self.config.script.clone().filter(|s| !s.trim().is_empty()))
            .ok_or_else(|| NodeError::Config("scriptExecute node requires a script".to_string()))?;
        let captcha = self.captcha_check(slots);

        let mut results = Vec::new();
        loop {
            if env.ctx.cancel.is_cancelled() {
                return Err(NodeError::Cancelled);
            }
            if let Some(check) = &captcha {
                wait_out_captcha(&page, check, &env.ctx.cancel, env.node_id).await?;
            }

            let reply = match page.evaluate(&script).await? {
                Value::Object(reply) => reply,
                other => {
                    return Err(NodeError::Failed(format!(
                        "script must return an object with data and shouldContinue, got {other}"
                    )));
                }
            };
            match reply.get("data") {
                Some(data) if truthy(data) => results.push(data.clone()),
                _ => break,
            }
            if reply.get("shouldContinue") != Some(&Value::Bool(true)) {
                break;
            }
            tracing::debug!(node_id = env.node_id, collected = results.len(), "script asked to continue");
        }
        Ok(results)
    }

    fn captcha_check(&self, slots: &Slots) -> Option<CaptchaCheck> {
        let enabled = slots
            .input_json("enableCaptchaCheck")
            .and_then(Value::as_bool)
            .unwrap_or(self.config.enable_captcha_check);
        if !enabled {
            return None;
        }
        let script = slots
            .input_str("captchaCheckScript")
            .map(str::to_string)
            .or_else(|| self.config.captcha_check_script.clone())
            .filter(|s| !s.trim().is_empty())?;
        let timeout = slots
            .input_json("captchaTimeout")
            .and_then(value_as_u64)
            .unwrap_or(self.config.captcha_timeout);
        let interval = slots
            .input_json("captchaCheckInterval")
            .and_then(value_as_u64)
            .unwrap_or(self.config.captcha_check_interval);
        Some(CaptchaCheck {
            script,
            timeout: Duration::from_millis(timeout),
            interval: Duration::from_millis(interval),
        })
    }
}

/// Poll the check script until it reports no captcha.
async fn wait_out_captcha(
    page: &Arc<dyn PageHandle>,
    check: &CaptchaCheck,
    cancel: &CancellationToken,
    node_id: &str,
) -> Result<(), NodeError> {
    let started = Instant::now();
    let mut announced = false;
    while truthy(&page.evaluate(&check.script).await?) {
        if started.elapsed() > check.timeout {
            return Err(NodeError::Failed(format!(
                "captcha was not resolved within {}ms",
                check.timeout.as_millis()
            )));
        }
        if !announced {
            tracing::info!(node_id, "captcha detected, waiting for it to be solved");
            announced = true;
        }
        sleep(cancel, check.interval).await?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
