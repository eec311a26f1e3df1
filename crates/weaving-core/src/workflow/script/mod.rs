//! Action-script interpreter of the Browser node.
//!
//! Runs an ordered list of [`ScriptAction`]s against a browser session. Each
//! index first passes through the optional pre-action [`Guard`], which may
//! wait, abort the script or move the [`InstructionPointer`]; then the action
//! at the (possibly rewritten) index runs; then the pointer advances unless the
//! guard jumped.
//!
//! Every wait in here is a suspension point that observes the run's
//! cancellation token.

mod actions;
mod guard;
pub mod pointer;
pub mod template;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use weaving_types::action::{Guard, ScriptAction};

use crate::browser::{BrowserError, BrowserSession, PageHandle};
use crate::notify::Notifier;

use self::actions::PageCursor;
use self::guard::GuardOutcome;
pub use self::pointer::InstructionPointer;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("script step {index} ({action}) failed: {source}")]
    Action {
        index: usize,
        action: &'static str,
        source: BrowserError,
    },

    #[error("jump target {target} is outside the script (length {len})")]
    InvalidJump { target: usize, len: usize },

    #[error("script execution cancelled")]
    Cancelled,
}

// ---------------------------------------------------------------------------
// Inputs and outputs
// ---------------------------------------------------------------------------

/// Ambient values the interpreter needs besides the script itself.
pub struct ScriptEnv<'a> {
    pub flow_name: &'a str,
    pub node_name: &'a str,
    pub notifier: Option<&'a Arc<dyn Notifier>>,
    pub cancel: &'a CancellationToken,
    /// Timeout for actions that do not set their own.
    pub default_timeout: Duration,
}

/// One executed step, in execution order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepRecord {
    pub index: usize,
    pub action: &'static str,
    /// The value the step added to `results`, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

pub struct ScriptOutcome {
    /// Values produced by the steps, visible to later steps.
    pub results: Vec<Value>,
    pub steps: Vec<StepRecord>,
    /// The page that was active when the script finished.
    pub page: Arc<dyn PageHandle>,
}

// ---------------------------------------------------------------------------
// Interpreter
// ---------------------------------------------------------------------------

pub struct ScriptInterpreter<'a> {
    actions: &'a [ScriptAction],
    guard: Option<&'a Guard>,
    env: ScriptEnv<'a>,
}

impl<'a> ScriptInterpreter<'a> {
    pub fn new(actions: &'a [ScriptAction], guard: Option<&'a Guard>, env: ScriptEnv<'a>) -> Self {
        Self { actions, guard, env }
    }

    pub async fn run(&self, session: &dyn BrowserSession) -> Result<ScriptOutcome, ScriptError> {
        let mut cursor = PageCursor::new(session.page());
        let mut results: Vec<Value> = Vec::new();
        let mut steps = Vec::new();
        let mut ip = InstructionPointer::new(self.actions.len());

        while let Some(index) = ip.current() {
            if self.env.cancel.is_cancelled() {
                return Err(ScriptError::Cancelled);
            }

            let mut jumped = false;
            if let Some(guard) = self.guard {
                match guard::check(guard, cursor.current(), index, &self.env).await? {
                    GuardOutcome::Proceed => {}
                    GuardOutcome::Abort => {
                        tracing::info!(node = self.env.node_name, index, "script aborted by guard");
                        ip.abort();
                        continue;
                    }
                    GuardOutcome::Jump(target) => {
                        ip.jump_to(target)?;
                        jumped = true;
                    }
                }
            }

            let Some(index) = ip.current() else { break };
            let action = &self.actions[index];
            tracing::debug!(node = self.env.node_name, index, action = action.name(), "running script step");

            let result = actions::execute(action, index, &mut cursor, session, &results, &self.env).await?;
            steps.push(StepRecord {
                index,
                action: action.name(),
                result: result.clone(),
            });
            if let Some(value) = result {
                results.push(value);
            }

            if !jumped {
                ip.advance();
            }
        }

        Ok(ScriptOutcome {
            results,
            steps,
            page: cursor.current().clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// Cancellable waits
// ---------------------------------------------------------------------------

/// Sleep unless the run is cancelled first.
pub(crate) async fn sleep(cancel: &CancellationToken, duration: Duration) -> Result<(), ScriptError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(ScriptError::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

/// Wait for `selector`, re-issuing the wait after every timeout until the
/// element appears or the run is cancelled. Only non-timeout errors fail.
pub(crate) async fn wait_for_selector_retrying(
    page: &dyn PageHandle,
    selector: &str,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<(), WaitError> {
    let mut attempts = 0u32;
    loop {
        let attempt = tokio::select! {
            _ = cancel.cancelled() => return Err(WaitError::Cancelled),
            result = page.wait_for_selector(selector, timeout) => result,
        };
        match attempt {
            Ok(()) => return Ok(()),
            Err(e) if e.is_timeout() => {
                attempts += 1;
                tracing::debug!(selector, attempts, "selector not present yet, waiting again");
            }
            Err(e) => return Err(WaitError::Browser(e)),
        }
    }
}

pub(crate) enum WaitError {
    Cancelled,
    Browser(BrowserError),
}

impl WaitError {
    fn at(self, index: usize, action: &'static str) -> ScriptError {
        match self {
            WaitError::Cancelled => ScriptError::Cancelled,
            WaitError::Browser(source) => ScriptError::Action { index, action, source },
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
