//! Pre-action guard evaluation.

use std::sync::Arc;
use std::time::Duration;

use weaving_types::action::{Guard, GuardCondition, GuardReaction};
use weaving_types::notify::{GUARD_NOTIFICATION_SUBJECT, Severity};

use super::{ScriptEnv, ScriptError, sleep, wait_for_selector_retrying};
use crate::browser::PageHandle;
use crate::notify::notify_best_effort;

const GUARD: &str = "beforeScript";

pub(super) enum GuardOutcome {
    Proceed,
    Abort,
    Jump(usize),
}

/// Evaluate `guard` before the step at `index`. Reactions that wait do so
/// here; pointer changes are returned to the caller.
pub(super) async fn check(
    guard: &Guard,
    page: &Arc<dyn PageHandle>,
    index: usize,
    env: &ScriptEnv<'_>,
) -> Result<GuardOutcome, ScriptError> {
    let fail = move |source| ScriptError::Action {
        index,
        action: GUARD,
        source,
    };

    let detail = match &guard.condition {
        GuardCondition::PageUrl {
            delay_ms,
            operator,
            value,
        } => {
            if let Some(delay) = delay_ms {
                sleep(env.cancel, Duration::from_millis(*delay)).await?;
            }
            let url = page.url().await.map_err(fail)?;
            if !operator.matches(&url, value) {
                return Ok(GuardOutcome::Proceed);
            }
            format!("page URL {url} matched {operator:?} {value}")
        }
        GuardCondition::SelectorPresent { selector } => {
            wait_for_selector_retrying(page.as_ref(), selector, env.default_timeout, env.cancel)
                .await
                .map_err(|e| e.at(index, GUARD))?;
            format!("selector {selector} present")
        }
    };

    let outcome = match &guard.reaction {
        GuardReaction::WaitTime(ms) => {
            sleep(env.cancel, Duration::from_millis(*ms)).await?;
            GuardOutcome::Proceed
        }
        GuardReaction::WaitSelector(selector) => {
            wait_for_selector_retrying(page.as_ref(), selector, env.default_timeout, env.cancel)
                .await
                .map_err(|e| e.at(index, GUARD))?;
            GuardOutcome::Proceed
        }
        GuardReaction::Continue => GuardOutcome::Proceed,
        GuardReaction::Break => GuardOutcome::Abort,
        GuardReaction::JumpIndex(target) => GuardOutcome::Jump(*target),
    };

    tracing::info!(
        node = env.node_name,
        index,
        reaction = ?guard.reaction,
        detail = %detail,
        "pre-action guard fired"
    );

    if guard.notify
        && let Some(notifier) = env.notifier
    {
        let message = format!(
            "workflow: {}, node: {}, pre-action condition met before step {index}: {detail}, reaction: {:?}",
            env.flow_name, env.node_name, guard.reaction
        );
        notify_best_effort(notifier.as_ref(), GUARD_NOTIFICATION_SUBJECT, &message, Severity::Info).await;
    }

    Ok(outcome)
}
