//! Semantics of individual script actions.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use weaving_types::action::ScriptAction;
use weaving_types::browser::LoadState;

use super::template::render;
use super::{ScriptEnv, ScriptError, sleep, wait_for_selector_retrying};
use crate::browser::{BrowserError, BrowserSession, PageHandle};

/// Per-character delay of `type` when none is configured.
const DEFAULT_TYPE_DELAY_MS: u64 = 100;

// ---------------------------------------------------------------------------
// Active page tracking
// ---------------------------------------------------------------------------

/// The page actions run against, plus the pages it replaced.
pub(super) struct PageCursor {
    current: Arc<dyn PageHandle>,
    previous: Vec<Arc<dyn PageHandle>>,
}

impl PageCursor {
    pub(super) fn new(page: Arc<dyn PageHandle>) -> Self {
        Self {
            current: page,
            previous: Vec::new(),
        }
    }

    pub(super) fn current(&self) -> &Arc<dyn PageHandle> {
        &self.current
    }

    fn adopt(&mut self, page: Arc<dyn PageHandle>) {
        let replaced = std::mem::replace(&mut self.current, page);
        self.previous.push(replaced);
    }

    fn restore(&mut self) -> Option<Arc<dyn PageHandle>> {
        let page = self.previous.pop()?;
        self.current = page.clone();
        Some(page)
    }
}

// ---------------------------------------------------------------------------
// Page-change race
// ---------------------------------------------------------------------------

enum PageChange {
    NewPage(Arc<dyn PageHandle>),
    Navigated,
    Unchanged,
}

/// Race "a new page opened" against "the current page navigated". The first
/// positive outcome wins; when one side fails the other is still awaited.
async fn race_page_change(
    session: &dyn BrowserSession,
    page: &Arc<dyn PageHandle>,
    timeout: Duration,
) -> PageChange {
    let mut new_page = session.wait_for_new_page(timeout);
    let mut navigation = page.wait_for_navigation(timeout);

    tokio::select! {
        opened = &mut new_page => match opened {
            Ok(Some(page)) => PageChange::NewPage(page),
            _ => match navigation.await {
                Ok(()) => PageChange::Navigated,
                Err(_) => PageChange::Unchanged,
            },
        },
        navigated = &mut navigation => match navigated {
            Ok(()) => PageChange::Navigated,
            Err(_) => match new_page.await {
                Ok(Some(page)) => PageChange::NewPage(page),
                _ => PageChange::Unchanged,
            },
        },
    }
}

/// Wait for a page change and for the winning page to finish loading. A load
/// timeout restarts the race.
async fn await_page_change(
    session: &dyn BrowserSession,
    page: &Arc<dyn PageHandle>,
    timeout: Duration,
    env: &ScriptEnv<'_>,
) -> Result<PageChange, BrowserError> {
    loop {
        if env.cancel.is_cancelled() {
            return Ok(PageChange::Unchanged);
        }
        let change = race_page_change(session, page, timeout).await;
        let loaded = match &change {
            PageChange::NewPage(p) => p.clone(),
            PageChange::Navigated => page.clone(),
            PageChange::Unchanged => return Ok(PageChange::Unchanged),
        };
        match loaded.wait_for_load_state(LoadState::Load, timeout).await {
            Ok(()) => return Ok(change),
            Err(e) if e.is_timeout() => {
                tracing::debug!(node = env.node_name, "page did not finish loading, waiting for a change again");
            }
            Err(e) => return Err(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Run one action. Returns the value it contributes to `results`, if any.
pub(super) async fn execute(
    action: &ScriptAction,
    index: usize,
    cursor: &mut PageCursor,
    session: &dyn BrowserSession,
    results: &[Value],
    env: &ScriptEnv<'_>,
) -> Result<Option<Value>, ScriptError> {
    let name = action.name();
    let fail = move |source| ScriptError::Action {
        index,
        action: name,
        source,
    };
    let timeout_of = |ms: &Option<u64>| ms.map(Duration::from_millis).unwrap_or(env.default_timeout);
    let page = cursor.current().clone();

    let value = match action {
        ScriptAction::Script { script } => {
            let value = page
                .call_function(script, Value::Array(results.to_vec()))
                .await
                .map_err(fail)?;
            Some(value)
        }
        ScriptAction::Delay { delay } => {
            sleep(env.cancel, Duration::from_millis(delay.unwrap_or(0))).await?;
            None
        }
        ScriptAction::WaitForSelector { selector, timeout } => {
            let selector = render(selector, results);
            wait_for_selector_retrying(page.as_ref(), &selector, timeout_of(timeout), env.cancel)
                .await
                .map_err(|e| e.at(index, name))?;
            None
        }
        ScriptAction::Click { selector, timeout } => {
            let selector = render(selector, results);
            let timeout = timeout_of(timeout);
            page.click(&selector, timeout).await.map_err(fail)?;
            let change = await_page_change(session, &page, timeout, env).await.map_err(fail)?;
            Some(adopt_change(change, cursor, "click completed but no page change was detected").await.map_err(fail)?)
        }
        ScriptAction::WaitPage { timeout } => {
            let change = await_page_change(session, &page, timeout_of(timeout), env)
                .await
                .map_err(fail)?;
            Some(adopt_change(change, cursor, "page loaded but no page change was detected").await.map_err(fail)?)
        }
        ScriptAction::ReturnPreviousPage {} => match cursor.restore() {
            Some(previous) => Some(json!(previous.url().await.map_err(fail)?)),
            None => Some(json!("no previous page to return to")),
        },
        ScriptAction::GetPageUrl {} => Some(json!(page.url().await.map_err(fail)?)),
        ScriptAction::Fill {
            selector,
            value,
            timeout,
        } => {
            let selector = render(selector, results);
            let value = render(value, results);
            page.fill(&selector, &value, timeout_of(timeout)).await.map_err(fail)?;
            Some(json!(format!("filled {selector} with {value}")))
        }
        ScriptAction::Type {
            selector,
            text,
            delay,
        } => {
            let selector = render(selector, results);
            let text = render(text, results);
            let delay = Duration::from_millis(delay.unwrap_or(DEFAULT_TYPE_DELAY_MS));
            page.type_text(&selector, &text, delay).await.map_err(fail)?;
            Some(json!(format!("typed text into {selector}")))
        }
        ScriptAction::Press { selector, key } => {
            let selector = selector.as_deref().map(|s| render(s, results));
            let key = render(key, results);
            page.press(selector.as_deref(), &key).await.map_err(fail)?;
            Some(json!(match selector {
                Some(selector) => format!("pressed {key} on {selector}"),
                None => format!("pressed {key}"),
            }))
        }
        ScriptAction::Hover { selector, timeout } => {
            let selector = render(selector, results);
            page.hover(&selector, timeout_of(timeout)).await.map_err(fail)?;
            Some(json!(format!("hovered over {selector}")))
        }
        ScriptAction::Screenshot {
            selector,
            path,
            full_page,
        } => {
            let selector = selector.as_deref().map(|s| render(s, results));
            let path = render(path, results);
            let taken = page
                .screenshot(selector.as_deref(), Path::new(&path), *full_page)
                .await
                .map_err(fail)?;
            Some(json!(match (selector, taken) {
                (Some(selector), true) => format!("saved screenshot of {selector} to {path}"),
                (Some(selector), false) => format!("element {selector} not found for screenshot"),
                (None, _) => format!("saved page screenshot to {path}"),
            }))
        }
        ScriptAction::Evaluate { expression } => {
            let expression = render(expression, results);
            Some(page.evaluate(&expression).await.map_err(fail)?)
        }
        ScriptAction::WaitForLoadState { state, timeout } => {
            let state = state.unwrap_or_default();
            page.wait_for_load_state(state, timeout_of(timeout)).await.map_err(fail)?;
            Some(json!(format!("page reached {state} state")))
        }
        ScriptAction::SelectOption { selector, value } => {
            let selector = render(selector, results);
            let values: Vec<String> = value.iter().map(|v| render(v, results)).collect();
            let selected = page.select_option(&selector, &values).await.map_err(fail)?;
            Some(json!(format!("selected {} in {selector}", selected.join(", "))))
        }
        ScriptAction::CheckOrUncheck { selector, checked } => {
            let selector = render(selector, results);
            page.set_checked(&selector, *checked).await.map_err(fail)?;
            Some(json!(if *checked {
                format!("checked {selector}")
            } else {
                format!("unchecked {selector}")
            }))
        }
        ScriptAction::GoBack { timeout } => {
            page.go_back(timeout_of(timeout)).await.map_err(fail)?;
            Some(json!("navigated back"))
        }
        ScriptAction::GoForward { timeout } => {
            page.go_forward(timeout_of(timeout)).await.map_err(fail)?;
            Some(json!("navigated forward"))
        }
        ScriptAction::Reload { wait_until } => {
            page.reload(wait_until.unwrap_or_default(), env.default_timeout)
                .await
                .map_err(fail)?;
            Some(json!("reloaded page"))
        }
    };

    Ok(value)
}

/// Make a newly opened page active and describe the change.
async fn adopt_change(
    change: PageChange,
    cursor: &mut PageCursor,
    unchanged: &str,
) -> Result<Value, BrowserError> {
    match change {
        PageChange::NewPage(page) => {
            let url = page.url().await?;
            cursor.adopt(page);
            Ok(json!(url))
        }
        PageChange::Navigated => Ok(json!(cursor.current().url().await?)),
        PageChange::Unchanged => Ok(json!(unchanged)),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::test_support::{MockPage, MockSession};

    fn action(value: Value) -> ScriptAction {
        serde_json::from_value(value).unwrap()
    }

    async fn exec(
        session: &MockSession,
        cursor: &mut PageCursor,
        action_json: Value,
        results: &[Value],
    ) -> Result<Option<Value>, ScriptError> {
        let cancel = CancellationToken::new();
        let env = ScriptEnv {
            flow_name: "flow",
            node_name: "browser",
            notifier: None,
            cancel: &cancel,
            default_timeout: Duration::from_millis(5_000),
        };
        execute(&action(action_json), 0, cursor, session, results, &env).await
    }

    #[tokio::test(start_paused = true)]
    async fn click_adopts_popup_and_return_restores() {
        let page = MockPage::new("https://shop.example/list");
        let session = MockSession::new(page.clone());
        let popup = MockPage::new("https://shop.example/item/1");
        session.queue_popup(popup.clone());
        let mut cursor = PageCursor::new(session.page());

        let clicked = exec(&session, &mut cursor, json!({"type": "click", "selector": "a.item"}), &[])
            .await
            .unwrap();
        assert_eq!(clicked, Some(json!("https://shop.example/item/1")));
        assert_eq!(popup.calls(), vec!["waitForLoadState load".to_string()]);

        let url = exec(&session, &mut cursor, json!({"type": "getPageUrl"}), &[]).await.unwrap();
        assert_eq!(url, Some(json!("https://shop.example/item/1")));

        let back = exec(&session, &mut cursor, json!({"type": "returnPreviousPage"}), &[])
            .await
            .unwrap();
        assert_eq!(back, Some(json!("https://shop.example/list")));

        let none = exec(&session, &mut cursor, json!({"type": "returnPreviousPage"}), &[])
            .await
            .unwrap();
        assert_eq!(none, Some(json!("no previous page to return to")));
    }

    #[tokio::test(start_paused = true)]
    async fn click_follows_same_page_navigation() {
        let page = MockPage::new("https://example.com/form");
        page.navigate_on_click("#submit", "https://example.com/done");
        let session = MockSession::new(page.clone());
        let mut cursor = PageCursor::new(session.page());

        let result = exec(&session, &mut cursor, json!({"type": "click", "selector": "#submit"}), &[])
            .await
            .unwrap();

        assert_eq!(result, Some(json!("https://example.com/done")));
        assert_eq!(page.calls_matching("waitForLoadState"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn click_without_change_is_reported() {
        let page = MockPage::new("https://example.com");
        let session = MockSession::new(page);
        let mut cursor = PageCursor::new(session.page());

        let result = exec(&session, &mut cursor, json!({"type": "click", "selector": "#noop"}), &[])
            .await
            .unwrap();
        assert_eq!(result, Some(json!("click completed but no page change was detected")));
    }

    #[tokio::test]
    async fn input_actions_describe_what_they_did() {
        let page = MockPage::new("https://example.com");
        let session = MockSession::new(page.clone());
        let mut cursor = PageCursor::new(session.page());

        let cases = [
            (json!({"type": "type", "selector": "#q", "text": "rust"}), "typed text into #q"),
            (json!({"type": "press", "key": "Enter"}), "pressed Enter"),
            (json!({"type": "press", "selector": "#q", "key": 13}), "pressed 13 on #q"),
            (json!({"type": "checkOrUncheck", "selector": "#agree", "checked": true}), "checked #agree"),
            (json!({"type": "selectOption", "selector": "#size", "value": ["m", "l"]}), "selected m, l in #size"),
            (json!({"type": "reload"}), "reloaded page"),
        ];
        for (action_json, expected) in cases {
            let result = exec(&session, &mut cursor, action_json, &[]).await.unwrap();
            assert_eq!(result, Some(json!(expected)));
        }
        assert!(page.calls().contains(&"type #q=rust (100ms)".to_string()));
        assert!(page.calls().contains(&"press page:Enter".to_string()));
    }

    #[tokio::test]
    async fn screenshot_of_missing_element_is_not_an_error() {
        let page = MockPage::new("https://example.com");
        page.set_missing("#chart");
        let session = MockSession::new(page);
        let mut cursor = PageCursor::new(session.page());

        let result = exec(
            &session,
            &mut cursor,
            json!({"type": "screenshot", "selector": "#chart", "path": "/tmp/chart.png"}),
            &[],
        )
        .await
        .unwrap();
        assert_eq!(result, Some(json!("element #chart not found for screenshot")));
    }

    #[tokio::test(start_paused = true)]
    async fn fill_timeout_is_an_action_error() {
        let page = MockPage::new("https://example.com");
        page.set_missing("#gone");
        let session = MockSession::new(page);
        let mut cursor = PageCursor::new(session.page());

        let err = exec(&session, &mut cursor, json!({"type": "fill", "selector": "#gone", "value": "x"}), &[])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ScriptError::Action { action: "fill", source: BrowserError::Timeout { .. }, .. }
        ));
    }
}
