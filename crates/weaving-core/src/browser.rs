//! Browser automation capability.
//!
//! The engine never talks to a browser directly. Browser and Crawler nodes
//! launch sessions through a [`BrowserLauncher`], and the action-script
//! interpreter drives pages through [`PageHandle`]. `weaving-infra` provides
//! the Chrome DevTools implementation; tests use scripted fakes.
//!
//! The traits are object-safe (boxed futures) because a launcher is chosen at
//! runtime and page handles flow between nodes as values.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde_json::Value;
use weaving_types::browser::{ElementSnapshot, LaunchOptions, LoadState};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors raised by browser primitives.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BrowserError {
    #[error("failed to launch browser: {0}")]
    Launch(String),

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("element not found: {0}")]
    ElementNotFound(String),

    #[error("script evaluation failed: {0}")]
    Evaluation(String),

    #[error("browser protocol error: {0}")]
    Protocol(String),

    #[error("browser session is closed")]
    Closed,

    #[error("io error: {0}")]
    Io(String),
}

impl BrowserError {
    pub fn timeout(operation: impl Into<String>, timeout: Duration) -> Self {
        BrowserError::Timeout {
            operation: operation.into(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// Timeouts are retried by several actions instead of failing the script.
    pub fn is_timeout(&self) -> bool {
        matches!(self, BrowserError::Timeout { .. })
    }
}

pub type BrowserResult<T> = Result<T, BrowserError>;

// ---------------------------------------------------------------------------
// Capability traits
// ---------------------------------------------------------------------------

/// Opens browser sessions.
pub trait BrowserLauncher: Send + Sync {
    /// Launch a browser, open `url` in its first page and apply `options`.
    fn launch<'a>(
        &'a self,
        url: &'a str,
        options: &'a LaunchOptions,
    ) -> BoxFuture<'a, BrowserResult<Arc<dyn BrowserSession>>>;
}

/// One running browser with its pages.
pub trait BrowserSession: Send + Sync {
    /// The page opened at launch.
    fn page(&self) -> Arc<dyn PageHandle>;

    /// Resolve with a page opened after this call (popup, `target=_blank`),
    /// or `None` if none appears within `timeout`.
    fn wait_for_new_page(
        &self,
        timeout: Duration,
    ) -> BoxFuture<'_, BrowserResult<Option<Arc<dyn PageHandle>>>>;

    /// Close the browser and every page it owns.
    fn close(&self) -> BoxFuture<'_, BrowserResult<()>>;
}

/// Primitive operations on a single page.
///
/// Selector-based operations wait up to their timeout for the element and
/// fail with [`BrowserError::Timeout`] when it never appears.
pub trait PageHandle: Send + Sync {
    fn url(&self) -> BoxFuture<'_, BrowserResult<String>>;

    fn title(&self) -> BoxFuture<'_, BrowserResult<String>>;

    /// Serialized HTML of the whole document.
    fn content(&self) -> BoxFuture<'_, BrowserResult<String>>;

    fn navigate<'a>(&'a self, url: &'a str, timeout: Duration) -> BoxFuture<'a, BrowserResult<()>>;

    /// Evaluate a JavaScript expression and return its JSON value.
    fn evaluate<'a>(&'a self, expression: &'a str) -> BoxFuture<'a, BrowserResult<Value>>;

    /// Call `function (results) { <body> }` in the page with `arg` bound to
    /// `results` and return its JSON value.
    fn call_function<'a>(&'a self, body: &'a str, arg: Value) -> BoxFuture<'a, BrowserResult<Value>>;

    fn click<'a>(&'a self, selector: &'a str, timeout: Duration) -> BoxFuture<'a, BrowserResult<()>>;

    /// Replace the value of an input element.
    fn fill<'a>(
        &'a self,
        selector: &'a str,
        value: &'a str,
        timeout: Duration,
    ) -> BoxFuture<'a, BrowserResult<()>>;

    /// Type `text` one key at a time with `delay` between keys.
    fn type_text<'a>(
        &'a self,
        selector: &'a str,
        text: &'a str,
        delay: Duration,
    ) -> BoxFuture<'a, BrowserResult<()>>;

    /// Press a key on the element, or on the page when `selector` is `None`.
    fn press<'a>(&'a self, selector: Option<&'a str>, key: &'a str) -> BoxFuture<'a, BrowserResult<()>>;

    fn hover<'a>(&'a self, selector: &'a str, timeout: Duration) -> BoxFuture<'a, BrowserResult<()>>;

    /// Save a PNG of the element (or page) to `path`. Resolves `false` when
    /// the element does not exist.
    fn screenshot<'a>(
        &'a self,
        selector: Option<&'a str>,
        path: &'a Path,
        full_page: bool,
    ) -> BoxFuture<'a, BrowserResult<bool>>;

    /// Select options of a `<select>` by value; returns the selected values.
    fn select_option<'a>(
        &'a self,
        selector: &'a str,
        values: &'a [String],
    ) -> BoxFuture<'a, BrowserResult<Vec<String>>>;

    fn set_checked<'a>(&'a self, selector: &'a str, checked: bool) -> BoxFuture<'a, BrowserResult<()>>;

    fn go_back(&self, timeout: Duration) -> BoxFuture<'_, BrowserResult<()>>;

    fn go_forward(&self, timeout: Duration) -> BoxFuture<'_, BrowserResult<()>>;

    fn reload(&self, wait_until: LoadState, timeout: Duration) -> BoxFuture<'_, BrowserResult<()>>;

    fn wait_for_selector<'a>(
        &'a self,
        selector: &'a str,
        timeout: Duration,
    ) -> BoxFuture<'a, BrowserResult<()>>;

    fn wait_for_load_state(&self, state: LoadState, timeout: Duration) -> BoxFuture<'_, BrowserResult<()>>;

    /// Resolve once the page navigates; times out otherwise.
    fn wait_for_navigation(&self, timeout: Duration) -> BoxFuture<'_, BrowserResult<()>>;

    /// Text, HTML and `href` of every element matching `selector`.
    fn query_all<'a>(&'a self, selector: &'a str) -> BoxFuture<'a, BrowserResult<Vec<ElementSnapshot>>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_timeouts_report_is_timeout() {
        let err = BrowserError::timeout("waitForSelector #x", Duration::from_millis(1500));
        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "waitForSelector #x timed out after 1500ms");
        assert!(!BrowserError::Closed.is_timeout());
    }
}
