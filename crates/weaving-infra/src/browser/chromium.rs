//! Chrome DevTools implementation of the browser capability.
//!
//! Each session launches its own Chrome process through chromiumoxide and
//! spawns a task that drives the protocol handler until the browser closes.
//! Page primitives are mostly evaluated as JavaScript; waits poll the page.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{CookieParam, Headers, SetExtraHttpHeadersParams};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures_util::StreamExt;
use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use weaving_core::browser::{BrowserError, BrowserLauncher, BrowserResult, BrowserSession, PageHandle};
use weaving_types::browser::{ElementSnapshot, LaunchOptions, LoadState};

use super::script;

/// Interval between polls while waiting on page state.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Quiet period after `load` that stands in for network idle.
const NETWORK_IDLE_GRACE: Duration = Duration::from_millis(500);

fn protocol(e: impl std::fmt::Display) -> BrowserError {
    BrowserError::Protocol(e.to_string())
}

fn target_id(page: &Page) -> String {
    let id: &str = page.target_id().as_ref();
    id.to_string()
}

/// Chrome command-line flags for `options`.
pub(crate) fn launch_args(options: &LaunchOptions) -> Vec<String> {
    let mut args = vec![
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
    ];
    if let Some(proxy) = options.proxy.as_deref().filter(|p| !p.is_empty()) {
        args.push(format!("--proxy-server={proxy}"));
    }
    if let Some(agent) = options.user_agent.as_deref().filter(|a| !a.is_empty()) {
        args.push(format!("--user-agent={agent}"));
    }
    args
}

// ---------------------------------------------------------------------------
// Launcher
// ---------------------------------------------------------------------------

/// Launches a local Chrome/Chromium per session.
#[derive(Debug, Clone)]
pub struct ChromiumLauncher {
    executable: Option<PathBuf>,
    launch_timeout: Duration,
}

impl ChromiumLauncher {
    pub fn new(executable: Option<PathBuf>, launch_timeout: Duration) -> Self {
        Self {
            executable,
            launch_timeout,
        }
    }

    fn config(&self, options: &LaunchOptions) -> BrowserResult<BrowserConfig> {
        let mut builder = BrowserConfig::builder()
            .window_size(options.width, options.height)
            .viewport(Viewport {
                width: options.width,
                height: options.height,
                ..Viewport::default()
            })
            .args(launch_args(options));
        if !options.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &self.executable {
            builder = builder.chrome_executable(path);
        }
        builder.build().map_err(BrowserError::Launch)
    }

    async fn open(&self, url: &str, options: &LaunchOptions) -> BrowserResult<ChromiumSession> {
        let (browser, mut handler) = tokio::time::timeout(
            self.launch_timeout,
            Browser::launch(self.config(options)?),
        )
        .await
        .map_err(|_| BrowserError::timeout("browser launch", self.launch_timeout))?
        .map_err(|e| BrowserError::Launch(e.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!(error = %e, "browser handler stopped");
                    break;
                }
            }
        });

        let session = ChromiumSession {
            browser: Mutex::new(Some(browser)),
            handler: std::sync::Mutex::new(Some(handler_task)),
            first_page: std::sync::Mutex::new(None),
            closed: AtomicBool::new(false),
        };

        match session.open_first_page(url, options).await {
            Ok(page) => {
                if let Ok(mut slot) = session.first_page.lock() {
                    *slot = Some(page);
                }
                Ok(session)
            }
            Err(e) => {
                if let Err(close_err) = session.shutdown().await {
                    tracing::warn!(error = %close_err, "failed to close browser after launch error");
                }
                Err(e)
            }
        }
    }
}

impl BrowserLauncher for ChromiumLauncher {
    fn launch<'a>(
        &'a self,
        url: &'a str,
        options: &'a LaunchOptions,
    ) -> BoxFuture<'a, BrowserResult<Arc<dyn BrowserSession>>> {
        Box::pin(async move {
            let session = self.open(url, options).await?;
            tracing::info!(url, headless = options.headless, "browser session opened");
            Ok(Arc::new(session) as Arc<dyn BrowserSession>)
        })
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

pub struct ChromiumSession {
    browser: Mutex<Option<Browser>>,
    handler: std::sync::Mutex<Option<JoinHandle<()>>>,
    first_page: std::sync::Mutex<Option<Arc<ChromiumPage>>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for ChromiumSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChromiumSession")
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl ChromiumSession {
    async fn open_first_page(&self, url: &str, options: &LaunchOptions) -> BrowserResult<Arc<ChromiumPage>> {
        let guard = self.browser.lock().await;
        let browser = guard.as_ref().ok_or(BrowserError::Closed)?;
        let page = browser.new_page("about:blank").await.map_err(protocol)?;

        if !options.headers.is_empty() {
            let headers = serde_json::to_value(&options.headers).map_err(protocol)?;
            page.execute(SetExtraHttpHeadersParams::new(Headers::new(headers)))
                .await
                .map_err(protocol)?;
        }

        if !options.cookies.is_empty() {
            let cookies = options
                .cookies
                .iter()
                .map(|(name, value)| {
                    CookieParam::builder()
                        .name(name)
                        .value(value)
                        .url(url)
                        .path("/")
                        .build()
                        .map_err(BrowserError::Launch)
                })
                .collect::<BrowserResult<Vec<_>>>()?;
            page.set_cookies(cookies).await.map_err(protocol)?;
        }
        drop(guard);

        let page = Arc::new(ChromiumPage::new(page));
        page.navigate_to(url, Duration::from_millis(options.timeout_ms)).await?;
        Ok(page)
    }

    async fn target_ids(&self) -> BrowserResult<HashSet<String>> {
        let guard = self.browser.lock().await;
        let browser = guard.as_ref().ok_or(BrowserError::Closed)?;
        let pages = browser.pages().await.map_err(protocol)?;
        Ok(pages.iter().map(target_id).collect())
    }

    async fn shutdown(&self) -> BrowserResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        let browser = self.browser.lock().await.take();
        let result = match browser {
            Some(mut browser) => {
                let closed = browser.close().await.map(|_| ()).map_err(protocol);
                if let Err(e) = browser.wait().await {
                    tracing::debug!(error = %e, "browser process did not exit cleanly");
                }
                closed
            }
            None => Ok(()),
        };
        if let Some(task) = self.handler.lock().ok().and_then(|mut h| h.take()) {
            task.abort();
        }
        result
    }
}

impl BrowserSession for ChromiumSession {
    fn page(&self) -> Arc<dyn PageHandle> {
        match self.first_page.lock().ok().and_then(|p| p.clone()) {
            Some(page) => page,
            None => Arc::new(ClosedPage),
        }
    }

    fn wait_for_new_page(
        &self,
        timeout: Duration,
    ) -> BoxFuture<'_, BrowserResult<Option<Arc<dyn PageHandle>>>> {
        Box::pin(async move {
            let known = self.target_ids().await?;
            let deadline = tokio::time::Instant::now() + timeout;

            loop {
                {
                    let guard = self.browser.lock().await;
                    let browser = guard.as_ref().ok_or(BrowserError::Closed)?;
                    let pages = browser.pages().await.map_err(protocol)?;
                    if let Some(page) = pages.into_iter().find(|p| !known.contains(&target_id(p))) {
                        tracing::debug!("new page opened");
                        return Ok(Some(Arc::new(ChromiumPage::new(page)) as Arc<dyn PageHandle>));
                    }
                }
                if tokio::time::Instant::now() >= deadline {
                    return Ok(None);
                }
                tokio::time::sleep(POLL_INTERVAL * 2).await;
            }
        })
    }

    fn close(&self) -> BoxFuture<'_, BrowserResult<()>> {
        Box::pin(async move {
            if self.closed.swap(true, Ordering::SeqCst) {
                return Ok(());
            }
            self.shutdown().await?;
            tracing::info!("browser session closed");
            Ok(())
        })
    }
}

// ---------------------------------------------------------------------------
// Page
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ChromiumPage {
    page: Page,
}

impl ChromiumPage {
    fn new(page: Page) -> Self {
        Self { page }
    }

    async fn eval(&self, expression: &str) -> BrowserResult<Value> {
        let params = EvaluateParams::builder()
            .expression(expression)
            .await_promise(true)
            .return_by_value(true)
            .build()
            .map_err(BrowserError::Evaluation)?;
        let result = self
            .page
            .evaluate_expression(params)
            .await
            .map_err(|e| BrowserError::Evaluation(e.to_string()))?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }

    async fn eval_bool(&self, expression: &str) -> BrowserResult<bool> {
        Ok(self.eval(expression).await?.as_bool().unwrap_or(false))
    }

    /// Poll `expression` until it is truthy or `timeout` passes.
    async fn poll_until(&self, expression: &str, operation: &str, timeout: Duration) -> BrowserResult<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.eval_bool(expression).await? {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(BrowserError::timeout(operation, timeout));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn element(&self, selector: &str, timeout: Duration) -> BrowserResult<chromiumoxide::element::Element> {
        self.poll_until(&script::exists(selector), &format!("waiting for {selector}"), timeout)
            .await?;
        self.page
            .find_element(selector)
            .await
            .map_err(|_| BrowserError::ElementNotFound(selector.to_string()))
    }

    async fn navigate_to(&self, url: &str, timeout: Duration) -> BrowserResult<()> {
        tokio::time::timeout(timeout, self.page.goto(url))
            .await
            .map_err(|_| BrowserError::timeout(format!("navigation to {url}"), timeout))?
            .map_err(protocol)?;
        Ok(())
    }

    /// Run `trigger` and wait until the document is replaced or the URL changes.
    async fn navigation_after(&self, trigger: Option<&str>, timeout: Duration) -> BrowserResult<()> {
        let token = uuid::Uuid::now_v7().to_string();
        let start_href = self.eval(&script::set_navigation_marker(&token)).await?;
        if let Some(js) = trigger {
            self.eval(js).await?;
        }

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Evaluation fails transiently while the old context is torn down.
            if let Ok(Value::Array(probe)) = self.eval(&script::navigation_probe(&token)).await {
                let marker_present = probe.first().and_then(Value::as_bool).unwrap_or(false);
                let href = probe.get(1).cloned().unwrap_or(Value::Null);
                if !marker_present || href != start_href {
                    let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
                    return self.wait_for_state(LoadState::Load, remaining.max(POLL_INTERVAL)).await;
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(BrowserError::timeout("waiting for navigation", timeout));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn wait_for_state(&self, state: LoadState, timeout: Duration) -> BrowserResult<()> {
        self.poll_until(script::ready_state_reached(state), &format!("waiting for {state}"), timeout)
            .await?;
        if state == LoadState::NetworkIdle {
            tokio::time::sleep(NETWORK_IDLE_GRACE).await;
        }
        Ok(())
    }
}

impl PageHandle for ChromiumPage {
    fn url(&self) -> BoxFuture<'_, BrowserResult<String>> {
        Box::pin(async move {
            Ok(self.page.url().await.map_err(protocol)?.unwrap_or_default())
        })
    }

    fn title(&self) -> BoxFuture<'_, BrowserResult<String>> {
        Box::pin(async move {
            Ok(self.page.get_title().await.map_err(protocol)?.unwrap_or_default())
        })
    }

    fn content(&self) -> BoxFuture<'_, BrowserResult<String>> {
        Box::pin(async move { self.page.content().await.map_err(protocol) })
    }

    fn navigate<'a>(&'a self, url: &'a str, timeout: Duration) -> BoxFuture<'a, BrowserResult<()>> {
        Box::pin(self.navigate_to(url, timeout))
    }

    fn evaluate<'a>(&'a self, expression: &'a str) -> BoxFuture<'a, BrowserResult<Value>> {
        Box::pin(self.eval(expression))
    }

    fn call_function<'a>(&'a self, body: &'a str, arg: Value) -> BoxFuture<'a, BrowserResult<Value>> {
        Box::pin(async move { self.eval(&script::call_with_results(body, &arg)).await })
    }

    fn click<'a>(&'a self, selector: &'a str, timeout: Duration) -> BoxFuture<'a, BrowserResult<()>> {
        Box::pin(async move {
            self.element(selector, timeout).await?.click().await.map_err(protocol)?;
            Ok(())
        })
    }

    fn fill<'a>(
        &'a self,
        selector: &'a str,
        value: &'a str,
        timeout: Duration,
    ) -> BoxFuture<'a, BrowserResult<()>> {
        Box::pin(async move {
            self.poll_until(&script::exists(selector), &format!("waiting for {selector}"), timeout)
                .await?;
            if self.eval_bool(&script::fill(selector, value)).await? {
                Ok(())
            } else {
                Err(BrowserError::ElementNotFound(selector.to_string()))
            }
        })
    }

    fn type_text<'a>(
        &'a self,
        selector: &'a str,
        text: &'a str,
        delay: Duration,
    ) -> BoxFuture<'a, BrowserResult<()>> {
        Box::pin(async move {
            let element = self
                .page
                .find_element(selector)
                .await
                .map_err(|_| BrowserError::ElementNotFound(selector.to_string()))?;
            element.focus().await.map_err(protocol)?;
            let mut buf = [0u8; 4];
            for ch in text.chars() {
                element.type_str(ch.encode_utf8(&mut buf)).await.map_err(protocol)?;
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
            Ok(())
        })
    }

    fn press<'a>(&'a self, selector: Option<&'a str>, key: &'a str) -> BoxFuture<'a, BrowserResult<()>> {
        Box::pin(async move {
            let selector = selector.unwrap_or("body");
            let element = self
                .page
                .find_element(selector)
                .await
                .map_err(|_| BrowserError::ElementNotFound(selector.to_string()))?;
            element.press_key(key).await.map_err(protocol)?;
            Ok(())
        })
    }

    fn hover<'a>(&'a self, selector: &'a str, timeout: Duration) -> BoxFuture<'a, BrowserResult<()>> {
        Box::pin(async move {
            self.element(selector, timeout).await?.hover().await.map_err(protocol)?;
            Ok(())
        })
    }

    fn screenshot<'a>(
        &'a self,
        selector: Option<&'a str>,
        path: &'a Path,
        full_page: bool,
    ) -> BoxFuture<'a, BrowserResult<bool>> {
        Box::pin(async move {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| BrowserError::Io(e.to_string()))?;
            }
            match selector {
                Some(selector) => {
                    if !self.eval_bool(&script::exists(selector)).await? {
                        return Ok(false);
                    }
                    let element = self
                        .page
                        .find_element(selector)
                        .await
                        .map_err(|_| BrowserError::ElementNotFound(selector.to_string()))?;
                    element
                        .save_screenshot(CaptureScreenshotFormat::Png, path)
                        .await
                        .map_err(protocol)?;
                }
                None => {
                    let params = ScreenshotParams::builder()
                        .format(CaptureScreenshotFormat::Png)
                        .full_page(full_page)
                        .build();
                    self.page.save_screenshot(params, path).await.map_err(protocol)?;
                }
            }
            Ok(true)
        })
    }

    fn select_option<'a>(
        &'a self,
        selector: &'a str,
        values: &'a [String],
    ) -> BoxFuture<'a, BrowserResult<Vec<String>>> {
        Box::pin(async move {
            match self.eval(&script::select_option(selector, values)).await? {
                Value::Null => Err(BrowserError::ElementNotFound(selector.to_string())),
                selected => serde_json::from_value(selected).map_err(|e| BrowserError::Evaluation(e.to_string())),
            }
        })
    }

    fn set_checked<'a>(&'a self, selector: &'a str, checked: bool) -> BoxFuture<'a, BrowserResult<()>> {
        Box::pin(async move {
            if self.eval_bool(&script::set_checked(selector, checked)).await? {
                Ok(())
            } else {
                Err(BrowserError::ElementNotFound(selector.to_string()))
            }
        })
    }

    fn go_back(&self, timeout: Duration) -> BoxFuture<'_, BrowserResult<()>> {
        Box::pin(self.navigation_after(Some("history.back()"), timeout))
    }

    fn go_forward(&self, timeout: Duration) -> BoxFuture<'_, BrowserResult<()>> {
        Box::pin(self.navigation_after(Some("history.forward()"), timeout))
    }

    fn reload(&self, wait_until: LoadState, timeout: Duration) -> BoxFuture<'_, BrowserResult<()>> {
        Box::pin(async move {
            self.page.reload().await.map_err(protocol)?;
            self.wait_for_state(wait_until, timeout).await
        })
    }

    fn wait_for_selector<'a>(
        &'a self,
        selector: &'a str,
        timeout: Duration,
    ) -> BoxFuture<'a, BrowserResult<()>> {
        Box::pin(async move {
            self.poll_until(&script::exists(selector), &format!("waitForSelector {selector}"), timeout)
                .await
        })
    }

    fn wait_for_load_state(&self, state: LoadState, timeout: Duration) -> BoxFuture<'_, BrowserResult<()>> {
        Box::pin(self.wait_for_state(state, timeout))
    }

    fn wait_for_navigation(&self, timeout: Duration) -> BoxFuture<'_, BrowserResult<()>> {
        Box::pin(self.navigation_after(None, timeout))
    }

    fn query_all<'a>(&'a self, selector: &'a str) -> BoxFuture<'a, BrowserResult<Vec<ElementSnapshot>>> {
        Box::pin(async move {
            let value = self.eval(&script::query_all(selector)).await?;
            serde_json::from_value(value).map_err(|e| BrowserError::Evaluation(e.to_string()))
        })
    }
}

// ---------------------------------------------------------------------------
// Closed page
// ---------------------------------------------------------------------------

/// Stand-in returned by a session whose first page never opened.
struct ClosedPage;

impl PageHandle for ClosedPage {
    fn url(&self) -> BoxFuture<'_, BrowserResult<String>> {
        Box::pin(async { Err(BrowserError::Closed) })
    }
    fn title(&self) -> BoxFuture<'_, BrowserResult<String>> {
        Box::pin(async { Err(BrowserError::Closed) })
    }
    fn content(&self) -> BoxFuture<'_, BrowserResult<String>> {
        Box::pin(async { Err(BrowserError::Closed) })
    }
    fn navigate<'a>(&'a self, _: &'a str, _: Duration) -> BoxFuture<'a, BrowserResult<()>> {
        Box::pin(async { Err(BrowserError::Closed) })
    }
    fn evaluate<'a>(&'a self, _: &'a str) -> BoxFuture<'a, BrowserResult<Value>> {
        Box::pin(async { Err(BrowserError::Closed) })
    }
    fn call_function<'a>(&'a self, _: &'a str, _: Value) -> BoxFuture<'a, BrowserResult<Value>> {
        Box::pin(async { Err(BrowserError::Closed) })
    }
    fn click<'a>(&'a self, _: &'a str, _: Duration) -> BoxFuture<'a, BrowserResult<()>> {
        Box::pin(async { Err(BrowserError::Closed) })
    }
    fn fill<'a>(&'a self, _: &'a str, _: &'a str, _: Duration) -> BoxFuture<'a, BrowserResult<()>> {
        Box::pin(async { Err(BrowserError::Closed) })
    }
    fn type_text<'a>(&'a self, _: &'a str, _: &'a str, _: Duration) -> BoxFuture<'a, BrowserResult<()>> {
        Box::pin(async { Err(BrowserError::Closed) })
    }
    fn press<'a>(&'a self, _: Option<&'a str>, _: &'a str) -> BoxFuture<'a, BrowserResult<()>> {
        Box::pin(async { Err(BrowserError::Closed) })
    }
    fn hover<'a>(&'a self, _: &'a str, _: Duration) -> BoxFuture<'a, BrowserResult<()>> {
        Box::pin(async { Err(BrowserError::Closed) })
    }
    fn screenshot<'a>(&'a self, _: Option<&'a str>, _: &'a Path, _: bool) -> BoxFuture<'a, BrowserResult<bool>> {
        Box::pin(async { Err(BrowserError::Closed) })
    }
    fn select_option<'a>(&'a self, _: &'a str, _: &'a [String]) -> BoxFuture<'a, BrowserResult<Vec<String>>> {
        Box::pin(async { Err(BrowserError::Closed) })
    }
    fn set_checked<'a>(&'a self, _: &'a str, _: bool) -> BoxFuture<'a, BrowserResult<()>> {
        Box::pin(async { Err(BrowserError::Closed) })
    }
    fn go_back(&self, _: Duration) -> BoxFuture<'_, BrowserResult<()>> {
        Box::pin(async { Err(BrowserError::Closed) })
    }
    fn go_forward(&self, _: Duration) -> BoxFuture<'_, BrowserResult<()>> {
        Box::pin(async { Err(BrowserError::Closed) })
    }
    fn reload(&self, _: LoadState, _: Duration) -> BoxFuture<'_, BrowserResult<()>> {
        Box::pin(async { Err(BrowserError::Closed) })
    }
    fn wait_for_selector<'a>(&'a self, _: &'a str, _: Duration) -> BoxFuture<'a, BrowserResult<()>> {
        Box::pin(async { Err(BrowserError::Closed) })
    }
    fn wait_for_load_state(&self, _: LoadState, _: Duration) -> BoxFuture<'_, BrowserResult<()>> {
        Box::pin(async { Err(BrowserError::Closed) })
    }
    fn wait_for_navigation(&self, _: Duration) -> BoxFuture<'_, BrowserResult<()>> {
        Box::pin(async { Err(BrowserError::Closed) })
    }
    fn query_all<'a>(&'a self, _: &'a str) -> BoxFuture<'a, BrowserResult<Vec<ElementSnapshot>>> {
        Box::pin(async { Err(BrowserError::Closed) })
    }
}
