//! Scripted fakes for the browser and notification capabilities.
//!
//! `MockPage` records every primitive call as a short string (`"click #go"`)
//! so tests can assert on the exact sequence the interpreter issued. Waits that
//! are configured to fail sleep for their timeout first, so tests that use
//! them run with `start_paused = true`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde_json::Value;
use weaving_types::browser::{ElementSnapshot, LaunchOptions, LoadState};
use weaving_types::notify::Severity;

use crate::browser::{BrowserError, BrowserLauncher, BrowserResult, BrowserSession, PageHandle};
use crate::notify::{Notifier, NotifyError};

// ---------------------------------------------------------------------------
// MockPage
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MockPage {
    url: Mutex<String>,
    title: Mutex<String>,
    content: Mutex<String>,
    calls: Mutex<Vec<String>>,
    /// URLs returned by successive `url()` calls before settling on the last.
    scripted_urls: Mutex<VecDeque<String>>,
    /// Results of successive `evaluate`/`call_function` calls (default `null`).
    evaluations: Mutex<VecDeque<BrowserResult<Value>>>,
    function_args: Mutex<Vec<Value>>,
    missing: Mutex<HashSet<String>>,
    /// Selector -> number of timed-out waits before it appears.
    late_selectors: Mutex<HashMap<String, usize>>,
    /// Selector -> URL the page navigates to when it is clicked.
    click_navigations: Mutex<HashMap<String, String>>,
    pending_navigation: Mutex<Option<String>>,
    elements: Mutex<HashMap<String, Vec<ElementSnapshot>>>,
}

impl MockPage {
    pub fn new(url: &str) -> Arc<Self> {
        let page = Self::default();
        *page.url.lock().unwrap() = url.to_string();
        *page.title.lock().unwrap() = format!("title of {url}");
        *page.content.lock().unwrap() = format!("<html>{url}</html>");
        Arc::new(page)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_matching(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    pub fn current_url(&self) -> String {
        self.url.lock().unwrap().clone()
    }

    pub fn script_urls(&self, urls: &[&str]) {
        self.scripted_urls
            .lock()
            .unwrap()
            .extend(urls.iter().map(|u| u.to_string()));
    }

    pub fn push_evaluation(&self, result: BrowserResult<Value>) {
        self.evaluations.lock().unwrap().push_back(result);
    }

    pub fn function_args(&self) -> Vec<Value> {
        self.function_args.lock().unwrap().clone()
    }

    pub fn set_missing(&self, selector: &str) {
        self.missing.lock().unwrap().insert(selector.to_string());
    }

    pub fn appear_after(&self, selector: &str, timeouts: usize) {
        self.late_selectors
            .lock()
            .unwrap()
            .insert(selector.to_string(), timeouts);
    }

    pub fn navigate_on_click(&self, selector: &str, url: &str) {
        self.click_navigations
            .lock()
            .unwrap()
            .insert(selector.to_string(), url.to_string());
    }

    pub fn set_elements(&self, selector: &str, elements: Vec<ElementSnapshot>) {
        self.elements
            .lock()
            .unwrap()
            .insert(selector.to_string(), elements);
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn next_evaluation(&self) -> BrowserResult<Value> {
        self.evaluations
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(Value::Null))
    }

    /// `Ok` when the selector is present now. Each miss of a late selector
    /// counts down once.
    fn selector_state(&self, selector: &str) -> Result<(), ()> {
        if self.missing.lock().unwrap().contains(selector) {
            return Err(());
        }
        let mut late = self.late_selectors.lock().unwrap();
        match late.get_mut(selector) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(())
            }
            _ => Ok(()),
        }
    }

    async fn wait_selector(&self, operation: &str, selector: &str, timeout: Duration) -> BrowserResult<()> {
        if self.selector_state(selector).is_err() {
            tokio::time::sleep(timeout).await;
            return Err(BrowserError::timeout(format!("{operation} {selector}"), timeout));
        }
        Ok(())
    }
}

impl PageHandle for MockPage {
    fn url(&self) -> BoxFuture<'_, BrowserResult<String>> {
        Box::pin(async move {
            if let Some(next) = self.scripted_urls.lock().unwrap().pop_front() {
                *self.url.lock().unwrap() = next;
            }
            Ok(self.current_url())
        })
    }

    fn title(&self) -> BoxFuture<'_, BrowserResult<String>> {
        Box::pin(async move { Ok(self.title.lock().unwrap().clone()) })
    }

    fn content(&self) -> BoxFuture<'_, BrowserResult<String>> {
        Box::pin(async move { Ok(self.content.lock().unwrap().clone()) })
    }

    fn navigate<'a>(&'a self, url: &'a str, _timeout: Duration) -> BoxFuture<'a, BrowserResult<()>> {
        Box::pin(async move {
            self.record(format!("navigate {url}"));
            *self.url.lock().unwrap() = url.to_string();
            Ok(())
        })
    }

    fn evaluate<'a>(&'a self, expression: &'a str) -> BoxFuture<'a, BrowserResult<Value>> {
        Box::pin(async move {
            self.record(format!("evaluate {expression}"));
            self.next_evaluation()
        })
    }

    fn call_function<'a>(&'a self, body: &'a str, arg: Value) -> BoxFuture<'a, BrowserResult<Value>> {
        Box::pin(async move {
            self.record(format!("function {body}"));
            self.function_args.lock().unwrap().push(arg);
            self.next_evaluation()
        })
    }

    fn click<'a>(&'a self, selector: &'a str, timeout: Duration) -> BoxFuture<'a, BrowserResult<()>> {
        Box::pin(async move {
            self.wait_selector("click", selector, timeout).await?;
            self.record(format!("click {selector}"));
            if let Some(url) = self.click_navigations.lock().unwrap().get(selector).cloned() {
                *self.pending_navigation.lock().unwrap() = Some(url);
            }
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
            self.wait_selector("fill", selector, timeout).await?;
            self.record(format!("fill {selector}={value}"));
            Ok(())
        })
    }

    fn type_text<'a>(
        &'a self,
        selector: &'a str,
        text: &'a str,
        delay: Duration,
    ) -> BoxFuture<'a, BrowserResult<()>> {
        Box::pin(async move {
            self.record(format!("type {selector}={text} ({}ms)", delay.as_millis()));
            Ok(())
        })
    }

    fn press<'a>(&'a self, selector: Option<&'a str>, key: &'a str) -> BoxFuture<'a, BrowserResult<()>> {
        Box::pin(async move {
            self.record(format!("press {}:{key}", selector.unwrap_or("page")));
            Ok(())
        })
    }

    fn hover<'a>(&'a self, selector: &'a str, timeout: Duration) -> BoxFuture<'a, BrowserResult<()>> {
        Box::pin(async move {
            self.wait_selector("hover", selector, timeout).await?;
            self.record(format!("hover {selector}"));
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
            if let Some(selector) = selector
                && self.missing.lock().unwrap().contains(selector)
            {
                return Ok(false);
            }
            self.record(format!(
                "screenshot {} {} full={full_page}",
                selector.unwrap_or("page"),
                path.display()
            ));
            Ok(true)
        })
    }

    fn select_option<'a>(
        &'a self,
        selector: &'a str,
        values: &'a [String],
    ) -> BoxFuture<'a, BrowserResult<Vec<String>>> {
        Box::pin(async move {
            self.record(format!("select {selector}={}", values.join(",")));
            Ok(values.to_vec())
        })
    }

    fn set_checked<'a>(&'a self, selector: &'a str, checked: bool) -> BoxFuture<'a, BrowserResult<()>> {
        Box::pin(async move {
            self.record(format!("check {selector}={checked}"));
            Ok(())
        })
    }

    fn go_back(&self, _timeout: Duration) -> BoxFuture<'_, BrowserResult<()>> {
        Box::pin(async move {
            self.record("goBack".to_string());
            Ok(())
        })
    }

    fn go_forward(&self, _timeout: Duration) -> BoxFuture<'_, BrowserResult<()>> {
        Box::pin(async move {
            self.record("goForward".to_string());
            Ok(())
        })
    }

    fn reload(&self, wait_until: LoadState, _timeout: Duration) -> BoxFuture<'_, BrowserResult<()>> {
        Box::pin(async move {
            self.record(format!("reload {wait_until}"));
            Ok(())
        })
    }

    fn wait_for_selector<'a>(
        &'a self,
        selector: &'a str,
        timeout: Duration,
    ) -> BoxFuture<'a, BrowserResult<()>> {
        Box::pin(async move {
            self.record(format!("waitForSelector {selector}"));
            self.wait_selector("waitForSelector", selector, timeout).await
        })
    }

    fn wait_for_load_state(&self, state: LoadState, _timeout: Duration) -> BoxFuture<'_, BrowserResult<()>> {
        Box::pin(async move {
            self.record(format!("waitForLoadState {state}"));
            Ok(())
        })
    }

    fn wait_for_navigation(&self, timeout: Duration) -> BoxFuture<'_, BrowserResult<()>> {
        Box::pin(async move {
            let pending = self.pending_navigation.lock().unwrap().take();
            match pending {
                Some(url) => {
                    *self.url.lock().unwrap() = url;
                    Ok(())
                }
                None => {
                    tokio::time::sleep(timeout).await;
                    Err(BrowserError::timeout("waitForNavigation", timeout))
                }
            }
        })
    }

    fn query_all<'a>(&'a self, selector: &'a str) -> BoxFuture<'a, BrowserResult<Vec<ElementSnapshot>>> {
        Box::pin(async move {
            self.record(format!("queryAll {selector}"));
            Ok(self
                .elements
                .lock()
                .unwrap()
                .get(selector)
                .cloned()
                .unwrap_or_default())
        })
    }
}

// ---------------------------------------------------------------------------
// MockSession / MockLauncher
// ---------------------------------------------------------------------------

pub struct MockSession {
    pub page: Arc<MockPage>,
    popups: Mutex<VecDeque<Arc<MockPage>>>,
    closes: AtomicUsize,
}

impl MockSession {
    pub fn new(page: Arc<MockPage>) -> Arc<Self> {
        Arc::new(Self {
            page,
            popups: Mutex::new(VecDeque::new()),
            closes: AtomicUsize::new(0),
        })
    }

    /// Queue a page that the next `wait_for_new_page` resolves with.
    pub fn queue_popup(&self, page: Arc<MockPage>) {
        self.popups.lock().unwrap().push_back(page);
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl BrowserSession for MockSession {
    fn page(&self) -> Arc<dyn PageHandle> {
        self.page.clone()
    }

    fn wait_for_new_page(
        &self,
        timeout: Duration,
    ) -> BoxFuture<'_, BrowserResult<Option<Arc<dyn PageHandle>>>> {
        Box::pin(async move {
            let popup = self.popups.lock().unwrap().pop_front();
            match popup {
                Some(page) => Ok(Some(page as Arc<dyn PageHandle>)),
                None => {
                    tokio::time::sleep(timeout).await;
                    Ok(None)
                }
            }
        })
    }

    fn close(&self) -> BoxFuture<'_, BrowserResult<()>> {
        Box::pin(async move {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}

type PageSetup = Box<dyn Fn(&MockPage) + Send + Sync>;

/// Launches a fresh `MockSession` per call and keeps every one it made.
#[derive(Default)]
pub struct MockLauncher {
    setup: Option<PageSetup>,
    fail_with: Option<String>,
    sessions: Mutex<Vec<Arc<MockSession>>>,
    launches: Mutex<Vec<(String, LaunchOptions)>>,
}

impl MockLauncher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Configure every page this launcher opens.
    pub fn with_setup(setup: impl Fn(&MockPage) + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            setup: Some(Box::new(setup)),
            ..Self::default()
        })
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            fail_with: Some(message.to_string()),
            ..Self::default()
        })
    }

    pub fn sessions(&self) -> Vec<Arc<MockSession>> {
        self.sessions.lock().unwrap().clone()
    }

    pub fn launches(&self) -> Vec<(String, LaunchOptions)> {
        self.launches.lock().unwrap().clone()
    }
}

impl BrowserLauncher for MockLauncher {
    fn launch<'a>(
        &'a self,
        url: &'a str,
        options: &'a LaunchOptions,
    ) -> BoxFuture<'a, BrowserResult<Arc<dyn BrowserSession>>> {
        Box::pin(async move {
            self.launches
                .lock()
                .unwrap()
                .push((url.to_string(), options.clone()));
            if let Some(message) = &self.fail_with {
                return Err(BrowserError::Launch(message.clone()));
            }
            let page = MockPage::new(url);
            if let Some(setup) = &self.setup {
                setup(page.as_ref());
            }
            let session = MockSession::new(page);
            self.sessions.lock().unwrap().push(session.clone());
            Ok(session as Arc<dyn BrowserSession>)
        })
    }
}

// ---------------------------------------------------------------------------
// RecordingNotifier
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingNotifier {
    fail: bool,
    sent: Mutex<Vec<(String, String, Severity)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records each notification, then reports a delivery failure.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<(String, String, Severity)> {
        self.sent.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify<'a>(
        &'a self,
        subject: &'a str,
        message: &'a str,
        severity: Severity,
    ) -> BoxFuture<'a, Result<(), NotifyError>> {
        Box::pin(async move {
            self.sent
                .lock()
                .unwrap()
                .push((subject.to_string(), message.to_string(), severity));
            if self.fail {
                return Err(NotifyError::Delivery("webhook unreachable".to_string()));
            }
            Ok(())
        })
    }
}
