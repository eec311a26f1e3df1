//! Crawler node: fetch one page headlessly and extract content from it.

use std::time::Duration;

use serde_json::{Value, json};
use weaving_types::browser::LaunchOptions;
use weaving_types::node::{CrawlerConfig, WaitFor, value_as_u64};

use super::{ExecEnv, NodeError, Slots};
use crate::browser::BrowserSession;
use crate::workflow::script::{WaitError, sleep, wait_for_selector_retrying};

pub(super) const INPUTS: &[&str] = &["url", "selector", "waitFor", "isHeadless"];
pub(super) const OUTPUTS: &[&str] = &["result", "error"];

/// Per-attempt timeout while waiting for the `waitFor` selector.
const SELECTOR_WAIT: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub struct CrawlerNode {
    config: CrawlerConfig,
}

impl CrawlerNode {
    pub fn new(config: CrawlerConfig) -> Self {
        Self { config }
    }

    pub(super) async fn execute(&mut self, slots: &mut Slots, env: &ExecEnv<'_>) -> Result<(), NodeError> {
        match self.crawl(slots, env).await {
            Ok(data) => {
                slots.set_output("result", json!({ "success": true, "data": data, "error": null }));
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                tracing::error!(node_id = env.node_id, error = %message, "crawl failed");
                slots.set_output("result", json!({ "success": false, "data": null, "error": message }));
                slots.set_output("error", json!(message));
                Err(e)
            }
        }
    }

    async fn crawl(&self, slots: &Slots, env: &ExecEnv<'_>) -> Result<Value, NodeError> {
        let url = slots
            .input_str("url")
            .map(str::to_string)
            .or_else(|| self.config.url.clone().filter(|u| !u.is_empty()))
            .ok_or_else(|| NodeError::Config("crawler node requires a url".to_string()))?;
        let selector = slots
            .input_str("selector")
            .map(str::to_string)
            .or_else(|| self.config.selector.clone().filter(|s| !s.is_empty()));
        let wait_for = slots
            .input_json("waitFor")
            .and_then(parse_wait_for)
            .or_else(|| self.config.wait_for.clone());
        let headless = slots
            .input_json("isHeadless")
            .and_then(Value::as_bool)
            .or(self.config.is_headless)
            .unwrap_or(true);

        let launcher = env
            .ctx
            .capabilities
            .browser
            .as_ref()
            .ok_or_else(|| NodeError::Config("no browser capability is configured".to_string()))?;
        let options = LaunchOptions {
            headless: env.ctx.capabilities.headless_override.unwrap_or(headless),
            ..LaunchOptions::default()
        };

        tracing::info!(node_id = env.node_id, url = %url, selector = ?selector, "crawling page");
        let session = launcher.launch(&url, &options).await?;
        let collected = collect(session.as_ref(), selector.as_deref(), wait_for.as_ref(), env).await;
        if let Err(e) = session.close().await {
            tracing::warn!(node_id = env.node_id, error = %e, "failed to close crawler session");
        }
        collected
    }
}

fn parse_wait_for(value: &Value) -> Option<WaitFor> {
    match value {
        Value::Number(_) => value_as_u64(value).map(WaitFor::Millis),
        Value::String(s) if !s.trim().is_empty() => Some(WaitFor::Selector(s.clone())),
        _ => None,
    }
}

async fn collect(
    session: &dyn BrowserSession,
    selector: Option<&str>,
    wait_for: Option<&WaitFor>,
    env: &ExecEnv<'_>,
) -> Result<Value, NodeError> {
    let page = session.page();
    match wait_for {
        Some(WaitFor::Selector(target)) => {
            wait_for_selector_retrying(page.as_ref(), target, SELECTOR_WAIT, &env.ctx.cancel)
                .await
                .map_err(|e| match e {
                    WaitError::Cancelled => NodeError::Cancelled,
                    WaitError::Browser(source) => NodeError::Browser(source),
                })?;
        }
        Some(WaitFor::Millis(ms)) => sleep(&env.ctx.cancel, Duration::from_millis(*ms)).await?,
        None => {}
    }

    match selector {
        Some(selector) => {
            let elements = page.query_all(selector).await?;
            Ok(json!(elements))
        }
        None => Ok(json!(page.content().await?)),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use weaving_types::browser::ElementSnapshot;
    use weaving_types::graph::{NodeDefinition, NodeKind};

    use super::*;
    use crate::test_support::MockLauncher;
    use crate::workflow::node::{Capabilities, Node, NodeContext, NodeValue};

    fn crawler(data: Value) -> Node {
        Node::from_definition(&NodeDefinition {
            id: "c1".to_string(),
            kind: NodeKind::Crawler,
            name: None,
            data,
        })
        .unwrap()
    }

    fn context(launcher: &Arc<MockLauncher>) -> NodeContext {
        NodeContext::new(
            "flow",
            Capabilities {
                browser: Some(launcher.clone()),
                ..Capabilities::default()
            },
        )
    }

    #[tokio::test]
    async fn selector_crawl_returns_elements_and_closes() {
        let launcher = MockLauncher::with_setup(|page| {
            page.set_elements(
                "li a",
                vec![ElementSnapshot {
                    text: "Rust".into(),
                    html: "<a href=\"/rust\">Rust</a>".into(),
                    href: Some("/rust".into()),
                }],
            )
        });
        let mut node = crawler(json!({"url": "https://news.example", "selector": "li a"}));

        node.execute(&context(&launcher)).await.unwrap();

        let result = node.output("result").and_then(NodeValue::as_json).unwrap();
        assert_eq!(result["success"], json!(true));
        assert_eq!(result["data"][0]["text"], json!("Rust"));
        assert_eq!(result["data"][0]["href"], json!("/rust"));
        assert!(launcher.launches()[0].1.headless);
        assert_eq!(launcher.sessions()[0].close_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_selector_then_reads_content() {
        let launcher = MockLauncher::with_setup(|page| page.appear_after("#ready", 1));
        let mut node = crawler(json!({"url": "https://example.com"}));
        node.set_input("waitFor", json!("#ready"));
        node.set_input("isHeadless", json!(false));

        node.execute(&context(&launcher)).await.unwrap();

        let page = launcher.sessions()[0].page.clone();
        assert_eq!(page.calls_matching("waitForSelector #ready"), 2);
        let result = node.output("result").and_then(NodeValue::as_json).unwrap();
        assert_eq!(result["data"], json!("<html>https://example.com</html>"));
        assert!(!launcher.launches()[0].1.headless);
    }

    #[tokio::test]
    async fn launch_failure_reports_unsuccessful_result() {
        let launcher = MockLauncher::failing("no chrome");
        let mut node = crawler(json!({"url": "https://example.com"}));

        let err = node.execute(&context(&launcher)).await.unwrap_err();

        assert!(matches!(err, NodeError::Browser(_)));
        let result = node.output("result").and_then(NodeValue::as_json).unwrap();
        assert_eq!(result["success"], json!(false));
        assert!(result["error"].as_str().unwrap().contains("no chrome"));
        assert!(node.output("error").is_some());
    }

    #[test]
    fn wait_for_input_accepts_number_or_selector() {
        assert_eq!(parse_wait_for(&json!(250)), Some(WaitFor::Millis(250)));
        assert_eq!(parse_wait_for(&json!("#list")), Some(WaitFor::Selector("#list".into())));
        assert_eq!(parse_wait_for(&json!("")), None);
        assert_eq!(parse_wait_for(&json!(true)), None);
    }
}
