//! Browser node: opens a page, runs its action script and publishes the page.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use weaving_types::action::Guard;
use weaving_types::browser::LaunchOptions;
use weaving_types::node::BrowserConfig;

use super::{ExecEnv, NodeError, NodeValue, Slots};
use crate::browser::BrowserSession;
use crate::workflow::script::{ScriptEnv, ScriptInterpreter};

pub(super) const INPUTS: &[&str] = &["url"];
pub(super) const OUTPUTS: &[&str] = &["browser", "page", "url", "title", "results", "steps", "error"];

pub struct BrowserNode {
    config: BrowserConfig,
    guard: Option<Guard>,
    /// The session this node launched and still owns.
    session: Option<Arc<dyn BrowserSession>>,
}

impl fmt::Debug for BrowserNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrowserNode")
            .field("config", &self.config)
            .field("guard", &self.guard)
            .field("session_open", &self.session.is_some())
            .finish()
    }
}

impl BrowserNode {
    /// Fails when the `beforeScript` guard is malformed.
    pub fn new(config: BrowserConfig) -> Result<Self, NodeError> {
        let guard = match &config.before_script {
            Some(before) => before
                .to_guard()
                .map_err(|e| NodeError::Config(format!("invalid beforeScript: {e}")))?,
            None => None,
        };
        Ok(Self {
            config,
            guard,
            session: None,
        })
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    fn launch_options(&self, headless_override: Option<bool>) -> LaunchOptions {
        LaunchOptions {
            width: self.config.width,
            height: self.config.height,
            user_agent: self.config.user_agent.clone(),
            proxy: self.config.proxy.clone().filter(|p| !p.is_empty()),
            cookies: self.config.cookies.clone(),
            headers: self.config.headers.clone(),
            timeout_ms: self.config.timeout,
            headless: headless_override.unwrap_or(!self.config.visible),
        }
    }

    pub(super) async fn execute(&mut self, slots: &mut Slots, env: &ExecEnv<'_>) -> Result<(), NodeError> {
        // A revisit starts from a fresh session.
        self.cleanup(env.node_id).await;

        let result = self.run(slots, env).await;
        if let Err(e) = &result {
            tracing::error!(node_id = env.node_id, error = %e, "browser node failed");
            slots.set_output("error", json!(e.to_string()));
        }
        result
    }

    async fn run(&mut self, slots: &mut Slots, env: &ExecEnv<'_>) -> Result<(), NodeError> {
        let url = slots
            .input_str("url")
            .map(str::to_string)
            .or_else(|| self.config.url.clone().filter(|u| !u.is_empty()))
            .ok_or_else(|| NodeError::Config("browser node requires a url".to_string()))?;
        let launcher = env
            .ctx
            .capabilities
            .browser
            .as_ref()
            .ok_or_else(|| NodeError::Config("no browser capability is configured".to_string()))?;

        let options = self.launch_options(env.ctx.capabilities.headless_override);
        tracing::info!(node_id = env.node_id, url = %url, headless = options.headless, "launching browser");
        let session = launcher.launch(&url, &options).await?;
        self.session = Some(session.clone());

        let script_env = ScriptEnv {
            flow_name: &env.ctx.flow_name,
            node_name: env.node_name,
            notifier: env.ctx.capabilities.notifier.as_ref(),
            cancel: &env.ctx.cancel,
            default_timeout: Duration::from_millis(self.config.timeout),
        };
        let outcome = ScriptInterpreter::new(&self.config.scripts, self.guard.as_ref(), script_env)
            .run(session.as_ref())
            .await?;

        let page_url = outcome.page.url().await?;
        let title = outcome.page.title().await?;
        tracing::info!(
            node_id = env.node_id,
            url = %page_url,
            steps = outcome.steps.len(),
            "action script finished"
        );

        slots.set_output("browser", NodeValue::page(outcome.page.clone(), page_url.clone()));
        slots.set_output("page", NodeValue::page(outcome.page, page_url.clone()));
        slots.set_output("url", json!(page_url));
        slots.set_output("title", json!(title));
        slots.set_output("results", Value::Array(outcome.results));
        slots.set_output("steps", json!(outcome.steps));
        Ok(())
    }

    /// Close the owned session, if any. The handle is taken first, so a
    /// second call does nothing.
    pub(super) async fn cleanup(&mut self, node_id: &str) {
        let Some(session) = self.session.take() else {
            return;
        };
        match session.close().await {
            Ok(()) => tracing::debug!(node_id, "browser session closed"),
            Err(e) => tracing::warn!(node_id, error = %e, "failed to close browser session"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use weaving_types::graph::{NodeDefinition, NodeKind};

    use super::*;
    use crate::test_support::MockLauncher;
    use crate::workflow::node::{Capabilities, Node, NodeContext, NodeVariant};

    fn browser_node(data: Value) -> Node {
        Node::from_definition(&NodeDefinition {
            id: "b1".to_string(),
            kind: NodeKind::Browser,
            name: Some("Open shop".to_string()),
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

    fn has_session(node: &Node) -> bool {
        match node.variant() {
            NodeVariant::Browser(b) => b.has_session(),
            _ => false,
        }
    }

    #[tokio::test]
    async fn publishes_page_and_script_results() {
        let launcher = MockLauncher::with_setup(|page| page.push_evaluation(Ok(json!("Widgets"))));
        let ctx = context(&launcher);
        let mut node = browser_node(json!({
            "url": "https://shop.example",
            "scripts": [{"type": "evaluate", "expression": "document.title"}]
        }));

        node.execute(&ctx).await.unwrap();

        assert_eq!(node.output("url").and_then(NodeValue::as_json), Some(&json!("https://shop.example")));
        assert_eq!(
            node.output("title").and_then(NodeValue::as_json),
            Some(&json!("title of https://shop.example"))
        );
        assert_eq!(node.output("results").and_then(NodeValue::as_json), Some(&json!(["Widgets"])));
        assert!(node.output("page").and_then(NodeValue::as_page).is_some());
        assert!(node.output("browser").and_then(NodeValue::as_page).is_some());
        let steps = node.output("steps").and_then(NodeValue::as_json).unwrap();
        assert_eq!(steps[0]["action"], json!("evaluate"));
        assert!(node.output("error").is_none());
    }

    #[tokio::test]
    async fn url_input_and_visibility_drive_launch() {
        let launcher = MockLauncher::new();
        let ctx = context(&launcher);
        let mut node = browser_node(json!({
            "url": "https://config.example",
            "visible": false,
            "width": 800,
            "userAgent": "weave-test"
        }));
        node.set_input("url", json!("https://input.example"));

        node.execute(&ctx).await.unwrap();

        let launches = launcher.launches();
        assert_eq!(launches.len(), 1);
        assert_eq!(launches[0].0, "https://input.example");
        assert!(launches[0].1.headless);
        assert_eq!(launches[0].1.width, 800);
        assert_eq!(launches[0].1.user_agent.as_deref(), Some("weave-test"));
    }

    #[tokio::test]
    async fn headless_override_wins_over_visible() {
        let launcher = MockLauncher::new();
        let mut ctx = context(&launcher);
        ctx.capabilities.headless_override = Some(true);
        let mut node = browser_node(json!({"url": "https://example.com", "visible": true}));

        node.execute(&ctx).await.unwrap();
        assert!(launcher.launches()[0].1.headless);
    }

    #[tokio::test]
    async fn script_failure_sets_error_and_cleanup_closes_once() {
        let launcher = MockLauncher::with_setup(|page| {
            page.push_evaluation(Err(crate::browser::BrowserError::Evaluation("boom".into())))
        });
        let ctx = context(&launcher);
        let mut node = browser_node(json!({
            "url": "https://example.com",
            "scripts": [{"type": "evaluate", "expression": "boom()"}]
        }));

        let err = node.execute(&ctx).await.unwrap_err();
        assert!(matches!(err, NodeError::Script(_)));
        let message = node.output("error").and_then(NodeValue::as_json).unwrap();
        assert!(message.as_str().unwrap().contains("boom"));
        assert!(has_session(&node));

        node.cleanup().await;
        node.cleanup().await;
        assert!(!has_session(&node));
        assert_eq!(launcher.sessions()[0].close_count(), 1);
    }

    #[tokio::test]
    async fn revisit_closes_previous_session() {
        let launcher = MockLauncher::new();
        let ctx = context(&launcher);
        let mut node = browser_node(json!({"url": "https://example.com"}));

        node.execute(&ctx).await.unwrap();
        node.prepare_revisit();
        node.execute(&ctx).await.unwrap();

        let sessions = launcher.sessions();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].close_count(), 1);
        assert_eq!(sessions[1].close_count(), 0);
    }

    #[tokio::test]
    async fn missing_url_or_launcher_is_a_config_error() {
        let launcher = MockLauncher::new();
        let mut node = browser_node(json!({}));
        let err = node.execute(&context(&launcher)).await.unwrap_err();
        assert!(matches!(err, NodeError::Config(msg) if msg.contains("url")));

        let mut node = browser_node(json!({"url": "https://example.com"}));
        let ctx = NodeContext::new("flow", Capabilities::default());
        let err = node.execute(&ctx).await.unwrap_err();
        assert!(matches!(err, NodeError::Config(msg) if msg.contains("browser capability")));
    }
}
