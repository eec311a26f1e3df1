//! Webhook notifier.
//!
//! POSTs each notification as a JSON [`Notification`] body. Any non-2xx
//! response is a delivery failure carrying the status and response body.

use std::time::Duration;

use futures_util::future::BoxFuture;
use weaving_core::notify::{Notifier, NotifyError};
use weaving_types::notify::{Notification, Severity};

#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("weaving-flow/0.1")
            .build()
            .map_err(|e| NotifyError::Delivery(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn post(&self, notification: &Notification) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.url)
            .json(notification)
            .send()
            .await
            .map_err(|e| NotifyError::Delivery(format!("webhook request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Delivery(format!("webhook returned {status}: {body}")));
        }

        tracing::debug!(url = %self.url, subject = %notification.subject, "notification delivered");
        Ok(())
    }
}

impl Notifier for WebhookNotifier {
    fn notify<'a>(
        &'a self,
        subject: &'a str,
        message: &'a str,
        severity: Severity,
    ) -> BoxFuture<'a, Result<(), NotifyError>> {
        Box::pin(async move {
            let notification = Notification {
                subject: subject.to_string(),
                message: message.to_string(),
                severity,
            };
            self.post(&notification).await
        })
    }
}
