//! Notifier implementations.
//!
//! `LogNotifier` writes notifications to the tracing log and is always
//! available. `WebhookNotifier` POSTs them as JSON when a webhook URL is
//! configured.

pub mod log;
pub mod webhook;

use std::sync::Arc;
use std::time::Duration;

use weaving_core::notify::Notifier;
use weaving_types::config::NotificationSettings;

pub use self::log::LogNotifier;
pub use self::webhook::WebhookNotifier;

/// Delivery timeout for webhook POSTs.
pub const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Choose the notifier for the given settings: webhook when a URL is set,
/// log-only otherwise.
pub fn notifier_from_settings(settings: &NotificationSettings) -> Arc<dyn Notifier> {
    match settings.webhook_url.as_deref().filter(|u| !u.trim().is_empty()) {
        Some(url) => match WebhookNotifier::new(url, WEBHOOK_TIMEOUT) {
            Ok(notifier) => Arc::new(notifier),
            Err(e) => {
                tracing::warn!(error = %e, "webhook notifier unavailable, falling back to log");
                Arc::new(LogNotifier)
            }
        },
        None => Arc::new(LogNotifier),
    }
}
