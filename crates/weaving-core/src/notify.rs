//! Notification capability.
//!
//! Nodes raise notifications (for example when an action-script guard fires)
//! through a [`Notifier`]. Delivery is best-effort: a failed notification is
//! logged and never fails the node that raised it.

use futures_util::future::BoxFuture;
use weaving_types::notify::Severity;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

/// Delivers a subject/message pair to some out-of-band channel.
pub trait Notifier: Send + Sync {
    fn notify<'a>(
        &'a self,
        subject: &'a str,
        message: &'a str,
        severity: Severity,
    ) -> BoxFuture<'a, Result<(), NotifyError>>;
}

/// Send a notification, logging instead of propagating any failure.
pub async fn notify_best_effort(
    notifier: &dyn Notifier,
    subject: &str,
    message: &str,
    severity: Severity,
) {
    if let Err(e) = notifier.notify(subject, message, severity).await {
        tracing::warn!(subject, error = %e, "notification failed");
    }
}
