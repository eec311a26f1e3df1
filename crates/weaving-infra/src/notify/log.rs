//! Notifier that writes to the tracing log.

use futures_util::future::BoxFuture;
use weaving_core::notify::{Notifier, NotifyError};
use weaving_types::notify::Severity;

#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify<'a>(
        &'a self,
        subject: &'a str,
        message: &'a str,
        severity: Severity,
    ) -> BoxFuture<'a, Result<(), NotifyError>> {
        Box::pin(async move {
            match severity {
                Severity::Info => tracing::info!(subject, "{message}"),
                Severity::Warning => tracing::warn!(subject, "{message}"),
                Severity::Error => tracing::error!(subject, "{message}"),
            }
            Ok(())
        })
    }
}
