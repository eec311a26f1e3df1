//! Notification payload types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Subject line used for notifications raised by action-script guards.
pub const GUARD_NOTIFICATION_SUBJECT: &str = "《Weaving Flow》自动化流程通知";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        })
    }
}

/// A notification as delivered to webhook receivers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub subject: String,
    pub message: String,
    pub severity: Severity,
}
