//! Global configuration types for Weaving Flow.
//!
//! `WeaveConfig` represents the top-level `config.toml` that controls the
//! browser adapter, notification delivery and run supervision.

use serde::{Deserialize, Serialize};

/// Top-level configuration. Loaded from `~/.weave/config.toml`; every field
/// has a default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeaveConfig {
    /// SQLite URL; defaults to `sqlite://{data_dir}/weave.db`.
    pub database_url: Option<String>,
    pub browser: BrowserSettings,
    pub notifications: NotificationSettings,
    pub supervisor: SupervisorSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    /// Force every session headless (`true`) or headed (`false`),
    /// overriding each node's `visible` flag.
    pub headless_override: Option<bool>,
    /// Chrome/Chromium binary; auto-detected when absent.
    pub executable: Option<String>,
    pub launch_timeout_secs: u64,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless_override: None,
            executable: None,
            launch_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    /// POST target for notifications; log-only when absent.
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorSettings {
    /// How long `shutdown` waits for cancelled runs to clean up.
    pub shutdown_grace_secs: u64,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self { shutdown_grace_secs: 10 }
    }
}
