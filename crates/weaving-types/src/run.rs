//! Run records: the durable trace of one workflow execution.
//!
//! A [`RunRecord`] is created in `running` state when a run starts and is
//! finalized exactly once into a terminal state. Per-node progress is kept as
//! an append-only list of [`RunLogEntry`] values.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Node id used for log entries that describe the run itself.
pub const SYSTEM_NODE_ID: &str = "system";

/// Maximum number of log entries returned with a status report.
pub const STATUS_LOG_LIMIT: usize = 100;

// ---------------------------------------------------------------------------
// Status enums
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Error,
    Stopped,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Error => "error",
            RunStatus::Stopped => "stopped",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "error" => Ok(RunStatus::Error),
            "stopped" => Ok(RunStatus::Stopped),
            other => Err(format!("invalid run status: '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    Running,
    Completed,
    Error,
    Stopped,
}

impl LogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStatus::Running => "running",
            LogStatus::Completed => "completed",
            LogStatus::Error => "error",
            LogStatus::Stopped => "stopped",
        }
    }
}

impl fmt::Display for LogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LogStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(LogStatus::Running),
            "completed" => Ok(LogStatus::Completed),
            "error" => Ok(LogStatus::Error),
            "stopped" => Ok(LogStatus::Stopped),
            other => Err(format!("invalid log status: '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One execution of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    /// UUIDv7 identifying this run.
    pub instance_id: Uuid,
    pub workflow_id: String,
    pub status: RunStatus,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// The End node's collected outputs, on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Most recent entries first, at most [`STATUS_LOG_LIMIT`] when read back.
    #[serde(default)]
    pub logs: Vec<RunLogEntry>,
}

impl RunRecord {
    /// A fresh record in `running` state.
    pub fn started(workflow_id: impl Into<String>) -> Self {
        Self {
            instance_id: Uuid::now_v7(),
            workflow_id: workflow_id.into(),
            status: RunStatus::Running,
            start_time: Utc::now(),
            end_time: None,
            result: None,
            error: None,
            logs: Vec::new(),
        }
    }
}

/// A single node-level (or run-level) event in a run's log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunLogEntry {
    pub node_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
    pub node_type: String,
    pub status: LogStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl RunLogEntry {
    pub fn new(
        node_id: impl Into<String>,
        node_type: impl Into<String>,
        status: LogStatus,
        message: impl Into<String>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            node_name: None,
            node_type: node_type.into(),
            status,
            message: message.into(),
            data: None,
            timestamp: Utc::now(),
        }
    }

    /// An entry describing the run itself rather than a node.
    pub fn system(status: LogStatus, message: impl Into<String>) -> Self {
        Self::new(SYSTEM_NODE_ID, SYSTEM_NODE_ID, status, message)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.node_name = Some(name.into());
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Answer to a status query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StatusReport {
    /// No record exists for the requested instance.
    NotExecuting,
    Run(RunRecord),
}

impl StatusReport {
    /// The reported status; an unknown instance reads as `stopped`.
    pub fn status(&self) -> RunStatus {
        match self {
            StatusReport::NotExecuting => RunStatus::Stopped,
            StatusReport::Run(record) => record.status,
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            StatusReport::NotExecuting => Some("not executed"),
            StatusReport::Run(record) => record.error.as_deref(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
