//! Workflow repository trait definition.
//!
//! Defines the storage interface for workflow graphs, run records and run
//! logs. The infrastructure layer (weaving-infra) implements this trait with
//! SQLite persistence.

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;
use weaving_types::error::RepositoryError;
use weaving_types::graph::GraphDefinition;
use weaving_types::run::{RunLogEntry, RunRecord, RunStatus};

/// The terminal state written when a run finishes.
#[derive(Debug, Clone, PartialEq)]
pub struct RunFinalization {
    pub status: RunStatus,
    pub end_time: DateTime<Utc>,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl RunFinalization {
    pub fn completed(result: Value) -> Self {
        Self {
            status: RunStatus::Completed,
            end_time: Utc::now(),
            result: Some(result),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Error,
            end_time: Utc::now(),
            result: None,
            error: Some(error.into()),
        }
    }

    pub fn stopped() -> Self {
        Self {
            status: RunStatus::Stopped,
            end_time: Utc::now(),
            result: None,
            error: None,
        }
    }
}

/// Repository trait for workflow persistence.
///
/// Covers three entity families:
/// - **Graphs:** the editor's node/edge JSON, keyed by workflow id.
/// - **Runs:** one record per execution, finalized exactly once.
/// - **Logs:** append-only per-node events of a run.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait WorkflowRepository: Send + Sync {
    // -----------------------------------------------------------------------
    // Graphs
    // -----------------------------------------------------------------------

    /// Upsert the graph stored for `workflow_id`.
    fn save_graph(
        &self,
        workflow_id: &str,
        graph: &GraphDefinition,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn load_graph(
        &self,
        workflow_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<GraphDefinition>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Runs
    // -----------------------------------------------------------------------

    fn create_run(
        &self,
        run: &RunRecord,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Move a `running` record into its terminal state.
    ///
    /// Returns `false` (and changes nothing) when the record is already
    /// terminal, so the first finalization wins.
    fn finalize_run(
        &self,
        instance_id: &Uuid,
        finalization: &RunFinalization,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Get a run with its most recent logs (newest first, at most
    /// [`weaving_types::run::STATUS_LOG_LIMIT`]).
    fn get_run(
        &self,
        instance_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<RunRecord>, RepositoryError>> + Send;

    /// Runs still marked `running` (left behind by a previous process).
    fn list_running_runs(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<RunRecord>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Logs
    // -----------------------------------------------------------------------

    /// Append a log entry. A finalized run is read-only, so entries for a
    /// run that is no longer `running` are dropped.
    fn append_log(
        &self,
        instance_id: &Uuid,
        entry: &RunLogEntry,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;
}
