//! Run supervision: one engine per run, at most one live run per workflow.
//!
//! [`RunSupervisor`] owns the registry of in-flight runs. `execute` builds a
//! [`WorkflowEngine`] from the stored graph, claims the workflow's slot,
//! writes a `running` record and spawns the run on tokio. Every node dispatch
//! goes through [`RunHooks`], which turns a stop request into a cancellation
//! error and writes the per-node run log.
//!
//! Stopping is cooperative. The run's token is observed at each node boundary
//! and at the interpreter's waits; a primitive browser call already in flight
//! finishes first. The record, however, is finalized as `stopped` as soon as
//! the stop is requested, and the run's own finalization later becomes a
//! no-op (first writer wins).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::future::{BoxFuture, join_all};
use serde::Serialize;
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use weaving_types::error::RepositoryError;
use weaving_types::run::{LogStatus, RunLogEntry, RunRecord, RunStatus, StatusReport};

use super::engine::{EngineError, WorkflowEngine};
use super::hooks::ExecutionHooks;
use super::node::{Capabilities, Node, NodeContext, NodeError};
use crate::repository::workflow::{RunFinalization, WorkflowRepository};

// ---------------------------------------------------------------------------
// Errors and handles
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("workflow '{0}' is already running")]
    AlreadyRunning(String),

    #[error("workflow '{0}' not found")]
    WorkflowNotFound(String),

    #[error("run {0} not found")]
    NotFound(Uuid),

    #[error("run {0} is not running")]
    NotRunning(Uuid),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// What `execute` hands back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunHandleInfo {
    pub instance_id: Uuid,
    pub workflow_id: String,
    pub status: RunStatus,
}

struct ActiveRun {
    workflow_id: String,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

/// Live runs, keyed both ways.
#[derive(Default)]
struct RunRegistry {
    /// workflow id -> instance id of its live run.
    workflows: DashMap<String, Uuid>,
    runs: DashMap<Uuid, ActiveRun>,
}

impl RunRegistry {
    fn release(&self, instance_id: &Uuid, workflow_id: &str) {
        self.runs.remove(instance_id);
        self.workflows.remove_if(workflow_id, |_, live| live == instance_id);
    }
}

// ---------------------------------------------------------------------------
// RunSupervisor
// ---------------------------------------------------------------------------

pub struct RunSupervisor<R: WorkflowRepository> {
    repo: Arc<R>,
    capabilities: Capabilities,
    registry: Arc<RunRegistry>,
}

impl<R: WorkflowRepository + 'static> RunSupervisor<R> {
    pub fn new(repo: R, capabilities: Capabilities) -> Self {
        Self {
            repo: Arc::new(repo),
            capabilities,
            registry: Arc::new(RunRegistry::default()),
        }
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    /// Start a run of `workflow_id` with no run parameters.
    pub async fn execute(&self, workflow_id: &str) -> Result<RunHandleInfo, SupervisorError> {
        self.execute_with_params(workflow_id, HashMap::new()).await
    }

    /// Start a run, passing `params` to the Start node.
    pub async fn execute_with_params(
        &self,
        workflow_id: &str,
        params: HashMap<String, Value>,
    ) -> Result<RunHandleInfo, SupervisorError> {
        let graph = self
            .repo
            .load_graph(workflow_id)
            .await?
            .ok_or_else(|| SupervisorError::WorkflowNotFound(workflow_id.to_string()))?;

        let record = RunRecord::started(workflow_id);
        let instance_id = record.instance_id;
        let cancel = CancellationToken::new();
        let ctx = NodeContext {
            flow_name: workflow_id.to_string(),
            capabilities: self.capabilities.clone(),
            cancel: cancel.clone(),
        };
        let hooks = RunHooks {
            repo: self.repo.clone(),
            instance_id,
            cancel: cancel.clone(),
        };
        let engine = WorkflowEngine::from_definition(&graph, ctx)?.with_hooks(Arc::new(hooks));

        match self.registry.workflows.entry(workflow_id.to_string()) {
            Entry::Occupied(_) => return Err(SupervisorError::AlreadyRunning(workflow_id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(instance_id);
            }
        }

        if let Err(e) = self.repo.create_run(&record).await {
            self.registry.release(&instance_id, workflow_id);
            return Err(e.into());
        }
        self.registry.runs.insert(
            instance_id,
            ActiveRun {
                workflow_id: workflow_id.to_string(),
                cancel,
                task: None,
            },
        );

        tracing::info!(run_id = %instance_id, workflow_id, "workflow run started");
        let task = tokio::spawn(drive(
            self.repo.clone(),
            self.registry.clone(),
            engine,
            instance_id,
            workflow_id.to_string(),
            params,
        ));
        if let Some(mut run) = self.registry.runs.get_mut(&instance_id) {
            run.task = Some(task);
        }

        Ok(RunHandleInfo {
            instance_id,
            workflow_id: workflow_id.to_string(),
            status: RunStatus::Running,
        })
    }

    /// Request a stop. The record is finalized as `stopped` immediately.
    pub async fn stop(&self, instance_id: &Uuid) -> Result<(), SupervisorError> {
        let token = self
            .registry
            .runs
            .get(instance_id)
            .map(|run| run.cancel.clone());

        match token {
            Some(token) if token.is_cancelled() => Err(SupervisorError::NotRunning(*instance_id)),
            Some(token) => {
                token.cancel();
                self.finalize_stopped(instance_id, "workflow stopped by user").await?;
                tracing::info!(run_id = %instance_id, "workflow run stopped");
                Ok(())
            }
            None => {
                let record = self
                    .repo
                    .get_run(instance_id)
                    .await?
                    .ok_or(SupervisorError::NotFound(*instance_id))?;
                if record.status.is_terminal() {
                    return Err(SupervisorError::NotRunning(*instance_id));
                }
                // A `running` record nobody in this process owns.
                self.finalize_stopped(instance_id, "workflow stopped by user (run was not active in this process)")
                    .await?;
                Ok(())
            }
        }
    }

    async fn finalize_stopped(&self, instance_id: &Uuid, message: &str) -> Result<(), SupervisorError> {
        let entry = RunLogEntry::system(LogStatus::Stopped, message);
        if let Err(e) = self.repo.append_log(instance_id, &entry).await {
            tracing::warn!(run_id = %instance_id, error = %e, "failed to write stop log");
        }
        self.repo.finalize_run(instance_id, &RunFinalization::stopped()).await?;
        Ok(())
    }

    pub async fn get_status(&self, instance_id: &Uuid) -> Result<StatusReport, SupervisorError> {
        Ok(match self.repo.get_run(instance_id).await? {
            Some(record) => StatusReport::Run(record),
            None => StatusReport::NotExecuting,
        })
    }

    pub fn is_running(&self, workflow_id: &str) -> bool {
        self.registry.workflows.contains_key(workflow_id)
    }

    pub fn active_runs(&self) -> Vec<Uuid> {
        self.registry.runs.iter().map(|run| *run.key()).collect()
    }

    /// Wait until the run's task has finished, cleanup included.
    pub async fn wait_for(&self, instance_id: &Uuid) {
        let task = self
            .registry
            .runs
            .get_mut(instance_id)
            .and_then(|mut run| run.task.take());
        if let Some(task) = task
            && let Err(e) = task.await
        {
            tracing::warn!(run_id = %instance_id, error = %e, "run task ended abnormally");
        }
    }

    /// Mark runs left `running` by an earlier process as failed. Returns how
    /// many records were closed.
    pub async fn recover_interrupted(&self) -> Result<usize, SupervisorError> {
        let mut recovered = 0;
        for record in self.repo.list_running_runs().await? {
            if self.registry.runs.contains_key(&record.instance_id) {
                continue;
            }
            let message = "run was interrupted before it finished";
            let entry = RunLogEntry::system(LogStatus::Error, message);
            if let Err(e) = self.repo.append_log(&record.instance_id, &entry).await {
                tracing::warn!(run_id = %record.instance_id, error = %e, "failed to write recovery log");
            }
            if self
                .repo
                .finalize_run(&record.instance_id, &RunFinalization::failed(message))
                .await?
            {
                recovered += 1;
            }
        }
        if recovered > 0 {
            tracing::info!(count = recovered, "closed interrupted runs");
        }
        Ok(recovered)
    }

    /// Stop every live run and wait up to `grace` for their tasks to clean up.
    pub async fn shutdown(&self, grace: Duration) {
        let live: Vec<(Uuid, CancellationToken, Option<JoinHandle<()>>)> = self
            .registry
            .runs
            .iter_mut()
            .map(|mut run| (*run.key(), run.cancel.clone(), run.task.take()))
            .collect();
        if live.is_empty() {
            return;
        }
        tracing::info!(count = live.len(), "shutting down active runs");

        let mut tasks = Vec::new();
        for (instance_id, token, task) in live {
            if !token.is_cancelled() {
                token.cancel();
                if let Err(e) = self.finalize_stopped(&instance_id, "workflow stopped by shutdown").await {
                    tracing::warn!(run_id = %instance_id, error = %e, "failed to finalize run during shutdown");
                }
            }
            tasks.extend(task);
        }

        if tokio::time::timeout(grace, join_all(tasks)).await.is_err() {
            tracing::warn!(grace_secs = grace.as_secs(), "runs did not finish cleanup within the grace period");
        }
    }
}

/// Body of a spawned run.
async fn drive<R: WorkflowRepository>(
    repo: Arc<R>,
    registry: Arc<RunRegistry>,
    engine: WorkflowEngine,
    instance_id: Uuid,
    workflow_id: String,
    params: HashMap<String, Value>,
) {
    let outcome = engine.execute(params).await;
    engine.cleanup().await;

    let finalization = match &outcome {
        Ok(results) => RunFinalization::completed(json!(results)),
        Err(e) if e.is_cancelled() => RunFinalization::stopped(),
        Err(e) => {
            let entry = RunLogEntry::system(LogStatus::Error, format!("workflow execution error: {e}"));
            if let Err(log_err) = repo.append_log(&instance_id, &entry).await {
                tracing::warn!(run_id = %instance_id, error = %log_err, "failed to write error log");
            }
            RunFinalization::failed(e.to_string())
        }
    };

    match repo.finalize_run(&instance_id, &finalization).await {
        Ok(true) => tracing::info!(
            run_id = %instance_id,
            workflow_id = %workflow_id,
            status = %finalization.status,
            "workflow run finished"
        ),
        Ok(false) => tracing::debug!(run_id = %instance_id, "run was already finalized"),
        Err(e) => tracing::error!(run_id = %instance_id, error = %e, "failed to finalize run"),
    }

    registry.release(&instance_id, &workflow_id);
}

// ---------------------------------------------------------------------------
// RunHooks
// ---------------------------------------------------------------------------

/// Writes node events to the run log and refuses to start nodes once a stop
/// has been requested.
pub struct RunHooks<R: WorkflowRepository> {
    repo: Arc<R>,
    instance_id: Uuid,
    cancel: CancellationToken,
}

impl<R: WorkflowRepository> RunHooks<R> {
    async fn append(&self, entry: RunLogEntry) {
        if let Err(e) = self.repo.append_log(&self.instance_id, &entry).await {
            tracing::warn!(run_id = %self.instance_id, node_id = %entry.node_id, error = %e, "failed to write run log");
        }
    }
}

fn node_entry(node: &Node, status: LogStatus, message: String) -> RunLogEntry {
    RunLogEntry::new(node.id(), node.kind().as_str(), status, message).with_name(node.name())
}

impl<R: WorkflowRepository> ExecutionHooks for RunHooks<R> {
    fn before_node<'a>(&'a self, node: &'a Node) -> BoxFuture<'a, Result<(), NodeError>> {
        Box::pin(async move {
            if self.cancel.is_cancelled() {
                return Err(NodeError::Cancelled);
            }
            self.append(node_entry(node, LogStatus::Running, format!("node started: {}", node.name())))
                .await;
            Ok(())
        })
    }

    fn after_node<'a>(&'a self, node: &'a Node) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let entry = node_entry(node, LogStatus::Completed, format!("node completed: {}", node.name()))
                .with_data(node.snapshot());
            self.append(entry).await;
        })
    }

    fn on_node_error<'a>(&'a self, node: &'a Node, error: &'a NodeError) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let status = if error.is_cancelled() {
                LogStatus::Stopped
            } else {
                LogStatus::Error
            };
            self.append(node_entry(node, status, format!("node failed: {error}"))).await;
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
