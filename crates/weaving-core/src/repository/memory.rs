//! In-memory `WorkflowRepository` for one-shot runs and tests.

use dashmap::DashMap;
use uuid::Uuid;
use weaving_types::error::RepositoryError;
use weaving_types::graph::GraphDefinition;
use weaving_types::run::{RunLogEntry, RunRecord, RunStatus, STATUS_LOG_LIMIT};

use super::workflow::{RunFinalization, WorkflowRepository};

/// Process-local store. Records live until the repository is dropped.
#[derive(Debug, Default)]
pub struct InMemoryWorkflowRepository {
    graphs: DashMap<String, GraphDefinition>,
    runs: DashMap<Uuid, RunRecord>,
}

impl InMemoryWorkflowRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WorkflowRepository for InMemoryWorkflowRepository {
    async fn save_graph(&self, workflow_id: &str, graph: &GraphDefinition) -> Result<(), RepositoryError> {
        self.graphs.insert(workflow_id.to_string(), graph.clone());
        Ok(())
    }

    async fn load_graph(&self, workflow_id: &str) -> Result<Option<GraphDefinition>, RepositoryError> {
        Ok(self.graphs.get(workflow_id).map(|g| g.value().clone()))
    }

    async fn create_run(&self, run: &RunRecord) -> Result<(), RepositoryError> {
        if self.runs.contains_key(&run.instance_id) {
            return Err(RepositoryError::Conflict(format!(
                "run {} already exists",
                run.instance_id
            )));
        }
        self.runs.insert(run.instance_id, run.clone());
        Ok(())
    }

    async fn finalize_run(
        &self,
        instance_id: &Uuid,
        finalization: &RunFinalization,
    ) -> Result<bool, RepositoryError> {
        let mut record = self
            .runs
            .get_mut(instance_id)
            .ok_or(RepositoryError::NotFound)?;
        if record.status != RunStatus::Running {
            return Ok(false);
        }
        record.status = finalization.status;
        record.end_time = Some(finalization.end_time);
        record.result = finalization.result.clone();
        record.error = finalization.error.clone();
        Ok(true)
    }

    async fn get_run(&self, instance_id: &Uuid) -> Result<Option<RunRecord>, RepositoryError> {
        Ok(self.runs.get(instance_id).map(|r| {
            let mut record = r.value().clone();
            record.logs.reverse();
            record.logs.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
            record.logs.truncate(STATUS_LOG_LIMIT);
            record
        }))
    }

    async fn list_running_runs(&self) -> Result<Vec<RunRecord>, RepositoryError> {
        let mut runs: Vec<RunRecord> = self
            .runs
            .iter()
            .filter(|r| r.status == RunStatus::Running)
            .map(|r| r.value().clone())
            .collect();
        runs.sort_by(|a, b| a.start_time.cmp(&b.start_time));
        Ok(runs)
    }

    async fn append_log(&self, instance_id: &Uuid, entry: &RunLogEntry) -> Result<(), RepositoryError> {
        let mut record = self
            .runs
            .get_mut(instance_id)
            .ok_or(RepositoryError::NotFound)?;
        if record.status == RunStatus::Running {
            record.logs.push(entry.clone());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use weaving_types::run::LogStatus;

    #[tokio::test]
    async fn graph_upsert_replaces_previous() {
        let repo = InMemoryWorkflowRepository::new();
        repo.save_graph("wf", &GraphDefinition::default()).await.unwrap();
        let graph = GraphDefinition::from_json(
            r#"{"nodes": [{"id": "s", "type": "start", "data": {}}], "edges": []}"#,
        )
        .unwrap();
        repo.save_graph("wf", &graph).await.unwrap();
        assert_eq!(repo.load_graph("wf").await.unwrap(), Some(graph));
        assert_eq!(repo.load_graph("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn first_finalization_wins() {
        let repo = InMemoryWorkflowRepository::new();
        let run = RunRecord::started("wf");
        repo.create_run(&run).await.unwrap();

        assert!(repo.finalize_run(&run.instance_id, &RunFinalization::stopped()).await.unwrap());
        assert!(!repo
            .finalize_run(&run.instance_id, &RunFinalization::failed("late"))
            .await
            .unwrap());

        let stored = repo.get_run(&run.instance_id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Stopped);
        assert!(stored.end_time.is_some());
        assert!(stored.error.is_none());
    }

    #[tokio::test]
    async fn logs_come_back_newest_first_and_capped() {
        let repo = InMemoryWorkflowRepository::new();
        let run = RunRecord::started("wf");
        repo.create_run(&run).await.unwrap();

        for i in 0..(STATUS_LOG_LIMIT + 5) {
            let entry = RunLogEntry::new("n", "start", LogStatus::Running, format!("entry {i}"))
                .with_data(json!(i));
            repo.append_log(&run.instance_id, &entry).await.unwrap();
        }

        let stored = repo.get_run(&run.instance_id).await.unwrap().unwrap();
        assert_eq!(stored.logs.len(), STATUS_LOG_LIMIT);
        assert_eq!(stored.logs[0].message, format!("entry {}", STATUS_LOG_LIMIT + 4));
    }

    #[tokio::test]
    async fn finalized_run_ignores_new_logs() {
        let repo = InMemoryWorkflowRepository::new();
        let run = RunRecord::started("wf");
        repo.create_run(&run).await.unwrap();
        repo.append_log(&run.instance_id, &RunLogEntry::system(LogStatus::Running, "before"))
            .await
            .unwrap();
        repo.finalize_run(&run.instance_id, &RunFinalization::stopped())
            .await
            .unwrap();

        repo.append_log(&run.instance_id, &RunLogEntry::system(LogStatus::Stopped, "after"))
            .await
            .unwrap();

        let stored = repo.get_run(&run.instance_id).await.unwrap().unwrap();
        assert_eq!(stored.logs.len(), 1);
        assert_eq!(stored.logs[0].message, "before");
    }

    #[tokio::test]
    async fn running_runs_are_listed() {
        let repo = InMemoryWorkflowRepository::new();
        let a = RunRecord::started("a");
        let b = RunRecord::started("b");
        repo.create_run(&a).await.unwrap();
        repo.create_run(&b).await.unwrap();
        repo.finalize_run(&b.instance_id, &RunFinalization::completed(json!({})))
            .await
            .unwrap();

        let running = repo.list_running_runs().await.unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].workflow_id, "a");
    }

    #[tokio::test]
    async fn unknown_run_is_not_found() {
        let repo = InMemoryWorkflowRepository::new();
        let entry = RunLogEntry::system(LogStatus::Error, "x");
        assert!(matches!(
            repo.append_log(&Uuid::now_v7(), &entry).await,
            Err(RepositoryError::NotFound)
        ));
    }
}
