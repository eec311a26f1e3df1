//! SQLite workflow repository implementation.
//!
//! Implements `WorkflowRepository` from `weaving-core` using sqlx with split
//! read/write pools. Graphs are stored as the editor's JSON text; runs and
//! their node logs track execution for status queries and crash recovery.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::Row;
use uuid::Uuid;
use weaving_core::repository::workflow::{RunFinalization, WorkflowRepository};
use weaving_types::error::RepositoryError;
use weaving_types::graph::GraphDefinition;
use weaving_types::run::{LogStatus, RunLogEntry, RunRecord, RunStatus, STATUS_LOG_LIMIT};

use super::pool::DatabasePool;

/// SQLite-backed implementation of `WorkflowRepository`.
#[derive(Debug, Clone)]
pub struct SqliteWorkflowRepository {
    pool: DatabasePool,
}

impl SqliteWorkflowRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct RunRow {
    instance_id: String,
    workflow_id: String,
    status: String,
    start_time: String,
    end_time: Option<String>,
    result: Option<String>,
    error: Option<String>,
}

impl RunRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            instance_id: row.try_get("instance_id")?,
            workflow_id: row.try_get("workflow_id")?,
            status: row.try_get("status")?,
            start_time: row.try_get("start_time")?,
            end_time: row.try_get("end_time")?,
            result: row.try_get("result")?,
            error: row.try_get("error")?,
        })
    }

    fn into_record(self) -> Result<RunRecord, RepositoryError> {
        let status: RunStatus = self.status.parse().map_err(RepositoryError::Query)?;

        Ok(RunRecord {
            instance_id: parse_uuid(&self.instance_id)?,
            workflow_id: self.workflow_id,
            status,
            start_time: parse_datetime(&self.start_time)?,
            end_time: self.end_time.as_deref().map(parse_datetime).transpose()?,
            result: self.result.as_deref().map(|s| parse_json(s, "result")).transpose()?,
            error: self.error,
            logs: Vec::new(),
        })
    }
}

struct LogRow {
    node_id: String,
    node_name: Option<String>,
    node_type: String,
    status: String,
    message: String,
    data: Option<String>,
    timestamp: String,
}

impl LogRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            node_id: row.try_get("node_id")?,
            node_name: row.try_get("node_name")?,
            node_type: row.try_get("node_type")?,
            status: row.try_get("status")?,
            message: row.try_get("message")?,
            data: row.try_get("data")?,
            timestamp: row.try_get("timestamp")?,
        })
    }

    fn into_entry(self) -> Result<RunLogEntry, RepositoryError> {
        let status: LogStatus = self.status.parse().map_err(RepositoryError::Query)?;

        Ok(RunLogEntry {
            node_id: self.node_id,
            node_name: self.node_name,
            node_type: self.node_type,
            status,
            message: self.message,
            data: self.data.as_deref().map(|s| parse_json(s, "log data")).transpose()?,
            timestamp: parse_datetime(&self.timestamp)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_uuid(s: &str) -> Result<Uuid, RepositoryError> {
    s.parse::<Uuid>()
        .map_err(|e| RepositoryError::Query(format!("invalid UUID: {e}")))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_json(s: &str, what: &str) -> Result<Value, RepositoryError> {
    serde_json::from_str(s).map_err(|e| RepositoryError::Query(format!("invalid {what} JSON: {e}")))
}

fn to_json(value: &Value) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(|e| RepositoryError::Query(e.to_string()))
}

// ---------------------------------------------------------------------------
// WorkflowRepository impl
// ---------------------------------------------------------------------------

impl WorkflowRepository for SqliteWorkflowRepository {
    async fn save_graph(&self, workflow_id: &str, graph: &GraphDefinition) -> Result<(), RepositoryError> {
        let graph_json = serde_json::to_string(graph)
            .map_err(|e| RepositoryError::Query(format!("serialize graph: {e}")))?;
        let now = format_datetime(&Utc::now());

        sqlx::query(
            r#"INSERT INTO workflows (id, graph, created_at, updated_at)
               VALUES (?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                 graph = excluded.graph,
                 updated_at = excluded.updated_at"#,
        )
        .bind(workflow_id)
        .bind(&graph_json)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn load_graph(&self, workflow_id: &str) -> Result<Option<GraphDefinition>, RepositoryError> {
        let row = sqlx::query("SELECT graph FROM workflows WHERE id = ?")
            .bind(workflow_id)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let text: String = row
                    .try_get("graph")
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                GraphDefinition::from_json(&text)
                    .map(Some)
                    .map_err(|e| RepositoryError::Query(format!("invalid graph JSON: {e}")))
            }
            None => Ok(None),
        }
    }

    async fn create_run(&self, run: &RunRecord) -> Result<(), RepositoryError> {
        let result = run.result.as_ref().map(to_json).transpose()?;

        sqlx::query(
            r#"INSERT INTO workflow_runs
               (instance_id, workflow_id, status, start_time, end_time, result, error)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(run.instance_id.to_string())
        .bind(&run.workflow_id)
        .bind(run.status.as_str())
        .bind(format_datetime(&run.start_time))
        .bind(run.end_time.as_ref().map(format_datetime))
        .bind(&result)
        .bind(&run.error)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                RepositoryError::Conflict(format!("run {} already exists", run.instance_id))
            }
            other => RepositoryError::Query(other.to_string()),
        })?;

        Ok(())
    }

    async fn finalize_run(
        &self,
        instance_id: &Uuid,
        finalization: &RunFinalization,
    ) -> Result<bool, RepositoryError> {
        let result = finalization.result.as_ref().map(to_json).transpose()?;

        let updated = sqlx::query(
            r#"UPDATE workflow_runs
               SET status = ?, end_time = ?, result = ?, error = ?
               WHERE instance_id = ? AND status = 'running'"#,
        )
        .bind(finalization.status.as_str())
        .bind(format_datetime(&finalization.end_time))
        .bind(&result)
        .bind(&finalization.error)
        .bind(instance_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if updated.rows_affected() > 0 {
            return Ok(true);
        }

        // Distinguish "already terminal" from "never existed".
        let exists = sqlx::query("SELECT 1 FROM workflow_runs WHERE instance_id = ?")
            .bind(instance_id.to_string())
            .fetch_optional(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match exists {
            Some(_) => Ok(false),
            None => Err(RepositoryError::NotFound),
        }
    }

    async fn get_run(&self, instance_id: &Uuid) -> Result<Option<RunRecord>, RepositoryError> {
        let row = sqlx::query(
            r#"SELECT instance_id, workflow_id, status, start_time, end_time, result, error
               FROM workflow_runs WHERE instance_id = ?"#,
        )
        .bind(instance_id.to_string())
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut record = RunRow::from_row(&row)
            .map_err(|e| RepositoryError::Query(e.to_string()))?
            .into_record()?;

        let log_rows = sqlx::query(
            r#"SELECT node_id, node_name, node_type, status, message, data, timestamp
               FROM workflow_run_logs
               WHERE instance_id = ?
               ORDER BY id DESC
               LIMIT ?"#,
        )
        .bind(instance_id.to_string())
        .bind(STATUS_LOG_LIMIT as i64)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        record.logs = log_rows
            .iter()
            .map(|row| {
                LogRow::from_row(row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?
                    .into_entry()
            })
            .collect::<Result<_, _>>()?;

        Ok(Some(record))
    }

    async fn list_running_runs(&self) -> Result<Vec<RunRecord>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT instance_id, workflow_id, status, start_time, end_time, result, error
               FROM workflow_runs
               WHERE status = 'running'
               ORDER BY start_time ASC"#,
        )
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows.iter()
            .map(|row| {
                RunRow::from_row(row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?
                    .into_record()
            })
            .collect()
    }

    async fn append_log(&self, instance_id: &Uuid, entry: &RunLogEntry) -> Result<(), RepositoryError> {
        let data = entry.data.as_ref().map(to_json).transpose()?;
        let id = instance_id.to_string();

        let inserted = sqlx::query(
            r#"INSERT INTO workflow_run_logs
               (instance_id, node_id, node_name, node_type, status, message, data, timestamp)
               SELECT ?, ?, ?, ?, ?, ?, ?, ?
               WHERE EXISTS (
                   SELECT 1 FROM workflow_runs WHERE instance_id = ? AND status = 'running'
               )"#,
        )
        .bind(&id)
        .bind(&entry.node_id)
        .bind(&entry.node_name)
        .bind(&entry.node_type)
        .bind(entry.status.as_str())
        .bind(&entry.message)
        .bind(&data)
        .bind(format_datetime(&entry.timestamp))
        .bind(&id)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if inserted.rows_affected() > 0 {
            return Ok(());
        }

        // Finalized runs drop the entry; unknown runs are an error.
        let exists = sqlx::query("SELECT 1 FROM workflow_runs WHERE instance_id = ?")
            .bind(&id)
            .fetch_optional(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match exists {
            Some(_) => Ok(()),
            None => Err(RepositoryError::NotFound),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
