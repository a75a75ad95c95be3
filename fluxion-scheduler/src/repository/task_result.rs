//! Task Result Repository
//!
//! PostgreSQL queries for task results. `task_results.task_id` is unique, so
//! a second result for the same task is rejected by the database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fluxion_core::domain::task::TaskResult;

use super::{NewTaskResult, PgStore, TaskResultRepository, parse_status};
use crate::error::{Error, Result};

const COLUMNS: &str = "id, task_id, status, input, output, owner_id, created_at";

#[async_trait]
impl TaskResultRepository for PgStore {
    async fn create(&self, result: NewTaskResult) -> Result<TaskResult> {
        let task_id = result.task_id;

        let row = sqlx::query_as::<_, TaskResultRow>(&format!(
            r#"
            INSERT INTO task_results (task_id, status, input, output, owner_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {COLUMNS}
            "#
        ))
        .bind(result.task_id)
        .bind(result.status.as_str())
        .bind(result.input)
        .bind(result.output)
        .bind(result.owner_id)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e.as_database_error() {
            Some(db) if db.is_unique_violation() => {
                Error::InvalidState(format!("task {} already has a result", task_id))
            }
            _ => Error::Database(e),
        })?;

        row.try_into()
    }

    async fn get_by_id(&self, id: i64, owner_id: &str) -> Result<Option<TaskResult>> {
        let row = sqlx::query_as::<_, TaskResultRow>(&format!(
            "SELECT {COLUMNS} FROM task_results WHERE id = $1 AND owner_id = $2"
        ))
        .bind(id)
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TaskResult::try_from).transpose()
    }

    async fn get_by_task(&self, task_id: i64, owner_id: &str) -> Result<Option<TaskResult>> {
        let row = sqlx::query_as::<_, TaskResultRow>(&format!(
            "SELECT {COLUMNS} FROM task_results WHERE task_id = $1 AND owner_id = $2"
        ))
        .bind(task_id)
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TaskResult::try_from).transpose()
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct TaskResultRow {
    id: i64,
    task_id: i64,
    status: String,
    input: serde_json::Value,
    output: serde_json::Value,
    owner_id: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<TaskResultRow> for TaskResult {
    type Error = Error;

    fn try_from(row: TaskResultRow) -> Result<Self> {
        Ok(TaskResult {
            id: row.id,
            task_id: row.task_id,
            status: parse_status(&row.status)?,
            input: row.input,
            output: row.output,
            owner_id: row.owner_id,
            created_at: row.created_at,
        })
    }
}
