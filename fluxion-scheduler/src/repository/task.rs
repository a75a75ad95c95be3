//! Task Repository
//!
//! PostgreSQL queries for tasks. Guarded updates compare the current status
//! in the `WHERE` clause so two consumers can never both claim a task.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fluxion_core::domain::task::{Task, TaskStatus};
use fluxion_core::dto::{Page, Pagination};

use super::{NewTask, PgStore, TaskPatch, TaskRepository, parse_status, to_total};
use crate::error::Result;

const COLUMNS: &str = "id, atom_id, parent_task_id, pipeline_task_id, status, result_id, \
                       owner_id, created_at, updated_at";

#[async_trait]
impl TaskRepository for PgStore {
    async fn create(&self, task: NewTask) -> Result<Task> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            r#"
            INSERT INTO tasks (atom_id, parent_task_id, pipeline_task_id, status, owner_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            RETURNING {COLUMNS}
            "#
        ))
        .bind(task.atom_id)
        .bind(task.parent_task_id)
        .bind(task.pipeline_task_id)
        .bind(TaskStatus::Pending.as_str())
        .bind(task.owner_id)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn get_by_id(&self, id: i64, owner_id: &str) -> Result<Option<Task>> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {COLUMNS} FROM tasks WHERE id = $1 AND owner_id = $2"
        ))
        .bind(id)
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Task::try_from).transpose()
    }

    async fn update(&self, id: i64, owner_id: &str, patch: TaskPatch) -> Result<Option<Task>> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            r#"
            UPDATE tasks
            SET status = COALESCE($4, status),
                result_id = COALESCE($5, result_id),
                updated_at = $6
            WHERE id = $1 AND owner_id = $2 AND ($3::TEXT IS NULL OR status = $3)
            RETURNING {COLUMNS}
            "#
        ))
        .bind(id)
        .bind(owner_id)
        .bind(patch.expected_status.map(TaskStatus::as_str))
        .bind(patch.status.map(TaskStatus::as_str))
        .bind(patch.result_id)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Task::try_from).transpose()
    }

    async fn find_by_pipeline_task(
        &self,
        pipeline_task_id: i64,
        owner_id: &str,
    ) -> Result<Vec<Task>> {
        let rows = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {COLUMNS} FROM tasks WHERE pipeline_task_id = $1 AND owner_id = $2 ORDER BY id ASC"
        ))
        .bind(pipeline_task_id)
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Task::try_from).collect()
    }

    async fn find_by_atom(
        &self,
        atom_id: i64,
        owner_id: &str,
        page: Pagination,
    ) -> Result<Page<Task>> {
        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM tasks WHERE atom_id = $1 AND owner_id = $2")
                .bind(atom_id)
                .bind(owner_id)
                .fetch_one(&self.pool)
                .await?;

        let rows = sqlx::query_as::<_, TaskRow>(&format!(
            r#"
            SELECT {COLUMNS} FROM tasks
            WHERE atom_id = $1 AND owner_id = $2
            ORDER BY id DESC
            LIMIT $3 OFFSET $4
            "#
        ))
        .bind(atom_id)
        .bind(owner_id)
        .bind(page.limit() as i64)
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(Page {
            items: rows
                .into_iter()
                .map(Task::try_from)
                .collect::<Result<Vec<_>>>()?,
            total: to_total(total),
            page: page.page,
        })
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: i64,
    atom_id: i64,
    parent_task_id: Option<i64>,
    pipeline_task_id: Option<i64>,
    status: String,
    result_id: Option<i64>,
    owner_id: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TaskRow> for Task {
    type Error = crate::error::Error;

    fn try_from(row: TaskRow) -> Result<Self> {
        Ok(Task {
            id: row.id,
            atom_id: row.atom_id,
            parent_task_id: row.parent_task_id,
            pipeline_task_id: row.pipeline_task_id,
            status: parse_status(&row.status)?,
            result_id: row.result_id,
            owner_id: row.owner_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
