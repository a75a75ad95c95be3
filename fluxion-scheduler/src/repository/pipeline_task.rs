//! Pipeline Task Repository
//!
//! PostgreSQL queries for pipeline runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fluxion_core::domain::task::{PipelineTask, TaskStatus};
use fluxion_core::dto::{Page, Pagination};

use super::{
    NewPipelineTask, PgStore, PipelineTaskPatch, PipelineTaskRepository, parse_status, to_total,
};
use crate::error::Result;

const COLUMNS: &str = "id, pipeline_id, root_task_id, status, owner_id, created_at, updated_at";

#[async_trait]
impl PipelineTaskRepository for PgStore {
    async fn create(&self, run: NewPipelineTask) -> Result<PipelineTask> {
        let row = sqlx::query_as::<_, PipelineTaskRow>(&format!(
            r#"
            INSERT INTO pipeline_tasks (pipeline_id, status, owner_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $4)
            RETURNING {COLUMNS}
            "#
        ))
        .bind(run.pipeline_id)
        .bind(run.status.as_str())
        .bind(run.owner_id)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn get_by_id(&self, id: i64, owner_id: &str) -> Result<Option<PipelineTask>> {
        let row = sqlx::query_as::<_, PipelineTaskRow>(&format!(
            "SELECT {COLUMNS} FROM pipeline_tasks WHERE id = $1 AND owner_id = $2"
        ))
        .bind(id)
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(PipelineTask::try_from).transpose()
    }

    async fn update(
        &self,
        id: i64,
        owner_id: &str,
        patch: PipelineTaskPatch,
    ) -> Result<Option<PipelineTask>> {
        let row = sqlx::query_as::<_, PipelineTaskRow>(&format!(
            r#"
            UPDATE pipeline_tasks
            SET status = COALESCE($3, status),
                root_task_id = COALESCE($4, root_task_id),
                updated_at = $5
            WHERE id = $1 AND owner_id = $2
            RETURNING {COLUMNS}
            "#
        ))
        .bind(id)
        .bind(owner_id)
        .bind(patch.status.map(TaskStatus::as_str))
        .bind(patch.root_task_id)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        row.map(PipelineTask::try_from).transpose()
    }

    async fn find_by_pipeline(
        &self,
        pipeline_id: i64,
        owner_id: &str,
        page: Pagination,
    ) -> Result<Page<PipelineTask>> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM pipeline_tasks WHERE pipeline_id = $1 AND owner_id = $2",
        )
        .bind(pipeline_id)
        .bind(owner_id)
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query_as::<_, PipelineTaskRow>(&format!(
            r#"
            SELECT {COLUMNS} FROM pipeline_tasks
            WHERE pipeline_id = $1 AND owner_id = $2
            ORDER BY id DESC
            LIMIT $3 OFFSET $4
            "#
        ))
        .bind(pipeline_id)
        .bind(owner_id)
        .bind(page.limit() as i64)
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(Page {
            items: rows
                .into_iter()
                .map(PipelineTask::try_from)
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
struct PipelineTaskRow {
    id: i64,
    pipeline_id: i64,
    root_task_id: Option<i64>,
    status: String,
    owner_id: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PipelineTaskRow> for PipelineTask {
    type Error = crate::error::Error;

    fn try_from(row: PipelineTaskRow) -> Result<Self> {
        Ok(PipelineTask {
            id: row.id,
            pipeline_id: row.pipeline_id,
            root_task_id: row.root_task_id,
            status: parse_status(&row.status)?,
            owner_id: row.owner_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
