//! Pipeline Repository
//!
//! PostgreSQL queries for pipelines.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fluxion_core::domain::pipeline::Pipeline;
use fluxion_core::dto::{Page, Pagination};

use super::{NewPipeline, PgStore, PipelinePatch, PipelineRepository, to_total};
use crate::error::{Error, Result};

const COLUMNS: &str =
    "id, name, description, enabled, root_atom_id, owner_id, created_at, updated_at";

#[async_trait]
impl PipelineRepository for PgStore {
    async fn create(&self, pipeline: NewPipeline) -> Result<Pipeline> {
        let name = pipeline.name.clone();

        let row = sqlx::query_as::<_, PipelineRow>(&format!(
            r#"
            INSERT INTO pipelines (name, description, enabled, owner_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $5)
            RETURNING {COLUMNS}
            "#
        ))
        .bind(pipeline.name)
        .bind(pipeline.description)
        .bind(pipeline.enabled)
        .bind(pipeline.owner_id)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| unique_violation(e, &name))?;

        Ok(row.into())
    }

    async fn get_by_id(&self, id: i64, owner_id: &str) -> Result<Option<Pipeline>> {
        let row = sqlx::query_as::<_, PipelineRow>(&format!(
            "SELECT {COLUMNS} FROM pipelines WHERE id = $1 AND owner_id = $2"
        ))
        .bind(id)
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into()))
    }

    async fn get_by_name(&self, name: &str, owner_id: &str) -> Result<Option<Pipeline>> {
        let row = sqlx::query_as::<_, PipelineRow>(&format!(
            "SELECT {COLUMNS} FROM pipelines WHERE name = $1 AND owner_id = $2"
        ))
        .bind(name)
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into()))
    }

    async fn update(
        &self,
        id: i64,
        owner_id: &str,
        patch: PipelinePatch,
    ) -> Result<Option<Pipeline>> {
        let name = patch.name.clone().unwrap_or_default();

        let row = sqlx::query_as::<_, PipelineRow>(&format!(
            r#"
            UPDATE pipelines
            SET name = COALESCE($3, name),
                description = COALESCE($4, description),
                enabled = COALESCE($5, enabled),
                root_atom_id = COALESCE($6, root_atom_id),
                updated_at = $7
            WHERE id = $1 AND owner_id = $2
            RETURNING {COLUMNS}
            "#
        ))
        .bind(id)
        .bind(owner_id)
        .bind(patch.name)
        .bind(patch.description)
        .bind(patch.enabled)
        .bind(patch.root_atom_id)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| unique_violation(e, &name))?;

        Ok(row.map(|r| r.into()))
    }

    async fn list(&self, owner_id: &str, page: Pagination) -> Result<Page<Pipeline>> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pipelines WHERE owner_id = $1")
            .bind(owner_id)
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query_as::<_, PipelineRow>(&format!(
            "SELECT {COLUMNS} FROM pipelines WHERE owner_id = $1 ORDER BY id ASC LIMIT $2 OFFSET $3"
        ))
        .bind(owner_id)
        .bind(page.limit() as i64)
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(Page {
            items: rows.into_iter().map(|r| r.into()).collect(),
            total: to_total(total),
            page: page.page,
        })
    }
}

fn unique_violation(err: sqlx::Error, name: &str) -> Error {
    match err.as_database_error() {
        Some(db) if db.is_unique_violation() => {
            Error::Validation(format!("pipeline name '{}' is already taken", name))
        }
        _ => Error::Database(err),
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct PipelineRow {
    id: i64,
    name: String,
    description: Option<String>,
    enabled: bool,
    root_atom_id: Option<i64>,
    owner_id: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<PipelineRow> for Pipeline {
    fn from(row: PipelineRow) -> Self {
        Pipeline {
            id: row.id,
            name: row.name,
            description: row.description,
            enabled: row.enabled,
            root_atom_id: row.root_atom_id,
            owner_id: row.owner_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}
