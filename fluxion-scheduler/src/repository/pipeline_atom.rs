//! Pipeline Atom Repository
//!
//! PostgreSQL queries for pipeline nodes, including atomic tree creation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fluxion_core::domain::pipeline::PipelineAtom;
use fluxion_core::dto::pipeline::PlannedPipelineAtom;
use fluxion_core::dto::{Page, Pagination};

use super::{
    NewPipelineAtom, PgStore, PipelineAtomPatch, PipelineAtomRepository, to_total,
};
use crate::error::{Error, Result};

const COLUMNS: &str = "id, parent_atom_id, pipeline_id, atom_id, input_mapping_code, \
                       output_mapping_code, owner_id, created_at";

#[async_trait]
impl PipelineAtomRepository for PgStore {
    async fn create(&self, node: NewPipelineAtom) -> Result<PipelineAtom> {
        let row = sqlx::query_as::<_, PipelineAtomRow>(&format!(
            r#"
            INSERT INTO pipeline_atoms
                (parent_atom_id, pipeline_id, atom_id, input_mapping_code, output_mapping_code, owner_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {COLUMNS}
            "#
        ))
        .bind(node.parent_atom_id)
        .bind(node.pipeline_id)
        .bind(node.atom_id)
        .bind(node.input_mapping_code)
        .bind(node.output_mapping_code)
        .bind(node.owner_id)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn get_by_id(&self, id: i64, owner_id: &str) -> Result<Option<PipelineAtom>> {
        let row = sqlx::query_as::<_, PipelineAtomRow>(&format!(
            "SELECT {COLUMNS} FROM pipeline_atoms WHERE id = $1 AND owner_id = $2"
        ))
        .bind(id)
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into()))
    }

    async fn get_by_atom(
        &self,
        atom_id: i64,
        pipeline_id: i64,
        owner_id: &str,
    ) -> Result<Option<PipelineAtom>> {
        let row = sqlx::query_as::<_, PipelineAtomRow>(&format!(
            r#"
            SELECT {COLUMNS} FROM pipeline_atoms
            WHERE atom_id = $1 AND pipeline_id = $2 AND owner_id = $3
            ORDER BY id ASC
            LIMIT 1
            "#
        ))
        .bind(atom_id)
        .bind(pipeline_id)
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into()))
    }

    async fn find_children(
        &self,
        parent_id: i64,
        pipeline_id: i64,
        owner_id: &str,
    ) -> Result<Vec<PipelineAtom>> {
        let rows = sqlx::query_as::<_, PipelineAtomRow>(&format!(
            r#"
            SELECT {COLUMNS} FROM pipeline_atoms
            WHERE parent_atom_id = $1 AND pipeline_id = $2 AND owner_id = $3
            ORDER BY id ASC
            "#
        ))
        .bind(parent_id)
        .bind(pipeline_id)
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn find_by_pipeline(
        &self,
        pipeline_id: i64,
        owner_id: &str,
        page: Pagination,
    ) -> Result<Page<PipelineAtom>> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM pipeline_atoms WHERE pipeline_id = $1 AND owner_id = $2",
        )
        .bind(pipeline_id)
        .bind(owner_id)
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query_as::<_, PipelineAtomRow>(&format!(
            r#"
            SELECT {COLUMNS} FROM pipeline_atoms
            WHERE pipeline_id = $1 AND owner_id = $2
            ORDER BY id ASC
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
            items: rows.into_iter().map(|r| r.into()).collect(),
            total: to_total(total),
            page: page.page,
        })
    }

    async fn update(
        &self,
        id: i64,
        owner_id: &str,
        patch: PipelineAtomPatch,
    ) -> Result<Option<PipelineAtom>> {
        let row = sqlx::query_as::<_, PipelineAtomRow>(&format!(
            r#"
            UPDATE pipeline_atoms
            SET input_mapping_code = COALESCE($3, input_mapping_code),
                output_mapping_code = COALESCE($4, output_mapping_code)
            WHERE id = $1 AND owner_id = $2
            RETURNING {COLUMNS}
            "#
        ))
        .bind(id)
        .bind(owner_id)
        .bind(patch.input_mapping_code)
        .bind(patch.output_mapping_code)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into()))
    }

    async fn create_tree(
        &self,
        pipeline_id: i64,
        owner_id: &str,
        nodes: &[PlannedPipelineAtom],
    ) -> Result<Vec<PipelineAtom>> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();
        let mut created: Vec<PipelineAtom> = Vec::with_capacity(nodes.len());

        for node in nodes {
            // Returning early drops `tx`, which rolls everything back
            let exists: Option<i64> =
                sqlx::query_scalar("SELECT id FROM atoms WHERE id = $1 AND owner_id = $2")
                    .bind(node.atom_id)
                    .bind(owner_id)
                    .fetch_optional(&mut *tx)
                    .await?;
            if exists.is_none() {
                return Err(Error::not_found("atom", node.atom_id));
            }

            let parent_atom_id = match node.parent {
                Some(idx) => Some(
                    created
                        .get(idx)
                        .map(|p| p.id)
                        .ok_or_else(|| Error::Validation(format!("invalid parent index {}", idx)))?,
                ),
                None => None,
            };

            let row = sqlx::query_as::<_, PipelineAtomRow>(&format!(
                r#"
                INSERT INTO pipeline_atoms
                    (parent_atom_id, pipeline_id, atom_id, input_mapping_code, output_mapping_code, owner_id, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING {COLUMNS}
                "#
            ))
            .bind(parent_atom_id)
            .bind(pipeline_id)
            .bind(node.atom_id)
            .bind(node.input_mapping_code.as_deref())
            .bind(node.output_mapping_code.as_deref())
            .bind(owner_id)
            .bind(now)
            .fetch_one(&mut *tx)
            .await?;

            created.push(row.into());
        }

        tx.commit().await?;
        Ok(created)
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct PipelineAtomRow {
    id: i64,
    parent_atom_id: Option<i64>,
    pipeline_id: i64,
    atom_id: i64,
    input_mapping_code: Option<String>,
    output_mapping_code: Option<String>,
    owner_id: String,
    created_at: DateTime<Utc>,
}

impl From<PipelineAtomRow> for PipelineAtom {
    fn from(row: PipelineAtomRow) -> Self {
        PipelineAtom {
            id: row.id,
            parent_atom_id: row.parent_atom_id,
            pipeline_id: row.pipeline_id,
            atom_id: row.atom_id,
            input_mapping_code: row.input_mapping_code,
            output_mapping_code: row.output_mapping_code,
            owner_id: row.owner_id,
            created_at: row.created_at,
        }
    }
}
