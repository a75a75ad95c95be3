//! PostgreSQL queue
//!
//! Jobs live in the `atom_jobs` table. Consumers claim rows with
//! `SELECT ... FOR UPDATE SKIP LOCKED`, so several pollers can share a table.

use async_trait::async_trait;
use chrono::Utc;
use fluxion_core::dto::job::{AtomJob, QUEUE_TOPIC};
use sqlx::PgPool;
use uuid::Uuid;

use super::JobQueue;
use crate::error::{Error, Result};

#[derive(Clone)]
pub struct PgQueue {
    pool: PgPool,
}

impl PgQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobQueue for PgQueue {
    async fn enqueue(&self, job: AtomJob) -> Result<()> {
        let payload = serde_json::to_value(&job)?;

        sqlx::query(
            r#"
            INSERT INTO atom_jobs (id, topic, status, payload, created_at)
            VALUES ($1, $2, 'pending', $3, $4)
            "#,
        )
        .bind(job.id)
        .bind(QUEUE_TOPIC)
        .bind(payload)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        tracing::debug!(job_id = %job.id, task_id = job.task_id, "job enqueued");
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<AtomJob>> {
        let mut tx = self.pool.begin().await?;

        let row: Option<(Uuid, serde_json::Value)> = sqlx::query_as(
            r#"
            SELECT id, payload FROM atom_jobs
            WHERE topic = $1 AND status = 'pending'
            ORDER BY created_at ASC
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(QUEUE_TOPIC)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((id, payload)) = row else {
            tx.rollback().await?;
            return Ok(None);
        };

        sqlx::query("UPDATE atom_jobs SET status = 'processing' WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        let job = serde_json::from_value::<AtomJob>(payload)
            .map_err(|e| Error::Queue(format!("job {} has an unreadable payload: {}", id, e)))?;
        Ok(Some(job))
    }

    async fn ack(&self, job_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM atom_jobs WHERE id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
