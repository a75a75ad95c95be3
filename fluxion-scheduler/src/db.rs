//! Database pool and schema

use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Atoms
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS atoms (
            id BIGSERIAL PRIMARY KEY,
            name VARCHAR(255) NOT NULL,
            description TEXT,
            connect_url TEXT NOT NULL,
            enabled BOOLEAN NOT NULL DEFAULT TRUE,
            owner_id VARCHAR(255) NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL,
            UNIQUE (owner_id, name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Pipelines; root_atom_id points at pipeline_atoms and is checked by the service
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipelines (
            id BIGSERIAL PRIMARY KEY,
            name VARCHAR(255) NOT NULL,
            description TEXT,
            enabled BOOLEAN NOT NULL DEFAULT TRUE,
            root_atom_id BIGINT,
            owner_id VARCHAR(255) NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL,
            UNIQUE (owner_id, name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipeline_atoms (
            id BIGSERIAL PRIMARY KEY,
            parent_atom_id BIGINT REFERENCES pipeline_atoms(id) ON DELETE CASCADE,
            pipeline_id BIGINT NOT NULL REFERENCES pipelines(id) ON DELETE CASCADE,
            atom_id BIGINT NOT NULL REFERENCES atoms(id) ON DELETE CASCADE,
            input_mapping_code TEXT,
            output_mapping_code TEXT,
            owner_id VARCHAR(255) NOT NULL,
            created_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipeline_tasks (
            id BIGSERIAL PRIMARY KEY,
            pipeline_id BIGINT NOT NULL REFERENCES pipelines(id) ON DELETE CASCADE,
            root_task_id BIGINT,
            status VARCHAR(20) NOT NULL,
            owner_id VARCHAR(255) NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tasks (
            id BIGSERIAL PRIMARY KEY,
            atom_id BIGINT NOT NULL,
            parent_task_id BIGINT REFERENCES tasks(id) ON DELETE SET NULL,
            pipeline_task_id BIGINT REFERENCES pipeline_tasks(id) ON DELETE CASCADE,
            status VARCHAR(20) NOT NULL,
            result_id BIGINT,
            owner_id VARCHAR(255) NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS task_results (
            id BIGSERIAL PRIMARY KEY,
            task_id BIGINT NOT NULL UNIQUE REFERENCES tasks(id) ON DELETE CASCADE,
            status VARCHAR(20) NOT NULL,
            input JSONB NOT NULL DEFAULT 'null',
            output JSONB NOT NULL DEFAULT 'null',
            owner_id VARCHAR(255) NOT NULL,
            created_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Job queue
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS atom_jobs (
            id UUID PRIMARY KEY,
            topic VARCHAR(64) NOT NULL,
            status VARCHAR(20) NOT NULL,
            payload JSONB NOT NULL,
            created_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_pipeline_atoms_pipeline ON pipeline_atoms(pipeline_id, atom_id)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_pipeline_atoms_parent ON pipeline_atoms(parent_atom_id)",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_atom ON tasks(atom_id, id DESC)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_pipeline_task ON tasks(pipeline_task_id)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_pipeline_tasks_pipeline ON pipeline_tasks(pipeline_id, id DESC)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_atom_jobs_pending ON atom_jobs(topic, status, created_at)",
    )
    .execute(pool)
    .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
