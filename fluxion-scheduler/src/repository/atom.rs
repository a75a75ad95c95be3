//! Atom Repository
//!
//! PostgreSQL queries for atoms.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fluxion_core::domain::atom::Atom;
use fluxion_core::dto::{Page, Pagination};

use super::{AtomPatch, AtomRepository, NewAtom, PgStore, to_total};
use crate::error::{Error, Result};

const COLUMNS: &str = "id, name, description, connect_url, enabled, owner_id, created_at, updated_at";

#[async_trait]
impl AtomRepository for PgStore {
    async fn create(&self, atom: NewAtom) -> Result<Atom> {
        let now = Utc::now();
        let name = atom.name.clone();

        let row = sqlx::query_as::<_, AtomRow>(&format!(
            r#"
            INSERT INTO atoms (name, description, connect_url, enabled, owner_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            RETURNING {COLUMNS}
            "#
        ))
        .bind(atom.name)
        .bind(atom.description)
        .bind(atom.connect_url)
        .bind(atom.enabled)
        .bind(atom.owner_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| unique_violation(e, &name))?;

        Ok(row.into())
    }

    async fn get_by_id(&self, id: i64, owner_id: &str) -> Result<Option<Atom>> {
        let row = sqlx::query_as::<_, AtomRow>(&format!(
            "SELECT {COLUMNS} FROM atoms WHERE id = $1 AND owner_id = $2"
        ))
        .bind(id)
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into()))
    }

    async fn get_by_name(&self, name: &str, owner_id: &str) -> Result<Option<Atom>> {
        let row = sqlx::query_as::<_, AtomRow>(&format!(
            "SELECT {COLUMNS} FROM atoms WHERE name = $1 AND owner_id = $2"
        ))
        .bind(name)
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into()))
    }

    async fn update(&self, id: i64, owner_id: &str, patch: AtomPatch) -> Result<Option<Atom>> {
        let name = patch.name.clone().unwrap_or_default();

        let row = sqlx::query_as::<_, AtomRow>(&format!(
            r#"
            UPDATE atoms
            SET name = COALESCE($3, name),
                description = COALESCE($4, description),
                connect_url = COALESCE($5, connect_url),
                enabled = COALESCE($6, enabled),
                updated_at = $7
            WHERE id = $1 AND owner_id = $2
            RETURNING {COLUMNS}
            "#
        ))
        .bind(id)
        .bind(owner_id)
        .bind(patch.name)
        .bind(patch.description)
        .bind(patch.connect_url)
        .bind(patch.enabled)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| unique_violation(e, &name))?;

        Ok(row.map(|r| r.into()))
    }

    async fn list(&self, owner_id: &str, page: Pagination) -> Result<Page<Atom>> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM atoms WHERE owner_id = $1")
            .bind(owner_id)
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query_as::<_, AtomRow>(&format!(
            "SELECT {COLUMNS} FROM atoms WHERE owner_id = $1 ORDER BY id ASC LIMIT $2 OFFSET $3"
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
            Error::Validation(format!("atom name '{}' is already taken", name))
        }
        _ => Error::Database(err),
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct AtomRow {
    id: i64,
    name: String,
    description: Option<String>,
    connect_url: String,
    enabled: bool,
    owner_id: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<AtomRow> for Atom {
    fn from(row: AtomRow) -> Self {
        Atom {
            id: row.id,
            name: row.name,
            description: row.description,
            connect_url: row.connect_url,
            enabled: row.enabled,
            owner_id: row.owner_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}
