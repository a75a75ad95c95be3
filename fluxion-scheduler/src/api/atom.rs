//! Atom API Handlers

use axum::{
    Json,
    extract::{Path, Query, State},
};
use fluxion_core::domain::atom::Atom;
use fluxion_core::domain::task::Task;
use fluxion_core::dto::atom::{CreateAtom, ExecuteAtom, UpdateAtom};
use fluxion_core::dto::{Page, Pagination};

use super::error::ApiResult;
use super::owner::Owner;
use crate::engine::Engine;

/// POST /atom
pub async fn create_atom(
    State(engine): State<Engine>,
    owner: Owner,
    Json(req): Json<CreateAtom>,
) -> ApiResult<Json<Atom>> {
    tracing::info!("Creating atom: {}", req.name);

    let atom = engine.atoms().create(owner.as_str(), req).await?;
    Ok(Json(atom))
}

/// GET /atom/list
pub async fn list_atoms(
    State(engine): State<Engine>,
    owner: Owner,
    Query(page): Query<Pagination>,
) -> ApiResult<Json<Page<Atom>>> {
    let atoms = engine.atoms().list(owner.as_str(), page).await?;
    Ok(Json(atoms))
}

/// GET /atom/{id}
pub async fn get_atom(
    State(engine): State<Engine>,
    owner: Owner,
    Path(id): Path<i64>,
) -> ApiResult<Json<Atom>> {
    let atom = engine.atoms().get(id, owner.as_str()).await?;
    Ok(Json(atom))
}

/// PUT /atom/{id}
pub async fn update_atom(
    State(engine): State<Engine>,
    owner: Owner,
    Path(id): Path<i64>,
    Json(req): Json<UpdateAtom>,
) -> ApiResult<Json<Atom>> {
    tracing::info!("Updating atom: {}", id);

    let atom = engine.atoms().update(id, owner.as_str(), req).await?;
    Ok(Json(atom))
}

/// POST /atom/{id}/execute
/// Schedules the atom and returns its pending task
pub async fn execute_atom(
    State(engine): State<Engine>,
    owner: Owner,
    Path(id): Path<i64>,
    Json(req): Json<ExecuteAtom>,
) -> ApiResult<Json<Task>> {
    tracing::info!("Executing atom: {}", id);

    let task = engine.atoms().execute(id, owner.as_str(), req.input).await?;
    Ok(Json(task))
}

/// GET /atom/{id}/tasks
pub async fn list_atom_tasks(
    State(engine): State<Engine>,
    owner: Owner,
    Path(id): Path<i64>,
    Query(page): Query<Pagination>,
) -> ApiResult<Json<Page<Task>>> {
    let tasks = engine.atoms().tasks(id, owner.as_str(), page).await?;
    Ok(Json(tasks))
}
