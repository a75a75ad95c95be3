//! Pipeline API Handlers

use axum::{
    Json,
    extract::{Path, Query, State},
};
use fluxion_core::domain::pipeline::{Pipeline, PipelineAtom};
use fluxion_core::domain::task::PipelineTask;
use fluxion_core::dto::pipeline::{
    CreatePipeline, CreatePipelineAtom, ExecutePipeline, PipelineAtomBatch, PipelineAtomTree,
    UpdatePipeline,
};
use fluxion_core::dto::{Page, Pagination};

use super::error::ApiResult;
use super::owner::Owner;
use crate::engine::Engine;

/// POST /pipeline
pub async fn create_pipeline(
    State(engine): State<Engine>,
    owner: Owner,
    Json(req): Json<CreatePipeline>,
) -> ApiResult<Json<Pipeline>> {
    tracing::info!("Creating pipeline: {}", req.name);

    let pipeline = engine.pipelines().create(owner.as_str(), req).await?;
    Ok(Json(pipeline))
}

/// GET /pipeline/list
pub async fn list_pipelines(
    State(engine): State<Engine>,
    owner: Owner,
    Query(page): Query<Pagination>,
) -> ApiResult<Json<Page<Pipeline>>> {
    let pipelines = engine.pipelines().list(owner.as_str(), page).await?;
    Ok(Json(pipelines))
}

/// GET /pipeline/{id}
pub async fn get_pipeline(
    State(engine): State<Engine>,
    owner: Owner,
    Path(id): Path<i64>,
) -> ApiResult<Json<Pipeline>> {
    let pipeline = engine.pipelines().get(id, owner.as_str()).await?;
    Ok(Json(pipeline))
}

/// PUT /pipeline/{id}
pub async fn update_pipeline(
    State(engine): State<Engine>,
    owner: Owner,
    Path(id): Path<i64>,
    Json(req): Json<UpdatePipeline>,
) -> ApiResult<Json<Pipeline>> {
    tracing::info!("Updating pipeline: {}", id);

    let pipeline = engine.pipelines().update(id, owner.as_str(), req).await?;
    Ok(Json(pipeline))
}

/// POST /pipeline/{id}/execute
/// Starts a run and returns it without waiting for completion
pub async fn execute_pipeline(
    State(engine): State<Engine>,
    owner: Owner,
    Path(id): Path<i64>,
    Json(req): Json<ExecutePipeline>,
) -> ApiResult<Json<PipelineTask>> {
    tracing::info!("Executing pipeline: {}", id);

    let run = engine.pipelines().execute(id, owner.as_str(), req.input).await?;
    Ok(Json(run))
}

/// GET /pipeline/{id}/atoms
pub async fn list_pipeline_atoms(
    State(engine): State<Engine>,
    owner: Owner,
    Path(id): Path<i64>,
    Query(page): Query<Pagination>,
) -> ApiResult<Json<Page<PipelineAtom>>> {
    let atoms = engine.pipelines().list_atoms(id, owner.as_str(), page).await?;
    Ok(Json(atoms))
}

/// POST /pipeline/{id}/atoms
pub async fn add_pipeline_atom(
    State(engine): State<Engine>,
    owner: Owner,
    Path(id): Path<i64>,
    Json(req): Json<CreatePipelineAtom>,
) -> ApiResult<Json<PipelineAtom>> {
    let node = engine.pipelines().add_atom(id, owner.as_str(), req).await?;
    Ok(Json(node))
}

/// POST /pipeline/{id}/atoms/batch
/// Creates a nested atom tree atomically and makes it the pipeline's graph
pub async fn batch_create_pipeline_atoms(
    State(engine): State<Engine>,
    owner: Owner,
    Path(id): Path<i64>,
    Json(tree): Json<PipelineAtomTree>,
) -> ApiResult<Json<PipelineAtomBatch>> {
    tracing::info!("Creating atom tree for pipeline: {}", id);

    let batch = engine.pipelines().batch_create(id, owner.as_str(), tree).await?;
    Ok(Json(batch))
}

/// GET /pipeline/{id}/tasks
pub async fn list_pipeline_tasks(
    State(engine): State<Engine>,
    owner: Owner,
    Path(id): Path<i64>,
    Query(page): Query<Pagination>,
) -> ApiResult<Json<Page<PipelineTask>>> {
    let runs = engine
        .tasks()
        .list_pipeline_tasks(id, owner.as_str(), page)
        .await?;
    Ok(Json(runs))
}
