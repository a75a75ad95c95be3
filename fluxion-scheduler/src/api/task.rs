//! Task API Handlers

use axum::{
    Json,
    extract::{Path, Query, State},
};
use fluxion_core::dto::task::{PipelineTaskDetail, TaskDetail};
use serde::Deserialize;

use super::error::ApiResult;
use super::owner::Owner;
use crate::engine::Engine;

#[derive(Debug, Default, Deserialize)]
pub struct PipelineTaskQuery {
    #[serde(default)]
    pub load_tasks: bool,
}

/// GET /task/{id}
pub async fn get_task(
    State(engine): State<Engine>,
    owner: Owner,
    Path(id): Path<i64>,
) -> ApiResult<Json<TaskDetail>> {
    let task = engine.tasks().get(id, owner.as_str()).await?;
    Ok(Json(task))
}

/// GET /pipeline-task/{id}?load_tasks=bool
pub async fn get_pipeline_task(
    State(engine): State<Engine>,
    owner: Owner,
    Path(id): Path<i64>,
    Query(query): Query<PipelineTaskQuery>,
) -> ApiResult<Json<PipelineTaskDetail>> {
    let run = engine
        .tasks()
        .pipeline_task(id, owner.as_str(), query.load_tasks)
        .await?;
    Ok(Json(run))
}
